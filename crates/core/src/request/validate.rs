//! Validation of user-supplied submission input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input rejected before anything reaches the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL is empty")]
    EmptyUrl,

    #[error("URL must start with {expected}")]
    UnsupportedUrl { expected: String },

    #[error("URL must point to an {segment}")]
    MissingSegment { segment: String },

    #[error("no tracks selected")]
    EmptySelection,

    #[error("invalid track selection: {0}")]
    InvalidSelection(String),

    #[error("track index {0} is out of range")]
    IndexOutOfRange(u32),
}

/// Rules a source URL has to satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRules {
    /// Required prefix, scheme included.
    pub prefix: String,
    /// Path segment the URL must contain (e.g. `album`).
    pub required_segment: String,
}

impl Default for UrlRules {
    fn default() -> Self {
        Self {
            prefix: "https://music.apple.com/".to_string(),
            required_segment: "album".to_string(),
        }
    }
}

impl UrlRules {
    /// Validate and return the trimmed URL.
    pub fn validate(&self, url: &str) -> Result<String, ValidationError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        if !url.starts_with(&self.prefix) {
            return Err(ValidationError::UnsupportedUrl {
                expected: self.prefix.clone(),
            });
        }
        if !self.required_segment.is_empty() && !url.contains(&self.required_segment) {
            return Err(ValidationError::MissingSegment {
                segment: self.required_segment.clone(),
            });
        }
        if url.chars().any(char::is_whitespace) {
            return Err(ValidationError::UnsupportedUrl {
                expected: self.prefix.clone(),
            });
        }
        Ok(url.to_string())
    }
}
