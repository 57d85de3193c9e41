//! Core request data types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validate::ValidationError;

/// Lifecycle status of a download request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for a dispatcher slot.
    Queued,
    /// Admitted by the dispatcher; a pipeline owns it.
    Processing,
    /// Published successfully.
    Completed,
    /// A pipeline stage failed.
    Failed,
    /// Cancelled by its owner.
    Cancelled,
}

impl RequestStatus {
    /// Get the status as a string (for filtering and storage).
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Queued => "queued",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition can leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }

    /// Whether a record in this status counts as active.
    pub fn is_active(&self) -> bool {
        matches!(self, RequestStatus::Queued | RequestStatus::Processing)
    }

    /// Whether the owner may still cancel.
    pub fn can_cancel(&self) -> bool {
        self.is_active()
    }

    /// Whether moving from `self` to `next` follows the lifecycle forward.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    /// All statuses, in lifecycle order.
    pub fn all() -> [RequestStatus; 5] {
        [
            RequestStatus::Queued,
            RequestStatus::Processing,
            RequestStatus::Completed,
            RequestStatus::Failed,
            RequestStatus::Cancelled,
        ]
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RequestStatus::Queued),
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status: {}", other)),
        }
    }
}

/// Which tracks of a collection a partial request wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "indices", rename_all = "snake_case")]
pub enum TrackSelection {
    /// Every track, expressed through the selective interface.
    All,
    /// 1-based track indices, deduplicated, in the order given.
    Indices(Vec<u32>),
}

impl TrackSelection {
    /// Parse a user reply such as `"3, 5,11"` or `"all"`.
    ///
    /// Only digits, commas and whitespace are accepted besides the literal
    /// `all`. Indices are 1-based; duplicates are dropped keeping the first
    /// occurrence.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(TrackSelection::All);
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',' || c.is_whitespace())
        {
            return Err(ValidationError::InvalidSelection(trimmed.to_string()));
        }

        let mut indices = Vec::new();
        for token in trimmed.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            // "3 5" without a comma is ambiguous
            if token.contains(char::is_whitespace) {
                return Err(ValidationError::InvalidSelection(trimmed.to_string()));
            }
            let index: u32 = token
                .parse()
                .map_err(|_| ValidationError::InvalidSelection(token.to_string()))?;
            if index == 0 {
                return Err(ValidationError::IndexOutOfRange(index));
            }
            if !indices.contains(&index) {
                indices.push(index);
            }
        }

        if indices.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        Ok(TrackSelection::Indices(indices))
    }

    /// The descriptor written to the fetch tool's stdin.
    pub fn descriptor(&self) -> String {
        match self {
            TrackSelection::All => "all".to_string(),
            TrackSelection::Indices(indices) => indices
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Check every index against the number of tracks in the listing.
    pub fn check_bounds(&self, track_count: usize) -> Result<(), ValidationError> {
        if let TrackSelection::Indices(indices) = self {
            if let Some(bad) = indices.iter().find(|&&i| i as usize > track_count) {
                return Err(ValidationError::IndexOutOfRange(*bad));
            }
        }
        Ok(())
    }
}

/// Full collection or a track subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Selection {
    Full,
    Partial { tracks: TrackSelection },
}

impl Selection {
    /// Storage name of the download type.
    pub fn kind(&self) -> &'static str {
        match self {
            Selection::Full => "full",
            Selection::Partial { .. } => "partial",
        }
    }

    /// Descriptor for the selective interface, if any.
    pub fn descriptor(&self) -> Option<String> {
        match self {
            Selection::Full => None,
            Selection::Partial { tracks } => Some(tracks.descriptor()),
        }
    }

    /// Rebuild from the stored download type and descriptor.
    pub fn from_stored(kind: &str, descriptor: Option<&str>) -> Result<Self, ValidationError> {
        match kind {
            "full" => Ok(Selection::Full),
            "partial" => {
                let tracks = TrackSelection::parse(descriptor.unwrap_or_default())?;
                Ok(Selection::Partial { tracks })
            }
            other => Err(ValidationError::InvalidSelection(other.to_string())),
        }
    }
}

/// A persisted download request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    /// Owner of the request.
    pub user_id: i64,
    /// Where notifications go.
    pub chat_id: i64,
    pub url: String,
    pub selection: Selection,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Located artifact folder, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_path: Option<PathBuf>,
    /// Retrievable link, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_url: Option<String>,
    /// Failure summary, set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub is_active: bool,
    /// Front-end handle of the status message, if one was posted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}
