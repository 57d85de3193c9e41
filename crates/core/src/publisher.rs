//! Uploading an archive and recovering its public link.

use std::io;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

/// Errors raised while publishing.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Upload tool not found: {program}")]
    ToolNotFound { program: String },

    #[error("Upload failed: {reason}")]
    Failed { reason: String },

    #[error("Upload timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("Invalid link pattern: {0}")]
    InvalidPattern(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PublishError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Configuration for the upload tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Program to execute; the archive path is its last argument.
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the archive path.
    #[serde(default)]
    pub args: Vec<String>,

    /// Pattern whose first capture group is the link.
    #[serde(default = "default_link_pattern")]
    pub link_pattern: String,

    /// Kill the upload after this many seconds. Unset means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_program() -> String {
    "gofilepy".to_string()
}

fn default_link_pattern() -> String {
    r"Download\s*page:\s*(https?://\S+)".to_string()
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            link_pattern: default_link_pattern(),
            timeout_secs: None,
        }
    }
}

/// Uploads an archive and returns a retrievable link.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, archive: &Path) -> Result<String, PublishError>;
}

/// Publisher backed by an external upload program.
pub struct SubprocessPublisher {
    config: PublisherConfig,
    link_regex: Regex,
}

impl SubprocessPublisher {
    pub fn new(config: PublisherConfig) -> Result<Self, PublishError> {
        let link_regex = Regex::new(&config.link_pattern)
            .map_err(|e| PublishError::InvalidPattern(e.to_string()))?;
        Ok(Self { config, link_regex })
    }

    /// Pull the link out of the tool's stdout.
    pub fn extract_link(&self, stdout: &str) -> Option<String> {
        self.link_regex
            .captures(stdout)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl Publisher for SubprocessPublisher {
    async fn publish(&self, archive: &Path) -> Result<String, PublishError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(archive)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Uploading {}", archive.display());

        let output = match self.config.timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), cmd.output())
                .await
                .map_err(|_| PublishError::Timeout { timeout_secs: secs })?,
            None => cmd.output().await,
        }
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PublishError::ToolNotFound {
                    program: self.config.program.clone(),
                }
            } else {
                PublishError::Io(e)
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            warn!(
                "Upload of {} exited with code {:?}",
                archive.display(),
                output.status.code()
            );
            return Err(PublishError::failed(detail));
        }

        match self.extract_link(&stdout) {
            Some(link) => {
                info!("Uploaded {} to {}", archive.display(), link);
                Ok(link)
            }
            None => Err(PublishError::failed("Could not extract download link")),
        }
    }
}
