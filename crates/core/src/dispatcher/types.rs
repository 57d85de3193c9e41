//! Types for the request dispatcher.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::WorkspaceMode;
use crate::fetcher::FetchError;
use crate::locator::LocatorError;
use crate::packager::PackageError;
use crate::publisher::PublishError;
use crate::request::RequestStoreError;

/// Errors that end a single request's pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to prepare workspace {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Locate(#[from] LocatorError),

    #[error("Packaging failed: {0}")]
    Package(#[from] PackageError),

    #[error("Publishing failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Storage error: {0}")]
    Storage(#[from] RequestStoreError),

    /// The owner cancelled the request between stages.
    #[error("Request {0} was cancelled")]
    Cancelled(i64),

    #[error("Pipeline task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Stage label used for metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Workspace { .. } => "workspace",
            Self::Fetch(_) => "fetch",
            Self::Locate(_) => "locate",
            Self::Package(_) => "package",
            Self::Publish(_) => "publish",
            Self::Storage(_) => "storage",
            Self::Cancelled(_) => "cancelled",
            Self::Task(_) => "task",
        }
    }

    /// Text stored on the failed record and shown to its owner.
    ///
    /// Storage details stay in the logs.
    pub fn summary(&self) -> String {
        match self {
            Self::Storage(_) => "Internal storage error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors from dispatcher control operations.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("Invalid dispatcher configuration: {0}")]
    Config(String),

    #[error("Request store error: {0}")]
    Store(#[from] RequestStoreError),
}

/// How a pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Completed { url: String },
    Failed { error: String },
    /// Cancelled by the owner; no terminal write was made by the pipeline.
    Cancelled,
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Current status of the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStatus {
    pub running: bool,
    /// Pipelines running in this process.
    pub in_flight: usize,
    pub max_concurrent: usize,
    pub workspace_mode: WorkspaceMode,
    /// Records waiting in `queued`.
    pub queued: i64,
    /// Records in `processing` according to the store.
    pub processing: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failure_summary_keeps_stderr() {
        let err = PipelineError::from(FetchError::failed(Some(1), "auth error"));
        assert_eq!(err.stage(), "fetch");
        assert!(err.summary().contains("auth error"));
    }

    #[test]
    fn test_storage_summary_is_generic() {
        let err = PipelineError::from(RequestStoreError::Database("disk I/O error".to_string()));
        assert_eq!(err.summary(), "Internal storage error");
        assert!(err.to_string().contains("disk I/O error"));
    }

    #[test]
    fn test_artifact_not_found_is_distinct() {
        let err = PipelineError::from(LocatorError::ArtifactNotFound {
            workdir: PathBuf::from("/w/request-1"),
        });
        assert_eq!(err.stage(), "locate");
        assert!(err.summary().starts_with("No downloaded media found"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(PipelineOutcome::Cancelled.label(), "cancelled");
        let json = serde_json::to_string(&PipelineOutcome::Completed {
            url: "https://gofile.io/d/x".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"outcome\":\"completed\""));
    }
}
