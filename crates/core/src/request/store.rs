//! Request storage trait and types.

use std::fmt;
use std::path::PathBuf;

use crate::request::{Request, RequestStatus, Selection};

/// Error type for request store operations.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestStoreError {
    /// Request not found.
    NotFound(i64),
    /// The requested transition would run the lifecycle backward.
    InvalidTransition {
        request_id: i64,
        from: RequestStatus,
        to: RequestStatus,
    },
    /// Cannot perform operation due to current status.
    InvalidState {
        request_id: i64,
        current_status: RequestStatus,
        operation: String,
    },
    /// Database error.
    Database(String),
}

impl fmt::Display for RequestStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStoreError::NotFound(id) => write!(f, "Request not found: {}", id),
            RequestStoreError::InvalidTransition {
                request_id,
                from,
                to,
            } => write!(
                f,
                "Invalid transition for request {}: {} -> {}",
                request_id, from, to
            ),
            RequestStoreError::InvalidState {
                request_id,
                current_status,
                operation,
            } => write!(
                f,
                "Cannot {} request {}: current status is {}",
                operation, request_id, current_status
            ),
            RequestStoreError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for RequestStoreError {}

/// Data needed to enqueue a new request.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub user_id: i64,
    pub chat_id: i64,
    pub url: String,
    pub selection: Selection,
}

/// A status change plus the result fields that go with it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: RequestStatus,
    pub download_path: Option<PathBuf>,
    pub published_url: Option<String>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    /// Admission into a pipeline.
    pub fn processing() -> Self {
        Self {
            status: RequestStatus::Processing,
            download_path: None,
            published_url: None,
            error_message: None,
        }
    }

    /// Successful publish.
    pub fn completed(download_path: PathBuf, published_url: impl Into<String>) -> Self {
        Self {
            status: RequestStatus::Completed,
            download_path: Some(download_path),
            published_url: Some(published_url.into()),
            error_message: None,
        }
    }

    /// Pipeline failure with a summary.
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: RequestStatus::Failed,
            download_path: None,
            published_url: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// Result of a `set_status` call.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The update was written; carries the new record.
    Applied(Request),
    /// The record was already terminal; carries it unchanged.
    Skipped(Request),
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }

    pub fn request(&self) -> &Request {
        match self {
            UpdateOutcome::Applied(r) | UpdateOutcome::Skipped(r) => r,
        }
    }

    pub fn into_request(self) -> Request {
        match self {
            UpdateOutcome::Applied(r) | UpdateOutcome::Skipped(r) => r,
        }
    }
}

/// Filter for querying requests.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Filter by status.
    pub status: Option<RequestStatus>,
    /// Filter by owner.
    pub user_id: Option<i64>,
    /// Only queued or processing records.
    pub active_only: bool,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl RequestFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            user_id: None,
            active_only: false,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by owner.
    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Only active records.
    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for request storage backends.
///
/// Every method is a short, self-contained critical section; implementations
/// must make `set_status` and `cancel` atomic with respect to each other.
pub trait RequestStore: Send + Sync {
    /// Enqueue a new request in `queued` status.
    fn create(&self, request: CreateRequest) -> Result<Request, RequestStoreError>;

    /// Get a request by ID.
    fn get(&self, id: i64) -> Result<Option<Request>, RequestStoreError>;

    /// List requests matching the filter, oldest first.
    fn list(&self, filter: &RequestFilter) -> Result<Vec<Request>, RequestStoreError>;

    /// Count requests matching the filter.
    fn count(&self, filter: &RequestFilter) -> Result<i64, RequestStoreError>;

    /// All queued requests, ordered by creation time then id.
    fn list_queued(&self) -> Result<Vec<Request>, RequestStoreError>;

    /// Number of requests currently in `processing`.
    fn count_processing(&self) -> Result<i64, RequestStoreError>;

    /// Apply a status change along the lifecycle.
    ///
    /// Terminal records are left untouched and reported as
    /// [`UpdateOutcome::Skipped`]. A backward or sideways transition is an
    /// [`RequestStoreError::InvalidTransition`].
    fn set_status(&self, id: i64, update: StatusUpdate)
        -> Result<UpdateOutcome, RequestStoreError>;

    /// Cancel a queued or processing request.
    fn cancel(&self, id: i64) -> Result<Request, RequestStoreError>;

    /// Active requests of one owner, oldest first.
    fn list_active_for_owner(&self, user_id: i64) -> Result<Vec<Request>, RequestStoreError>;

    /// Attach the front-end's status message handle.
    fn set_message_id(&self, id: i64, message_id: i64) -> Result<(), RequestStoreError>;
}
