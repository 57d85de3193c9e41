use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::RequestStatus;

/// Audit event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Request lifecycle
    RequestSubmitted {
        request_id: i64,
        user_id: i64,
        chat_id: i64,
        url: String,
        mode: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tracks: Option<String>,
    },
    RequestStatusChanged {
        request_id: i64,
        from_status: RequestStatus,
        to_status: RequestStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RequestCancelled {
        request_id: i64,
        user_id: i64,
        previous_status: RequestStatus,
    },

    // Pipeline stages
    FetchStarted {
        request_id: i64,
        mode: String,
        workdir: String,
    },
    FetchCompleted {
        request_id: i64,
        duration_ms: u64,
    },
    FetchFailed {
        request_id: i64,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    ArtifactLocated {
        request_id: i64,
        path: String,
    },
    ArchiveCreated {
        request_id: i64,
        archive_path: String,
        size_bytes: u64,
    },
    ArchivePublished {
        request_id: i64,
        url: String,
        duration_ms: u64,
    },
    CleanupFailed {
        request_id: i64,
        path: String,
        error: String,
    },

    // Track selection
    SelectionStarted {
        user_id: i64,
        url: String,
        track_count: usize,
        expires_at: DateTime<Utc>,
    },
    SelectionExpired {
        user_id: i64,
        url: String,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::RequestSubmitted { .. } => "request_submitted",
            Self::RequestStatusChanged { .. } => "request_status_changed",
            Self::RequestCancelled { .. } => "request_cancelled",
            Self::FetchStarted { .. } => "fetch_started",
            Self::FetchCompleted { .. } => "fetch_completed",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::ArtifactLocated { .. } => "artifact_located",
            Self::ArchiveCreated { .. } => "archive_created",
            Self::ArchivePublished { .. } => "archive_published",
            Self::CleanupFailed { .. } => "cleanup_failed",
            Self::SelectionStarted { .. } => "selection_started",
            Self::SelectionExpired { .. } => "selection_expired",
        }
    }

    pub fn request_id(&self) -> Option<i64> {
        match self {
            Self::RequestSubmitted { request_id, .. }
            | Self::RequestStatusChanged { request_id, .. }
            | Self::RequestCancelled { request_id, .. }
            | Self::FetchStarted { request_id, .. }
            | Self::FetchCompleted { request_id, .. }
            | Self::FetchFailed { request_id, .. }
            | Self::ArtifactLocated { request_id, .. }
            | Self::ArchiveCreated { request_id, .. }
            | Self::ArchivePublished { request_id, .. }
            | Self::CleanupFailed { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::RequestSubmitted { user_id, .. }
            | Self::RequestCancelled { user_id, .. }
            | Self::SelectionStarted { user_id, .. }
            | Self::SelectionExpired { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub request_id: Option<i64>,
    pub user_id: Option<i64>,
    pub data: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_events_have_no_ids() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.request_id(), None);
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_submitted_carries_request_and_user() {
        let event = AuditEvent::RequestSubmitted {
            request_id: 12,
            user_id: 99,
            chat_id: 5,
            url: "https://music.apple.com/us/album/x/1".to_string(),
            mode: "partial".to_string(),
            tracks: Some("1,2".to_string()),
        };
        assert_eq!(event.event_type(), "request_submitted");
        assert_eq!(event.request_id(), Some(12));
        assert_eq!(event.user_id(), Some(99));
    }

    #[test]
    fn test_stage_events_have_request_only() {
        let event = AuditEvent::FetchFailed {
            request_id: 3,
            error: "auth error".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(event.event_type(), "fetch_failed");
        assert_eq!(event.request_id(), Some(3));
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_serialize_status_change() {
        let event = AuditEvent::RequestStatusChanged {
            request_id: 1,
            from_status: RequestStatus::Queued,
            to_status: RequestStatus::Processing,
            reason: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"request_status_changed\""));
        assert!(json.contains("\"from_status\":\"queued\""));
        assert!(!json.contains("reason"));

        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
