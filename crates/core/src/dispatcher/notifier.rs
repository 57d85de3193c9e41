//! Progress notifications to request owners.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::request::Request;

/// What happened to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    Started,
    Stage { stage: String },
    Completed { url: String },
    Failed { error: String },
}

/// A notification addressed to a request's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub request_id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(flatten)]
    pub kind: NoticeKind,
}

impl Notice {
    pub fn for_request(request: &Request, kind: NoticeKind) -> Self {
        Self {
            request_id: request.id,
            user_id: request.user_id,
            chat_id: request.chat_id,
            message_id: request.message_id,
            kind,
        }
    }
}

/// Delivers notices. Delivery problems are the notifier's own business.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice);
}

/// Writes notices to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: Notice) {
        match &notice.kind {
            NoticeKind::Started => info!(
                "Request {} (user {}) processing started",
                notice.request_id, notice.user_id
            ),
            NoticeKind::Stage { stage } => {
                info!("Request {}: {}", notice.request_id, stage)
            }
            NoticeKind::Completed { url } => {
                info!("Request {} completed: {}", notice.request_id, url)
            }
            NoticeKind::Failed { error } => {
                info!("Request {} failed: {}", notice.request_id, error)
            }
        }
    }
}

/// Sends every notice to each inner notifier in order.
#[derive(Default, Clone)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.targets.push(notifier);
        self
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, notice: Notice) {
        for target in &self.targets {
            target.notify(notice.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;

    fn notice(kind: NoticeKind) -> Notice {
        Notice {
            request_id: 1,
            user_id: 2,
            chat_id: 3,
            message_id: None,
            kind,
        }
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_target() {
        let a = Arc::new(RecordingNotifier::new());
        let b = Arc::new(RecordingNotifier::new());
        let fanout = FanoutNotifier::new()
            .with(a.clone() as Arc<dyn Notifier>)
            .with(b.clone() as Arc<dyn Notifier>);

        fanout.notify(notice(NoticeKind::Started)).await;
        LogNotifier.notify(notice(NoticeKind::Started)).await;

        assert_eq!(a.notices().await.len(), 1);
        assert_eq!(b.notices().await.len(), 1);
    }

    #[test]
    fn test_notice_serializes_flat() {
        let json = serde_json::to_value(notice(NoticeKind::Completed {
            url: "https://gofile.io/d/x".to_string(),
        }))
        .unwrap();
        assert_eq!(json["kind"], "completed");
        assert_eq!(json["url"], "https://gofile.io/d/x");
        assert_eq!(json["request_id"], 1);
        assert!(json.get("message_id").is_none());
    }
}
