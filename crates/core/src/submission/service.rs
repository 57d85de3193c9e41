//! The user-facing commands: submit, select tracks, check status, cancel.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::pending::{PendingSelection, PendingSelectionError, PendingSelectionStore};
use crate::audit::{AuditEvent, AuditHandle};
use crate::dispatcher::DispatchSignal;
use crate::fetcher::{FetchError, Fetcher};
use crate::metrics;
use crate::request::{
    CreateRequest, Request, RequestStatus, RequestStore, RequestStoreError, Selection,
    TrackSelection, UrlRules, ValidationError,
};

/// Errors returned to the submitting user.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("A track selection is already in progress (expires at {expires_at})")]
    SelectionPending { expires_at: DateTime<Utc> },

    #[error("No track selection in progress")]
    NoPendingSelection,

    #[error("Could not fetch track listing: {0}")]
    Listing(#[from] FetchError),

    #[error("Request not found: {0}")]
    NotFound(i64),

    #[error("Request {0} belongs to another user")]
    NotOwner(i64),

    #[error("Request {request_id} cannot be cancelled (status: {status})")]
    NotCancellable {
        request_id: i64,
        status: RequestStatus,
    },

    #[error("Storage error: {0}")]
    Store(#[from] RequestStoreError),

    #[error("Storage error: {0}")]
    Pending(#[from] PendingSelectionError),
}

impl SubmissionError {
    /// Label for the rejection metric, if this is a rejection.
    fn rejection_reason(&self) -> Option<&'static str> {
        match self {
            Self::Validation(ValidationError::EmptyUrl)
            | Self::Validation(ValidationError::UnsupportedUrl { .. })
            | Self::Validation(ValidationError::MissingSegment { .. }) => Some("invalid_url"),
            Self::Validation(_) => Some("invalid_selection"),
            Self::SelectionPending { .. } => Some("selection_pending"),
            Self::NoPendingSelection => Some("no_selection"),
            _ => None,
        }
    }
}

/// Submission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Prefix every source URL must start with.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,

    /// Path segment every source URL must contain.
    #[serde(default = "default_required_path_segment")]
    pub required_path_segment: String,

    /// How long a track listing waits for the user's choice.
    #[serde(default = "default_selection_timeout")]
    pub selection_timeout_secs: u64,
}

fn default_url_prefix() -> String {
    UrlRules::default().prefix
}

fn default_required_path_segment() -> String {
    UrlRules::default().required_segment
}

fn default_selection_timeout() -> u64 {
    30
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            url_prefix: default_url_prefix(),
            required_path_segment: default_required_path_segment(),
            selection_timeout_secs: default_selection_timeout(),
        }
    }
}

impl SubmissionConfig {
    pub fn url_rules(&self) -> UrlRules {
        UrlRules {
            prefix: self.url_prefix.clone(),
            required_segment: self.required_path_segment.clone(),
        }
    }
}

/// Entry point for everything a user can ask for.
pub struct SubmissionService {
    store: Arc<dyn RequestStore>,
    pending: Arc<dyn PendingSelectionStore>,
    fetcher: Arc<dyn Fetcher>,
    signal: DispatchSignal,
    audit: Option<AuditHandle>,
    rules: UrlRules,
    selection_timeout: Duration,
}

impl SubmissionService {
    pub fn new(
        config: &SubmissionConfig,
        store: Arc<dyn RequestStore>,
        pending: Arc<dyn PendingSelectionStore>,
        fetcher: Arc<dyn Fetcher>,
        signal: DispatchSignal,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            store,
            pending,
            fetcher,
            signal,
            audit,
            rules: config.url_rules(),
            selection_timeout: Duration::seconds(config.selection_timeout_secs as i64),
        }
    }

    /// Queue a download of the whole collection.
    pub async fn submit_full(
        &self,
        user_id: i64,
        chat_id: i64,
        url: &str,
    ) -> Result<Request, SubmissionError> {
        let url = self.rules.validate(url).map_err(reject)?;
        self.enqueue(CreateRequest {
            user_id,
            chat_id,
            url,
            selection: Selection::Full,
        })
        .await
    }

    /// Fetch the track listing and wait for the user to pick tracks.
    pub async fn begin_selection(
        &self,
        user_id: i64,
        chat_id: i64,
        url: &str,
    ) -> Result<PendingSelection, SubmissionError> {
        let url = self.rules.validate(url).map_err(reject)?;
        let now = Utc::now();

        if let Some(existing) = self.pending.get(user_id)? {
            if !existing.is_expired(now) {
                return Err(reject(SubmissionError::SelectionPending {
                    expires_at: existing.expires_at,
                }));
            }
            self.expire(existing).await?;
        }

        let listing = self.fetcher.track_listing(&url).await?;
        let now = Utc::now();
        let selection = PendingSelection {
            user_id,
            chat_id,
            url,
            listing,
            message_id: None,
            created_at: now,
            expires_at: now + self.selection_timeout,
        };

        // Another selection may have started while the listing was fetched.
        if !self.pending.insert_if_absent(&selection, now)? {
            let expires_at = self
                .pending
                .get(user_id)?
                .map(|s| s.expires_at)
                .unwrap_or(selection.expires_at);
            return Err(reject(SubmissionError::SelectionPending { expires_at }));
        }

        info!(
            "User {} selecting from {} ({} tracks)",
            user_id,
            selection.url,
            selection.listing.tracks.len()
        );
        self.emit(AuditEvent::SelectionStarted {
            user_id,
            url: selection.url.clone(),
            track_count: selection.listing.tracks.len(),
            expires_at: selection.expires_at,
        })
        .await;

        Ok(selection)
    }

    /// Turn the user's reply into a partial download request.
    ///
    /// The selection is claimed before anything is queued, so one selection
    /// yields at most one request. An unparseable reply puts it back and it
    /// stays open until it expires.
    pub async fn complete_selection(
        &self,
        user_id: i64,
        text: &str,
    ) -> Result<Request, SubmissionError> {
        let now = Utc::now();
        let pending = match self.pending.take(user_id)? {
            Some(pending) if !pending.is_expired(now) => pending,
            Some(expired) => {
                self.emit(AuditEvent::SelectionExpired {
                    user_id,
                    url: expired.url,
                })
                .await;
                return Err(reject(SubmissionError::NoPendingSelection));
            }
            None => return Err(reject(SubmissionError::NoPendingSelection)),
        };

        let tracks = match TrackSelection::parse(text)
            .and_then(|tracks| tracks.check_bounds(pending.listing.tracks.len()).map(|_| tracks))
        {
            Ok(tracks) => tracks,
            Err(e) => {
                self.restore(&pending, now)?;
                return Err(reject(e));
            }
        };

        let create = CreateRequest {
            user_id,
            chat_id: pending.chat_id,
            url: pending.url.clone(),
            selection: Selection::Partial { tracks },
        };
        match self.enqueue(create).await {
            Ok(request) => Ok(request),
            Err(e) => {
                self.restore(&pending, now)?;
                Err(e)
            }
        }
    }

    fn restore(
        &self,
        pending: &PendingSelection,
        now: DateTime<Utc>,
    ) -> Result<(), SubmissionError> {
        if !self.pending.insert_if_absent(pending, now)? {
            debug!(
                "User {} started another selection, not restoring the old one",
                pending.user_id
            );
        }
        Ok(())
    }

    /// Drop the user's pending selection, if any.
    pub async fn abandon_selection(&self, user_id: i64) -> Result<bool, SubmissionError> {
        Ok(self.pending.delete(user_id)?)
    }

    /// Requests of the user that are still queued or processing.
    pub fn status(&self, user_id: i64) -> Result<Vec<Request>, SubmissionError> {
        Ok(self.store.list_active_for_owner(user_id)?)
    }

    /// Cancel one of the user's requests.
    pub async fn cancel(&self, user_id: i64, request_id: i64) -> Result<Request, SubmissionError> {
        let request = self
            .store
            .get(request_id)?
            .ok_or(SubmissionError::NotFound(request_id))?;
        if request.user_id != user_id {
            return Err(SubmissionError::NotOwner(request_id));
        }

        let cancelled = match self.store.cancel(request_id) {
            Ok(cancelled) => cancelled,
            Err(RequestStoreError::InvalidState { current_status, .. }) => {
                return Err(SubmissionError::NotCancellable {
                    request_id,
                    status: current_status,
                });
            }
            Err(RequestStoreError::NotFound(id)) => return Err(SubmissionError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };

        info!(
            "User {} cancelled request {} (was {})",
            user_id, request_id, request.status
        );
        metrics::REQUESTS_CANCELLED.inc();
        self.emit(AuditEvent::RequestCancelled {
            request_id,
            user_id,
            previous_status: request.status,
        })
        .await;
        self.emit(AuditEvent::RequestStatusChanged {
            request_id,
            from_status: request.status,
            to_status: RequestStatus::Cancelled,
            reason: Some("cancelled by owner".to_string()),
        })
        .await;

        Ok(cancelled)
    }

    /// Remove expired selections. Returns how many were removed.
    pub async fn purge_expired_selections(&self) -> Result<usize, SubmissionError> {
        let expired = self.pending.purge_expired(Utc::now())?;
        for selection in &expired {
            debug!("Selection of user {} expired", selection.user_id);
            self.emit(AuditEvent::SelectionExpired {
                user_id: selection.user_id,
                url: selection.url.clone(),
            })
            .await;
        }
        Ok(expired.len())
    }

    async fn enqueue(&self, create: CreateRequest) -> Result<Request, SubmissionError> {
        let request = self.store.create(create)?;
        info!(
            "Queued request {} for user {}: {} ({})",
            request.id,
            request.user_id,
            request.url,
            request.selection.kind()
        );
        metrics::REQUESTS_SUBMITTED
            .with_label_values(&[request.selection.kind()])
            .inc();
        self.emit(AuditEvent::RequestSubmitted {
            request_id: request.id,
            user_id: request.user_id,
            chat_id: request.chat_id,
            url: request.url.clone(),
            mode: request.selection.kind().to_string(),
            tracks: request.selection.descriptor(),
        })
        .await;

        self.signal.wake();
        Ok(request)
    }

    async fn expire(&self, selection: PendingSelection) -> Result<(), SubmissionError> {
        if self.pending.delete(selection.user_id)? {
            self.emit(AuditEvent::SelectionExpired {
                user_id: selection.user_id,
                url: selection.url,
            })
            .await;
        }
        Ok(())
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

/// Count a rejection and hand the error back.
fn reject<E: Into<SubmissionError>>(err: E) -> SubmissionError {
    let err = err.into();
    if let Some(reason) = err.rejection_reason() {
        warn!("Submission rejected: {}", err);
        metrics::SUBMISSIONS_REJECTED
            .with_label_values(&[reason])
            .inc();
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SqliteRequestStore;
    use crate::submission::SqlitePendingSelectionStore;
    use crate::testing::{fixtures, MockFetcher};
    use tokio::sync::mpsc;

    struct Harness {
        service: SubmissionService,
        store: Arc<SqliteRequestStore>,
        pending: Arc<SqlitePendingSelectionStore>,
        fetcher: Arc<MockFetcher>,
        wakes: mpsc::Receiver<()>,
    }

    fn harness(config: SubmissionConfig) -> Harness {
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let pending = Arc::new(SqlitePendingSelectionStore::in_memory().unwrap());
        let fetcher = Arc::new(MockFetcher::new());
        let (signal, wakes) = DispatchSignal::channel(8);
        let service = SubmissionService::new(
            &config,
            store.clone(),
            pending.clone(),
            fetcher.clone(),
            signal,
            None,
        );
        Harness {
            service,
            store,
            pending,
            fetcher,
            wakes,
        }
    }

    #[tokio::test]
    async fn test_submit_full_queues_and_wakes() {
        let mut h = harness(SubmissionConfig::default());
        let url = fixtures::album_url(1);

        let request = h.service.submit_full(1, 10, &format!("  {}  ", url)).await.unwrap();
        assert_eq!(request.status, RequestStatus::Queued);
        assert_eq!(request.url, url);
        assert_eq!(request.selection, Selection::Full);
        assert!(h.wakes.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_submit_full_rejects_foreign_url() {
        let mut h = harness(SubmissionConfig::default());
        let err = h
            .service
            .submit_full(1, 10, "https://example.com/album/1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Validation(ValidationError::UnsupportedUrl { .. })
        ));
        assert_eq!(h.store.count(&Default::default()).unwrap(), 0);
        assert!(h.wakes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_selection_flow_creates_partial_request() {
        let h = harness(SubmissionConfig::default());
        let url = fixtures::album_url(2);
        h.fetcher
            .set_listing(Some(crate::testing::sample_listing(12)))
            .await;

        let selection = h.service.begin_selection(1, 10, &url).await.unwrap();
        assert_eq!(selection.listing.tracks.len(), 12);
        assert!(selection.expires_at > Utc::now());

        let request = h.service.complete_selection(1, "3, 5,11,3").await.unwrap();
        assert_eq!(request.chat_id, 10);
        assert_eq!(request.selection.descriptor().as_deref(), Some("3,5,11"));
        assert!(h.pending.get(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_selection_rejected_while_pending() {
        let h = harness(SubmissionConfig::default());
        let url = fixtures::album_url(3);
        h.service.begin_selection(1, 10, &url).await.unwrap();

        let err = h.service.begin_selection(1, 10, &url).await.unwrap_err();
        assert!(matches!(err, SubmissionError::SelectionPending { .. }));

        // other users are unaffected
        h.service.begin_selection(2, 20, &url).await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_selection_keeps_pending() {
        let h = harness(SubmissionConfig::default());
        h.service
            .begin_selection(1, 10, &fixtures::album_url(4))
            .await
            .unwrap();

        let err = h.service.complete_selection(1, "2,9").await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Validation(ValidationError::IndexOutOfRange(9))
        ));
        assert!(h.pending.get(1).unwrap().is_some());
        assert_eq!(h.store.count(&Default::default()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_selection_cannot_complete() {
        let h = harness(SubmissionConfig {
            selection_timeout_secs: 0,
            ..Default::default()
        });
        h.service
            .begin_selection(1, 10, &fixtures::album_url(5))
            .await
            .unwrap();

        let err = h.service.complete_selection(1, "1").await.unwrap_err();
        assert!(matches!(err, SubmissionError::NoPendingSelection));
        assert!(h.pending.get(1).unwrap().is_none());

        // and a new one may start right away
        h.service
            .begin_selection(1, 10, &fixtures::album_url(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_purge_expired_selections() {
        let h = harness(SubmissionConfig {
            selection_timeout_secs: 0,
            ..Default::default()
        });
        h.service
            .begin_selection(1, 10, &fixtures::album_url(6))
            .await
            .unwrap();
        assert_eq!(h.service.purge_expired_selections().await.unwrap(), 1);
        assert_eq!(h.service.purge_expired_selections().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_listing_failure_leaves_no_pending() {
        let h = harness(SubmissionConfig::default());
        h.fetcher.set_listing(None).await;

        let err = h
            .service
            .begin_selection(1, 10, &fixtures::album_url(7))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Listing(_)));
        assert!(h.pending.get(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_checks_ownership_and_state() {
        let h = harness(SubmissionConfig::default());
        let request = h
            .service
            .submit_full(1, 10, &fixtures::album_url(8))
            .await
            .unwrap();

        assert!(matches!(
            h.service.cancel(2, request.id).await,
            Err(SubmissionError::NotOwner(_))
        ));
        assert!(matches!(
            h.service.cancel(1, 9999).await,
            Err(SubmissionError::NotFound(9999))
        ));

        let cancelled = h.service.cancel(1, request.id).await.unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert!(h.service.status(1).unwrap().is_empty());

        assert!(matches!(
            h.service.cancel(1, request.id).await,
            Err(SubmissionError::NotCancellable {
                status: RequestStatus::Cancelled,
                ..
            })
        ));
    }

    /// Holds the first two claims on a barrier so both replies race.
    struct RacingPendingStore {
        inner: SqlitePendingSelectionStore,
        barrier: std::sync::Barrier,
        claims: std::sync::atomic::AtomicUsize,
    }

    impl RacingPendingStore {
        fn hold(&self) {
            use std::sync::atomic::Ordering;
            if self.claims.fetch_add(1, Ordering::SeqCst) < 2 {
                self.barrier.wait();
            }
        }
    }

    impl PendingSelectionStore for RacingPendingStore {
        fn get(&self, user_id: i64) -> Result<Option<PendingSelection>, PendingSelectionError> {
            self.inner.get(user_id)
        }

        fn insert_if_absent(
            &self,
            selection: &PendingSelection,
            now: DateTime<Utc>,
        ) -> Result<bool, PendingSelectionError> {
            self.inner.insert_if_absent(selection, now)
        }

        fn take(&self, user_id: i64) -> Result<Option<PendingSelection>, PendingSelectionError> {
            self.hold();
            self.inner.take(user_id)
        }

        fn delete(&self, user_id: i64) -> Result<bool, PendingSelectionError> {
            self.inner.delete(user_id)
        }

        fn purge_expired(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<PendingSelection>, PendingSelectionError> {
            self.inner.purge_expired(now)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_replies_create_one_request() {
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let pending = Arc::new(RacingPendingStore {
            inner: SqlitePendingSelectionStore::in_memory().unwrap(),
            barrier: std::sync::Barrier::new(2),
            claims: std::sync::atomic::AtomicUsize::new(0),
        });
        let (signal, _wakes) = DispatchSignal::channel(8);
        let service = Arc::new(SubmissionService::new(
            &SubmissionConfig::default(),
            store.clone(),
            pending.clone(),
            Arc::new(MockFetcher::new()),
            signal,
            None,
        ));
        service
            .begin_selection(1, 10, &fixtures::album_url(8))
            .await
            .unwrap();

        let first = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.complete_selection(1, "1").await }
        });
        let second = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.complete_selection(1, "2").await }
        });
        let results = [first.await.unwrap(), second.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(SubmissionError::NoPendingSelection))));
        assert_eq!(store.list_active_for_owner(1).unwrap().len(), 1);
        assert!(pending.get(1).unwrap().is_none());
    }
}
