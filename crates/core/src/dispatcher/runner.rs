//! Dispatcher runner: admits queued requests and drives their pipelines.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::config::DispatcherConfig;
use super::notifier::{Notice, NoticeKind};
use super::pipeline::{discard_workspace, PipelineContext, PipelineStages};
use super::types::{DispatcherError, DispatcherStatus, PipelineOutcome};
use crate::audit::{AuditEvent, AuditHandle};
use crate::locator::ArtifactLocator;
use crate::metrics;
use crate::request::{
    Request, RequestFilter, RequestStatus, RequestStore, RequestStoreError, StatusUpdate,
    UpdateOutcome,
};

/// Error stored on records a previous run left in `processing`.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

const PANIC_MESSAGE: &str = "Internal error while processing request";

/// Wakes the dispatcher for a scheduling pass. Cheap to clone.
///
/// Signals are coalesced: waking a dispatcher that already has a pass
/// pending does nothing.
#[derive(Clone)]
pub struct DispatchSignal {
    tx: mpsc::Sender<()>,
}

impl DispatchSignal {
    /// A signal not tied to a dispatcher, with the receiving end.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub fn wake(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("Dispatcher signal channel closed, wake ignored");
            }
        }
    }
}

struct DispatcherShared {
    context: PipelineContext,
    schedule_lock: Mutex<()>,
    in_flight: AtomicUsize,
    /// Pipelines wake whichever drain loop is current when they finish.
    signal: DispatchSignal,
}

/// Decrements the in-flight count when a pipeline task ends, however it ends.
struct InFlightGuard {
    shared: Arc<DispatcherShared>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        metrics::PIPELINES_IN_FLIGHT.dec();
    }
}

/// The request dispatcher - moves queued requests through the pipeline
/// while keeping at most `max_concurrent` of them in processing.
pub struct Dispatcher {
    shared: Arc<DispatcherShared>,

    // Runtime state
    running: Arc<AtomicBool>,
    recovered: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    signal_tx: mpsc::Sender<()>,
    signal_rx: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl Dispatcher {
    /// Create a new dispatcher. Archives are written under `scratch_root`.
    pub fn new(
        config: DispatcherConfig,
        scratch_root: impl Into<PathBuf>,
        store: Arc<dyn RequestStore>,
        stages: PipelineStages,
        audit: Option<AuditHandle>,
    ) -> Result<Self, DispatcherError> {
        config.check().map_err(DispatcherError::Config)?;

        let locator = ArtifactLocator::new(config.locator, config.media_extensions.clone());
        let (shutdown_tx, _) = broadcast::channel(1);
        let (signal_tx, signal_rx) = mpsc::channel(config.signal_buffer);

        let context = PipelineContext {
            store,
            stages,
            locator,
            audit,
            config,
            scratch_root: scratch_root.into(),
        };

        Ok(Self {
            shared: Arc::new(DispatcherShared {
                context,
                schedule_lock: Mutex::new(()),
                in_flight: AtomicUsize::new(0),
                signal: DispatchSignal {
                    tx: signal_tx.clone(),
                },
            }),
            running: Arc::new(AtomicBool::new(false)),
            recovered: AtomicBool::new(false),
            shutdown_tx,
            signal_tx,
            signal_rx: Arc::new(Mutex::new(signal_rx)),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.context.config
    }

    /// A handle that wakes this dispatcher.
    pub fn signal(&self) -> DispatchSignal {
        DispatchSignal {
            tx: self.signal_tx.clone(),
        }
    }

    /// Request a scheduling pass.
    pub fn wake(&self) {
        self.signal().wake();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the dispatcher (spawns the drain loop).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Dispatcher already running");
            return;
        }

        let config = &self.shared.context.config;
        info!(
            "Starting dispatcher (max_concurrent={}, workspace={})",
            config.max_concurrent,
            config.workspace_mode.as_str()
        );

        // Only the first start may treat processing records as abandoned;
        // later restarts could still have detached pipelines running.
        if config.recover_on_start && !self.recovered.swap(true, Ordering::SeqCst) {
            match self.recover_interrupted().await {
                Ok(0) => {}
                Ok(n) => info!("Marked {} interrupted requests as failed", n),
                Err(e) => error!("Failed to recover interrupted requests: {}", e),
            }
        }

        self.spawn_drain_loop();

        info!("Dispatcher started");
    }

    /// Stop admitting work. Running pipelines finish on their own.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Dispatcher not running");
            return;
        }

        info!("Stopping dispatcher");
        let _ = self.shutdown_tx.send(());
        info!("Dispatcher stopped");
    }

    /// Get current dispatcher status.
    pub async fn status(&self) -> DispatcherStatus {
        let context = &self.shared.context;
        let queued = context
            .store
            .count(&RequestFilter::new().with_status(RequestStatus::Queued))
            .unwrap_or(0);
        let processing = context.store.count_processing().unwrap_or(0);

        DispatcherStatus {
            running: self.is_running(),
            in_flight: self.shared.in_flight.load(Ordering::SeqCst),
            max_concurrent: context.config.max_concurrent,
            workspace_mode: context.config.workspace_mode,
            queued,
            processing,
        }
    }

    /// Fail every record left in `processing` and remove its workspace.
    ///
    /// Must only run before this process has admitted anything.
    pub async fn recover_interrupted(&self) -> Result<usize, DispatcherError> {
        let context = &self.shared.context;
        let stale = context.store.list(
            &RequestFilter::new()
                .with_status(RequestStatus::Processing)
                .with_limit(i64::MAX),
        )?;

        let mut recovered = 0;
        for request in stale {
            match context
                .store
                .set_status(request.id, StatusUpdate::failed(INTERRUPTED_MESSAGE))
            {
                Ok(UpdateOutcome::Applied(updated)) => {
                    warn!("Request {} was interrupted by a restart", request.id);
                    recovered += 1;
                    Self::emit(
                        &context.audit,
                        AuditEvent::RequestStatusChanged {
                            request_id: request.id,
                            from_status: RequestStatus::Processing,
                            to_status: RequestStatus::Failed,
                            reason: Some(INTERRUPTED_MESSAGE.to_string()),
                        },
                    )
                    .await;
                    context
                        .stages
                        .notifier
                        .notify(Notice::for_request(
                            &updated,
                            NoticeKind::Failed {
                                error: INTERRUPTED_MESSAGE.to_string(),
                            },
                        ))
                        .await;
                }
                Ok(UpdateOutcome::Skipped(_)) => {}
                Err(e) => warn!("Failed to recover request {}: {}", request.id, e),
            }
            discard_workspace(context, request.id).await;
        }

        Ok(recovered)
    }

    fn spawn_drain_loop(&self) {
        let shared = Arc::clone(&self.shared);
        let signal_rx = Arc::clone(&self.signal_rx);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // A previous loop may still be winding down after a quick restart.
            let mut signal_rx = signal_rx.lock().await;
            let mut pipelines: JoinSet<PipelineOutcome> = JoinSet::new();
            let mut poll = tokio::time::interval(Duration::from_secs(
                shared.context.config.poll_interval_secs,
            ));
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!("Drain loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Drain loop received shutdown signal");
                        break;
                    }
                    signal = signal_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        while signal_rx.try_recv().is_ok() {}
                        Self::run_pass(&shared, &mut pipelines).await;
                    }
                    // The finished task has already woken us for the next pass.
                    Some(joined) = pipelines.join_next() => {
                        match joined {
                            Ok(outcome) => debug!("Pipeline finished: {}", outcome.label()),
                            Err(e) => {
                                error!("Pipeline task aborted: {}", e);
                                shared.signal.wake();
                            }
                        }
                    }
                    _ = poll.tick() => {
                        Self::run_pass(&shared, &mut pipelines).await;
                    }
                }
            }

            if !pipelines.is_empty() {
                info!(
                    "Leaving {} running pipelines to finish in the background",
                    pipelines.len()
                );
                pipelines.detach_all();
            }
            info!("Drain loop stopped");
        });
    }

    /// Admit what fits and spawn a pipeline for each admitted request.
    async fn run_pass(shared: &Arc<DispatcherShared>, pipelines: &mut JoinSet<PipelineOutcome>) {
        let admitted = match shared.admit().await {
            Ok(admitted) => admitted,
            Err(e) => {
                error!("Scheduling pass failed: {}", e);
                return;
            }
        };

        for request in admitted {
            // in_flight was already incremented by admit()
            let guard = InFlightGuard {
                shared: Arc::clone(shared),
            };
            pipelines.spawn(async move {
                let shared = Arc::clone(&guard.shared);
                let request_id = request.id;
                let result = AssertUnwindSafe(shared.context.run(request))
                    .catch_unwind()
                    .await;
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!("Pipeline for request {} panicked", request_id);
                        shared.fail_after_panic(request_id).await
                    }
                };
                drop(guard);
                shared.signal.wake();
                outcome
            });
        }
    }

    async fn emit(audit: &Option<AuditHandle>, event: AuditEvent) {
        if let Some(audit) = audit {
            audit.emit(event).await;
        }
    }
}

impl DispatcherShared {
    /// One scheduling pass.
    ///
    /// Occupancy is the larger of the store's processing count and the
    /// pipelines running here, so neither a slow terminal write nor a record
    /// cancelled mid-fetch lets the ceiling be exceeded.
    async fn admit(&self) -> Result<Vec<Request>, RequestStoreError> {
        let _lock = self.schedule_lock.lock().await;
        let context = &self.context;
        let ceiling = context.config.max_concurrent;

        let processing = context.store.count_processing()?.max(0) as usize;
        let occupied = processing.max(self.in_flight.load(Ordering::SeqCst));
        if occupied >= ceiling {
            debug!("No free slots ({}/{})", occupied, ceiling);
            return Ok(Vec::new());
        }

        let room = ceiling - occupied;
        let queued = context.store.list_queued()?;
        let mut admitted = Vec::with_capacity(room.min(queued.len()));

        for request in queued {
            if admitted.len() >= room {
                break;
            }
            match context.store.set_status(request.id, StatusUpdate::processing()) {
                Ok(UpdateOutcome::Applied(updated)) => {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    metrics::REQUESTS_ADMITTED.inc();
                    metrics::PIPELINES_IN_FLIGHT.inc();
                    info!("Admitted request {} ({})", updated.id, updated.url);
                    Dispatcher::emit(
                        &context.audit,
                        AuditEvent::RequestStatusChanged {
                            request_id: updated.id,
                            from_status: RequestStatus::Queued,
                            to_status: RequestStatus::Processing,
                            reason: None,
                        },
                    )
                    .await;
                    admitted.push(updated);
                }
                Ok(UpdateOutcome::Skipped(_)) | Err(RequestStoreError::InvalidTransition { .. }) => {
                    debug!("Request {} left the queue before admission", request.id);
                }
                Err(e) => {
                    // Already-admitted records must still get their pipelines.
                    warn!("Failed to admit request {}: {}", request.id, e);
                    break;
                }
            }
        }

        Ok(admitted)
    }

    async fn fail_after_panic(&self, request_id: i64) -> PipelineOutcome {
        let context = &self.context;
        let outcome = match context
            .store
            .set_status(request_id, StatusUpdate::failed(PANIC_MESSAGE))
        {
            Ok(UpdateOutcome::Applied(updated)) => {
                context
                    .stages
                    .notifier
                    .notify(Notice::for_request(
                        &updated,
                        NoticeKind::Failed {
                            error: PANIC_MESSAGE.to_string(),
                        },
                    ))
                    .await;
                PipelineOutcome::Failed {
                    error: PANIC_MESSAGE.to_string(),
                }
            }
            Ok(UpdateOutcome::Skipped(_)) => PipelineOutcome::Cancelled,
            Err(e) => {
                error!("Failed to record failure of request {}: {}", request_id, e);
                PipelineOutcome::Failed {
                    error: PANIC_MESSAGE.to_string(),
                }
            }
        };
        discard_workspace(context, request_id).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CreateRequest, Selection, SqliteRequestStore};
    use crate::testing::{MockFetcher, MockPackager, MockPublisher, RecordingNotifier};
    use tempfile::TempDir;

    fn dispatcher(
        store: Arc<SqliteRequestStore>,
        temp: &TempDir,
        max_concurrent: usize,
    ) -> Dispatcher {
        let config = DispatcherConfig {
            max_concurrent,
            work_root: temp.path().join("work"),
            ..Default::default()
        };
        let stages = PipelineStages {
            fetcher: Arc::new(MockFetcher::new()),
            packager: Arc::new(MockPackager::new()),
            publisher: Arc::new(MockPublisher::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        };
        Dispatcher::new(config, temp.path().join("scratch"), store, stages, None).unwrap()
    }

    fn queue(store: &SqliteRequestStore, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| {
                store
                    .create(CreateRequest {
                        user_id: 1,
                        chat_id: 1,
                        url: format!("https://music.apple.com/us/album/x/{}", i),
                        selection: Selection::Full,
                    })
                    .unwrap()
                    .id
            })
            .collect()
    }

    #[tokio::test]
    async fn test_admit_respects_ceiling_and_fifo() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let ids = queue(&store, 4);
        let d = dispatcher(Arc::clone(&store), &temp, 2);

        let admitted = d.shared.admit().await.unwrap();
        let admitted_ids: Vec<i64> = admitted.iter().map(|r| r.id).collect();
        assert_eq!(admitted_ids, ids[..2].to_vec());
        assert_eq!(store.count_processing().unwrap(), 2);

        // no room left
        assert!(d.shared.admit().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admit_counts_stale_processing_records() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let ids = queue(&store, 2);
        store.set_status(ids[0], StatusUpdate::processing()).unwrap();
        let d = dispatcher(Arc::clone(&store), &temp, 1);

        assert!(d.shared.admit().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admit_counts_in_flight_after_cancel() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let ids = queue(&store, 2);
        let d = dispatcher(Arc::clone(&store), &temp, 1);

        assert_eq!(d.shared.admit().await.unwrap().len(), 1);
        // cancelled mid-pipeline: the slot stays taken until the task ends
        store.cancel(ids[0]).unwrap();
        assert_eq!(store.count_processing().unwrap(), 0);
        assert!(d.shared.admit().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_interrupted_marks_failed_and_cleans() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let ids = queue(&store, 2);
        store.set_status(ids[0], StatusUpdate::processing()).unwrap();
        let leftover = temp.path().join("work").join(format!("request-{}", ids[0]));
        std::fs::create_dir_all(leftover.join("Album")).unwrap();

        let d = dispatcher(Arc::clone(&store), &temp, 1);
        assert_eq!(d.recover_interrupted().await.unwrap(), 1);

        let failed = store.get(ids[0]).unwrap().unwrap();
        assert_eq!(failed.status, RequestStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(!leftover.exists());
        assert_eq!(
            store.get(ids[1]).unwrap().unwrap().status,
            RequestStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_status_and_double_start() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let d = dispatcher(store, &temp, 3);

        assert!(!d.status().await.running);
        d.start().await;
        d.start().await;
        let status = d.status().await;
        assert!(status.running);
        assert_eq!(status.max_concurrent, 3);
        d.stop().await;
        assert!(!d.is_running());
    }

    #[test]
    fn test_new_rejects_shared_with_ceiling_above_one() {
        let temp = TempDir::new().unwrap();
        let config = DispatcherConfig {
            max_concurrent: 2,
            workspace_mode: super::super::config::WorkspaceMode::Shared,
            ..Default::default()
        };
        let stages = PipelineStages {
            fetcher: Arc::new(MockFetcher::new()),
            packager: Arc::new(MockPackager::new()),
            publisher: Arc::new(MockPublisher::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        };
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let result = Dispatcher::new(config, temp.path(), store, stages, None);
        assert!(matches!(result, Err(DispatcherError::Config(_))));
    }

    #[tokio::test]
    async fn test_signal_coalesces() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let d = dispatcher(store, &temp, 1);
        let signal = d.signal();
        for _ in 0..200 {
            signal.wake();
        }
        let mut rx = d.signal_rx.lock().await;
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, d.config().signal_buffer);
    }

    #[test]
    fn test_wake_on_closed_channel_is_ignored() {
        let (signal, rx) = DispatchSignal::channel(1);
        drop(rx);
        signal.wake();

        let (signal, mut rx) = DispatchSignal::channel(1);
        signal.wake();
        signal.wake();
        tokio_test::assert_ok!(rx.try_recv());
        tokio_test::assert_err!(rx.try_recv());
    }
}
