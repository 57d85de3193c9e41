//! The per-request pipeline: fetch, locate, package, publish, clean up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::config::DispatcherConfig;
use super::notifier::{Notice, NoticeKind, Notifier};
use super::types::{PipelineError, PipelineOutcome};
use super::workspace::Workspace;
use crate::audit::{AuditEvent, AuditHandle};
use crate::fetcher::{FetchError, Fetcher};
use crate::locator::ArtifactLocator;
use crate::metrics;
use crate::packager::Packager;
use crate::publisher::Publisher;
use crate::request::{Request, RequestStatus, RequestStore, StatusUpdate, UpdateOutcome};

/// The external stages a pipeline drives.
#[derive(Clone)]
pub struct PipelineStages {
    pub fetcher: Arc<dyn Fetcher>,
    pub packager: Arc<dyn Packager>,
    pub publisher: Arc<dyn Publisher>,
    pub notifier: Arc<dyn Notifier>,
}

/// Everything a running pipeline needs. Shared by all pipelines.
pub(crate) struct PipelineContext {
    pub(crate) store: Arc<dyn RequestStore>,
    pub(crate) stages: PipelineStages,
    pub(crate) locator: ArtifactLocator,
    pub(crate) audit: Option<AuditHandle>,
    pub(crate) config: DispatcherConfig,
    pub(crate) scratch_root: PathBuf,
}

impl PipelineContext {
    pub(crate) fn workspace(&self, request_id: i64) -> Workspace {
        Workspace::for_request(
            self.config.workspace_mode,
            &self.config.work_root,
            &self.scratch_root,
            request_id,
        )
    }

    /// Run the pipeline for a request that has already been moved to
    /// `processing`. Never returns an error: every failure ends up on the
    /// record, in the notification and in the logs.
    pub(crate) async fn run(&self, request: Request) -> PipelineOutcome {
        let workspace = self.workspace(request.id);
        info!(
            "Starting pipeline for request {} ({} download of {})",
            request.id,
            request.selection.kind(),
            request.url
        );
        self.notify(&request, NoticeKind::Started).await;

        let outcome = match self.execute(&request, &workspace).await {
            Ok((artifact, url)) => self.finish_completed(&request, artifact, url).await,
            Err(PipelineError::Cancelled(id)) => {
                info!("Request {} was cancelled, stopping pipeline", id);
                PipelineOutcome::Cancelled
            }
            Err(e) => self.finish_failed(&request, e).await,
        };

        self.cleanup(&workspace).await;
        metrics::PIPELINES_FINISHED
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    async fn execute(
        &self,
        request: &Request,
        workspace: &Workspace,
    ) -> Result<(PathBuf, String), PipelineError> {
        workspace
            .prepare()
            .await
            .map_err(|(path, source)| PipelineError::Workspace { path, source })?;

        // Fetch
        self.notify(request, stage_notice("Downloading")).await;
        self.emit(AuditEvent::FetchStarted {
            request_id: request.id,
            mode: request.selection.kind().to_string(),
            workdir: workspace.workdir.display().to_string(),
        })
        .await;
        let start = Instant::now();
        let fetched = self
            .stages
            .fetcher
            .fetch(&request.url, &request.selection, &workspace.workdir)
            .await;
        observe_stage("fetch", start);
        match fetched {
            Ok(()) => {
                self.emit(AuditEvent::FetchCompleted {
                    request_id: request.id,
                    duration_ms: start.elapsed().as_millis() as u64,
                })
                .await;
            }
            Err(e) => {
                let exit_code = match &e {
                    FetchError::Failed { exit_code, .. } => *exit_code,
                    _ => None,
                };
                self.emit(AuditEvent::FetchFailed {
                    request_id: request.id,
                    error: e.to_string(),
                    exit_code,
                })
                .await;
                return Err(e.into());
            }
        }
        self.ensure_not_cancelled(request.id)?;

        // Locate
        let start = Instant::now();
        let locator = self.locator.clone();
        let workdir = workspace.workdir.clone();
        let artifact = tokio::task::spawn_blocking(move || locator.locate(&workdir))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;
        observe_stage("locate", start);
        debug!("Request {} artifact at {}", request.id, artifact.display());
        self.emit(AuditEvent::ArtifactLocated {
            request_id: request.id,
            path: artifact.display().to_string(),
        })
        .await;

        // Package
        self.notify(request, stage_notice("Creating archive")).await;
        let start = Instant::now();
        let archive = self
            .stages
            .packager
            .package(&artifact, &workspace.archive_dir)
            .await?;
        observe_stage("package", start);
        metrics::ARCHIVE_SIZE
            .with_label_values(&[])
            .observe(archive.size_bytes as f64);
        self.emit(AuditEvent::ArchiveCreated {
            request_id: request.id,
            archive_path: archive.path.display().to_string(),
            size_bytes: archive.size_bytes,
        })
        .await;
        self.ensure_not_cancelled(request.id)?;

        // Publish
        self.notify(request, stage_notice("Uploading")).await;
        let start = Instant::now();
        let url = self.stages.publisher.publish(&archive.path).await?;
        observe_stage("publish", start);
        self.emit(AuditEvent::ArchivePublished {
            request_id: request.id,
            url: url.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
        .await;

        Ok((artifact, url))
    }

    async fn finish_completed(
        &self,
        request: &Request,
        artifact: PathBuf,
        url: String,
    ) -> PipelineOutcome {
        let update = StatusUpdate::completed(artifact, url.clone());
        match self.store.set_status(request.id, update) {
            Ok(UpdateOutcome::Applied(updated)) => {
                info!("Request {} completed: {}", request.id, url);
                self.status_changed(request.id, RequestStatus::Completed, None)
                    .await;
                self.notify(&updated, NoticeKind::Completed { url: url.clone() })
                    .await;
                PipelineOutcome::Completed { url }
            }
            Ok(UpdateOutcome::Skipped(current)) => {
                info!(
                    "Request {} is already {}, discarding published link",
                    request.id, current.status
                );
                PipelineOutcome::Cancelled
            }
            Err(e) => {
                error!("Failed to record completion of request {}: {}", request.id, e);
                metrics::PIPELINE_FAILURES
                    .with_label_values(&["storage"])
                    .inc();
                let error = PipelineError::from(e).summary();
                self.notify(request, NoticeKind::Failed { error: error.clone() })
                    .await;
                PipelineOutcome::Failed { error }
            }
        }
    }

    async fn finish_failed(&self, request: &Request, err: PipelineError) -> PipelineOutcome {
        let summary = err.summary();
        warn!("Request {} failed at {}: {}", request.id, err.stage(), err);
        metrics::PIPELINE_FAILURES
            .with_label_values(&[err.stage()])
            .inc();

        match self
            .store
            .set_status(request.id, StatusUpdate::failed(summary.clone()))
        {
            Ok(UpdateOutcome::Applied(updated)) => {
                self.status_changed(request.id, RequestStatus::Failed, Some(summary.clone()))
                    .await;
                self.notify(&updated, NoticeKind::Failed {
                    error: summary.clone(),
                })
                .await;
                PipelineOutcome::Failed { error: summary }
            }
            Ok(UpdateOutcome::Skipped(current)) => {
                debug!(
                    "Request {} is already {}, not recording failure",
                    request.id, current.status
                );
                PipelineOutcome::Cancelled
            }
            Err(e) => {
                error!("Failed to record failure of request {}: {}", request.id, e);
                self.notify(request, NoticeKind::Failed {
                    error: summary.clone(),
                })
                .await;
                PipelineOutcome::Failed { error: summary }
            }
        }
    }

    /// Remove the workspace. Problems are logged, never propagated.
    pub(crate) async fn cleanup(&self, workspace: &Workspace) {
        for (path, e) in workspace.cleanup().await {
            warn!(
                "Failed to clean up {} for request {}: {}",
                path.display(),
                workspace.request_id,
                e
            );
            metrics::CLEANUP_FAILURES.inc();
            self.emit(AuditEvent::CleanupFailed {
                request_id: workspace.request_id,
                path: path.display().to_string(),
                error: e.to_string(),
            })
            .await;
        }
    }

    fn ensure_not_cancelled(&self, request_id: i64) -> Result<(), PipelineError> {
        match self.store.get(request_id)? {
            Some(current) if current.status == RequestStatus::Cancelled => {
                Err(PipelineError::Cancelled(request_id))
            }
            _ => Ok(()),
        }
    }

    async fn status_changed(&self, request_id: i64, to: RequestStatus, reason: Option<String>) {
        self.emit(AuditEvent::RequestStatusChanged {
            request_id,
            from_status: RequestStatus::Processing,
            to_status: to,
            reason,
        })
        .await;
    }

    async fn notify(&self, request: &Request, kind: NoticeKind) {
        self.stages
            .notifier
            .notify(Notice::for_request(request, kind))
            .await;
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

fn stage_notice(stage: &str) -> NoticeKind {
    NoticeKind::Stage {
        stage: stage.to_string(),
    }
}

fn observe_stage(stage: &str, start: Instant) {
    metrics::STAGE_DURATION
        .with_label_values(&[stage])
        .observe(start.elapsed().as_secs_f64());
}

/// Remove the workspace of a request that will never run again.
pub(crate) async fn discard_workspace(context: &PipelineContext, request_id: i64) {
    let workspace = context.workspace(request_id);
    if workspace.workdir.exists() || workspace.archive_dir.exists() {
        debug!(
            "Removing leftover workspace {} for request {}",
            workspace.workdir.display(),
            request_id
        );
    }
    context.cleanup(&workspace).await;
}
