//! Prometheus metrics for core components.
//!
//! Covers submissions, dispatcher admission and the per-stage behaviour of
//! request pipelines. The server registers [`all_metrics`] on its registry.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Submission
// =============================================================================

/// Requests accepted into the queue, by mode.
pub static REQUESTS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cadenza_requests_submitted_total",
            "Total requests accepted into the queue",
        ),
        &["mode"], // "full", "partial"
    )
    .unwrap()
});

/// Submissions rejected before reaching the store.
pub static SUBMISSIONS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cadenza_submissions_rejected_total",
            "Total submissions rejected by validation",
        ),
        &["reason"], // "invalid_url", "invalid_selection", "selection_pending", "no_selection"
    )
    .unwrap()
});

/// Requests cancelled by their owners.
pub static REQUESTS_CANCELLED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cadenza_requests_cancelled_total",
        "Total requests cancelled by their owner",
    )
    .unwrap()
});

// =============================================================================
// Dispatcher
// =============================================================================

/// Requests moved from queued to processing.
pub static REQUESTS_ADMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cadenza_requests_admitted_total",
        "Total requests admitted into a pipeline",
    )
    .unwrap()
});

/// Pipelines currently running in this process.
pub static PIPELINES_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "cadenza_pipelines_in_flight",
        "Number of pipelines currently running",
    )
    .unwrap()
});

/// Finished pipelines by outcome.
pub static PIPELINES_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cadenza_pipelines_finished_total",
            "Total pipelines finished by outcome",
        ),
        &["outcome"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Pipeline failures by the stage that failed.
pub static PIPELINE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cadenza_pipeline_failures_total",
            "Total pipeline failures by stage",
        ),
        &["stage"], // "workspace", "fetch", "locate", "package", "publish", "storage"
    )
    .unwrap()
});

/// Stage durations in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "cadenza_stage_duration_seconds",
            "Duration of each pipeline stage",
        )
        .buckets(vec![
            0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0,
        ]),
        &["stage"],
    )
    .unwrap()
});

/// Archive sizes in bytes.
pub static ARCHIVE_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("cadenza_archive_size_bytes", "Size of produced archives").buckets(
            vec![1e6, 1e7, 5e7, 1e8, 2.5e8, 5e8, 1e9, 2e9],
        ),
        &[],
    )
    .unwrap()
});

/// Workspace cleanups that failed.
pub static CLEANUP_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cadenza_cleanup_failures_total",
        "Total workspace cleanups that failed",
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Submission
        Box::new(REQUESTS_SUBMITTED.clone()),
        Box::new(SUBMISSIONS_REJECTED.clone()),
        Box::new(REQUESTS_CANCELLED.clone()),
        // Dispatcher
        Box::new(REQUESTS_ADMITTED.clone()),
        Box::new(PIPELINES_IN_FLIGHT.clone()),
        Box::new(PIPELINES_FINISHED.clone()),
        Box::new(PIPELINE_FAILURES.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(ARCHIVE_SIZE.clone()),
        Box::new(CLEANUP_FAILURES.clone()),
    ]
}
