//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the cadenza server:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Request counts by status and dispatcher occupancy (collected dynamically)
//!
//! Pipeline and submission counters live in `cadenza_core::metrics` and are
//! registered here as well.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};

use cadenza_core::{RequestFilter, RequestStatus};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "cadenza_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cadenza_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "cadenza_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "cadenza_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cadenza_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cadenza_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// WebSocket lag events (when client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cadenza_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Request Store Metrics (collected dynamically)
// =============================================================================

/// Requests by current status.
pub static REQUESTS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("cadenza_requests_by_status", "Current request count by status"),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Dispatcher Metrics (collected dynamically)
// =============================================================================

/// Dispatcher running state (1 = running, 0 = stopped).
pub static DISPATCHER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "cadenza_dispatcher_running",
        "Whether the dispatcher is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Concurrency ceiling of the dispatcher.
pub static DISPATCHER_MAX_CONCURRENT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "cadenza_dispatcher_max_concurrent",
        "Configured ceiling on concurrently processing requests",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // Requests
    registry
        .register(Box::new(REQUESTS_BY_STATUS.clone()))
        .unwrap();

    // Dispatcher
    registry
        .register(Box::new(DISPATCHER_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(DISPATCHER_MAX_CONCURRENT.clone()))
        .unwrap();

    // Core metrics (submission, dispatcher, pipeline stages)
    for metric in cadenza_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the store and the
/// dispatcher at scrape time.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.dispatcher().status().await;
    DISPATCHER_RUNNING.set(if status.running { 1 } else { 0 });
    DISPATCHER_MAX_CONCURRENT.set(status.max_concurrent as i64);

    let store = state.request_store();
    for request_status in RequestStatus::all() {
        let filter = RequestFilter::new().with_status(request_status);
        if let Ok(count) = store.count(&filter) {
            REQUESTS_BY_STATUS
                .with_label_values(&[request_status.as_str()])
                .set(count);
        }
    }
}

static NUMERIC_SEGMENT: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace numeric IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    // Run twice: adjacent ids share the separating slash.
    let once = NUMERIC_SEGMENT.replace_all(path, "/{id}$1");
    NUMERIC_SEGMENT.replace_all(&once, "/{id}$1").to_string()
}
