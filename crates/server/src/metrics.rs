//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the relister server:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Batch events forwarded to clients
//! - Orchestrator and pool status (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use relister_core::{JobFilter, JobStatus};

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
            "relister_http_request_duration_seconds",
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
        Opts::new("relister_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "relister_http_requests_in_flight",
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
        "relister_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "relister_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by event type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relister_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// WebSocket lag events (client fell behind and skipped events).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "relister_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Batch Metrics
// =============================================================================

/// Batch events observed by WebSocket clients, by type.
pub static BATCH_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "relister_batch_events_total",
            "Batch events forwarded to WebSocket clients",
        ),
        &["type"], // "progress", "result", "complete"
    )
    .unwrap()
});

/// Jobs by current status (collected dynamically).
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("relister_jobs_by_status", "Current job count by status"),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Orchestrator Metrics (collected dynamically)
// =============================================================================

/// Whether a batch is running (1) or not (0).
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "relister_orchestrator_running",
        "Whether a batch is running (1) or the orchestrator is idle (0)",
    )
    .unwrap()
});

/// Jobs holding a worker slot.
pub static POOL_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("relister_pool_active", "Jobs currently holding a worker slot").unwrap()
});

/// Jobs waiting for a worker slot.
pub static POOL_WAITING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("relister_pool_waiting", "Jobs waiting for a worker slot").unwrap()
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

    // Batches
    registry.register(Box::new(BATCH_EVENTS.clone())).unwrap();
    registry
        .register(Box::new(JOBS_BY_STATUS.clone()))
        .unwrap();

    // Orchestrator
    registry
        .register(Box::new(ORCHESTRATOR_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(POOL_ACTIVE.clone())).unwrap();
    registry.register(Box::new(POOL_WAITING.clone())).unwrap();

    // Core metrics (orchestrator, store, reconciliation)
    for metric in relister_core::metrics::all_metrics() {
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
/// Called before encoding so gauges reflect the orchestrator, the worker
/// pool and the job store at scrape time.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    if let Some(orchestrator) = state.orchestrator() {
        let status = orchestrator.status().await;
        ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });
        let (active, waiting) = status
            .pool
            .map(|pool| (pool.active as i64, pool.waiting as i64))
            .unwrap_or((0, 0));
        POOL_ACTIVE.set(active);
        POOL_WAITING.set(waiting);
    }

    let store = state.store();
    for status in [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Success,
        JobStatus::Failed,
        JobStatus::Terminated,
    ] {
        let filter = JobFilter::new().with_status(status);
        if let Ok(count) = store.count_jobs(&filter) {
            JOBS_BY_STATUS.with_label_values(&[status.as_str()]).set(count);
        }
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let uuid_regex = regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap();
    let numeric_regex = regex_lite::Regex::new(r"/\d+(/|$)").unwrap();

    let result = uuid_regex.replace_all(path, "{id}");
    let result = numeric_regex.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/jobs/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/jobs/{id}");
    }

    #[test]
    fn test_normalize_path_numeric() {
        let path = "/api/v1/jobs/12345";
        assert_eq!(normalize_path(path), "/api/v1/jobs/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
        assert_eq!(
            normalize_path("/api/v1/batches/current"),
            "/api/v1/batches/current"
        );
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("relister_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_all_metrics() {
        // Prometheus only outputs labelled metrics that have been touched
        HTTP_REQUEST_DURATION
            .with_label_values(&["GET", "/test", "200"])
            .observe(0.1);
        HTTP_REQUESTS_IN_FLIGHT.set(0);
        WS_CONNECTIONS_ACTIVE.set(0);
        WS_CONNECTIONS_TOTAL.inc();
        BATCH_EVENTS.with_label_values(&["progress"]).inc();
        JOBS_BY_STATUS.with_label_values(&["queued"]).set(0);
        ORCHESTRATOR_RUNNING.set(0);
        POOL_ACTIVE.set(0);
        relister_core::metrics::CHECKPOINT_WRITES.inc();

        let output = encode_metrics();

        assert!(output.contains("relister_http_request_duration_seconds"));
        assert!(output.contains("relister_http_requests_in_flight"));
        assert!(output.contains("relister_ws_connections_active"));
        assert!(output.contains("relister_ws_connections_total"));
        assert!(output.contains("relister_batch_events_total"));
        assert!(output.contains("relister_jobs_by_status"));
        assert!(output.contains("relister_orchestrator_running"));
        assert!(output.contains("relister_pool_active"));
        assert!(output.contains("relister_checkpoint_writes_total"));
    }
}
