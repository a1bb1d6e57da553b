//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (batches, job outcomes, stage attempts and durations)
//! - Job store (checkpoint writes)
//! - Reconciliation (variants and warnings)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Batches started, by origin.
pub static BATCHES_STARTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relister_batches_started_total", "Total batches started"),
        &["origin"], // "submitted", "recovered"
    )
    .unwrap()
});

/// Jobs finished, by result status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relister_jobs_finished_total", "Total jobs that produced a result"),
        &["status"], // "success", "error", "terminated"
    )
    .unwrap()
});

/// Stage duration in seconds (successful attempts only).
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "relister_stage_duration_seconds",
            "Duration of a successful stage attempt",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["stage"],
    )
    .unwrap()
});

/// Stage retries, by stage and error kind.
pub static STAGE_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relister_stage_retries_total", "Total stage retries"),
        &["stage", "kind"],
    )
    .unwrap()
});

/// Stage failures that ended a job, by stage and error kind.
pub static STAGE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("relister_stage_failures_total", "Total job-ending stage failures"),
        &["stage", "kind"],
    )
    .unwrap()
});

/// Submissions skipped because the listing already existed.
pub static SUBMITS_DEDUPLICATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "relister_submits_deduplicated_total",
        "Resumed submissions resolved by finding an existing listing",
    )
    .unwrap()
});

// =============================================================================
// Store Metrics
// =============================================================================

/// Checkpoints written.
pub static CHECKPOINT_WRITES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "relister_checkpoint_writes_total",
        "Total checkpoints persisted",
    )
    .unwrap()
});

// =============================================================================
// Reconciliation Metrics
// =============================================================================

/// Variants per reconciled product.
pub static VARIANTS_RECONCILED: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "relister_variants_reconciled",
            "Number of variants per reconciled product",
        )
        .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        &[],
    )
    .unwrap()
});

/// Reconciliation warnings, by kind.
pub static RECONCILE_WARNINGS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "relister_reconcile_warnings_total",
            "Non-fatal reconciliation warnings",
        ),
        &["kind"], // "unmatched_values", "shape_mismatch", "missing_stock"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(BATCHES_STARTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(STAGE_RETRIES.clone()),
        Box::new(STAGE_FAILURES.clone()),
        Box::new(SUBMITS_DEDUPLICATED.clone()),
        // Store
        Box::new(CHECKPOINT_WRITES.clone()),
        // Reconciliation
        Box::new(VARIANTS_RECONCILED.clone()),
        Box::new(RECONCILE_WARNINGS.clone()),
    ]
}
