//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Unit execution (outcomes, converter duration)
//! - Job completion and result aggregation
//! - The completion barrier (ignored notifications)

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Unit Metrics
// =============================================================================

/// Units reaching a terminal status, by status and origin.
pub static UNITS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("docbatch_units_total", "Units reaching a terminal status"),
        &["status"], // "completed", "failed", "rejected" (classified invalid)
    )
    .unwrap()
});

/// Converter run time per unit.
pub static UNIT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "docbatch_unit_duration_seconds",
            "Duration of a single unit conversion",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["result"], // "success", "failure", "timeout"
    )
    .unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs reaching a terminal status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("docbatch_jobs_finished_total", "Jobs reaching a terminal status"),
        &["status"],
    )
    .unwrap()
});

/// Time spent building result archives.
pub static AGGREGATION_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "docbatch_aggregation_duration_seconds",
            "Duration of result aggregation",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
    )
    .unwrap()
});

// =============================================================================
// Barrier Metrics
// =============================================================================

/// Notifications the completion barrier discarded (duplicate, foreign or
/// unregistered unit).
pub static BARRIER_IGNORED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "docbatch_barrier_ignored_total",
        "Completion notifications ignored by the barrier",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(UNITS_TOTAL.clone()),
        Box::new(UNIT_DURATION.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(AGGREGATION_DURATION.clone()),
        Box::new(BARRIER_IGNORED.clone()),
    ]
}
