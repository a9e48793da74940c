//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Scanner (claims, dispatch queue depth)
//! - Workers (busy workers, outcomes, conversion time)
//! - Status propagation (store and cache write failures)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Scanner
// =============================================================================

/// Tasks successfully claimed by the scanner.
pub static TASKS_CLAIMED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("convertd_tasks_claimed_total", "Total tasks claimed").unwrap()
});

/// Claimed tasks waiting in the dispatch queue.
pub static DISPATCH_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "convertd_dispatch_queue_depth",
        "Claimed tasks waiting for a worker",
    )
    .unwrap()
});

// =============================================================================
// Workers
// =============================================================================

/// Workers currently executing a task.
pub static BUSY_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("convertd_busy_workers", "Workers currently executing a task").unwrap()
});

/// Terminal outcomes written by workers.
pub static TASKS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("convertd_tasks_finished_total", "Total tasks finished"),
        &["outcome"], // "completed", "failed", "canceled"
    )
    .unwrap()
});

/// Time spent in the converter.
pub static CONVERSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "convertd_conversion_duration_seconds",
            "Duration of conversions",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
        &["outcome"],
    )
    .unwrap()
});

// =============================================================================
// Status propagation
// =============================================================================

/// Task store writes that failed and were dropped.
pub static STORE_WRITE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "convertd_store_write_failures_total",
            "Task store writes that failed",
        ),
        &["operation"], // "progress", "transition", "claim", "metadata"
    )
    .unwrap()
});

/// Fast cache writes that failed and were dropped.
pub static CACHE_WRITE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "convertd_cache_write_failures_total",
        "Fast cache writes that failed",
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASKS_CLAIMED.clone()),
        Box::new(DISPATCH_QUEUE_DEPTH.clone()),
        Box::new(BUSY_WORKERS.clone()),
        Box::new(TASKS_FINISHED.clone()),
        Box::new(CONVERSION_DURATION.clone()),
        Box::new(STORE_WRITE_FAILURES.clone()),
        Box::new(CACHE_WRITE_FAILURES.clone()),
    ]
}
