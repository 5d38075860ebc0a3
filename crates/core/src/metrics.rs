//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job pipelines (outcomes, durations, stream fallbacks)
//! - Concurrency gate (wait time)
//! - Artifacts (bytes written)
//! - Fanout (per-item results)
//!
//! Collectors are process statics; hosts register them via [`all_metrics`].

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Job Metrics
// =============================================================================

/// Finished pipelines by outcome.
pub static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("genvoy_jobs_total", "Total job pipelines finished"),
        &["outcome"], // "succeeded", "failed", "cancelled", "timed_out"
    )
    .unwrap()
});

/// Pipeline duration in seconds, submission through file write.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("genvoy_job_duration_seconds", "Duration of job pipelines")
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Switches from streaming to polling.
pub static STREAM_FALLBACKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "genvoy_stream_fallbacks_total",
        "Total status stream fallbacks to polling",
    )
    .unwrap()
});

// =============================================================================
// Gate Metrics
// =============================================================================

/// Time spent waiting for a gate permit.
pub static GATE_WAIT: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "genvoy_gate_wait_seconds",
            "Time spent waiting for a concurrency permit",
        )
        .buckets(vec![0.0, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
    )
    .unwrap()
});

// =============================================================================
// Artifact Metrics
// =============================================================================

/// Artifact bytes committed to disk.
pub static ARTIFACT_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "genvoy_artifact_bytes_total",
        "Total artifact bytes written",
    )
    .unwrap()
});

// =============================================================================
// Fanout Metrics
// =============================================================================

/// Fanout items by kind and result.
pub static FANOUT_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("genvoy_fanout_items_total", "Total fanout items finished"),
        &["kind", "result"], // kind: "batch", "compare"; result: "success", "failure"
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Jobs
        Box::new(JOBS_TOTAL.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(STREAM_FALLBACKS.clone()),
        // Gate
        Box::new(GATE_WAIT.clone()),
        // Artifacts
        Box::new(ARTIFACT_BYTES.clone()),
        // Fanout
        Box::new(FANOUT_ITEMS.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }

        JOBS_TOTAL.with_label_values(&["succeeded"]).inc();
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"genvoy_jobs_total".to_string()));
    }
}
