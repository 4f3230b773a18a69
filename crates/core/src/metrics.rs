//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Governors (time spent waiting for rate slots or bandwidth)
//! - Fetching (attempts, retries, bytes downloaded)
//! - Ingestion (records processed by outcome)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

// =============================================================================
// Governors
// =============================================================================

/// Time callers were suspended by a governor.
pub static GOVERNOR_WAIT_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "harvest_governor_wait_seconds",
            "Time spent waiting on a governor before a request",
        )
        .buckets(vec![0.01, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 60.0]),
        &["governor"], // "rate", "bandwidth"
    )
    .unwrap()
});

// =============================================================================
// Fetching
// =============================================================================

/// HTTP attempts by kind and result.
pub static FETCH_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvest_fetch_attempts_total", "Total HTTP attempts"),
        // kind: "metadata", "download"
        // result: "success", "rate_limited", "server_error", "network_error", "fatal"
        &["kind", "result"],
    )
    .unwrap()
});

/// Retries scheduled, by reason.
pub static FETCH_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvest_fetch_retries_total", "Total retries scheduled"),
        &["reason"],
    )
    .unwrap()
});

/// Bytes received by successful downloads.
pub static BYTES_DOWNLOADED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("harvest_bytes_downloaded_total", "Total bytes downloaded").unwrap()
});

// =============================================================================
// Ingestion
// =============================================================================

/// Records processed by outcome.
pub static RECORDS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvest_records_processed_total", "Total records processed"),
        &["outcome"], // "uploaded", "skipped", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(GOVERNOR_WAIT_SECONDS.clone()),
        Box::new(FETCH_ATTEMPTS.clone()),
        Box::new(FETCH_RETRIES.clone()),
        Box::new(BYTES_DOWNLOADED.clone()),
        Box::new(RECORDS_PROCESSED.clone()),
    ]
}

/// Register every core metric in `registry`.
pub fn register_metrics(registry: &Registry) -> prometheus::Result<()> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_once() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();
        assert!(register_metrics(&registry).is_err());
    }

    #[test]
    fn test_registered_metrics_are_gathered() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();
        RECORDS_PROCESSED.with_label_values(&["uploaded"]).inc();

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"harvest_records_processed_total".to_string()));
    }
}
