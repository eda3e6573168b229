//! Prometheus metrics for the crawler.
//!
//! This module provides metrics for:
//! - Upstream requests (by endpoint and outcome)
//! - Retries and ban suspensions
//! - Import results and saved torrents
//! - Workflow run durations

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Upstream
// =============================================================================

/// Upstream requests by endpoint and outcome.
pub static UPSTREAM_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ehdb_upstream_requests_total", "Total upstream requests"),
        &["endpoint", "outcome"], // outcome: "ok", "banned", "status", "error"
    )
    .unwrap()
});

/// Failed attempts that were retried or gave up, by operation.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ehdb_retry_attempts_total", "Failed attempts seen by the retry loop"),
        &["operation"],
    )
    .unwrap()
});

/// Suspensions caused by an upstream IP ban.
pub static BAN_WAITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ehdb_ban_waits_total", "Times the crawler waited out an IP ban").unwrap()
});

/// Seconds spent waiting out IP bans.
pub static BAN_WAIT_SECONDS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ehdb_ban_wait_seconds_total",
        "Total seconds spent waiting out IP bans",
    )
    .unwrap()
});

// =============================================================================
// Import
// =============================================================================

/// Galleries written, by operation ("insert", "update").
pub static GALLERIES_IMPORTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ehdb_galleries_imported_total", "Galleries written to the store"),
        &["operation"],
    )
    .unwrap()
});

/// Records not written, by reason ("unchanged", "invalid", "store_error", "upstream_error").
pub static IMPORT_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ehdb_import_skipped_total", "Metadata records not written"),
        &["reason"],
    )
    .unwrap()
});

/// Metadata batches dropped after exhausting retries.
pub static BATCHES_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ehdb_metadata_batches_dropped_total",
        "Metadata batches dropped after exhausting retries",
    )
    .unwrap()
});

/// New torrents saved.
pub static TORRENTS_SAVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ehdb_torrents_saved_total", "Torrents saved to the store").unwrap()
});

// =============================================================================
// Workflows
// =============================================================================

/// Workflow run duration by workflow and result.
pub static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("ehdb_run_duration_seconds", "Duration of workflow runs")
            .buckets(vec![1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 10800.0]),
        &["workflow", "result"], // result: "ok", "error", "cancelled"
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Upstream
        Box::new(UPSTREAM_REQUESTS.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(BAN_WAITS.clone()),
        Box::new(BAN_WAIT_SECONDS.clone()),
        // Import
        Box::new(GALLERIES_IMPORTED.clone()),
        Box::new(IMPORT_SKIPPED.clone()),
        Box::new(BATCHES_DROPPED.clone()),
        Box::new(TORRENTS_SAVED.clone()),
        // Workflows
        Box::new(RUN_DURATION.clone()),
    ]
}
