//! Crawl and synchronization engine.
//!
//! Workflows (gallery sync, torrent sync, resync, manual fetch, torrent
//! backfill) are built from the same pieces: a retry loop around every
//! upstream call, a pager for newest-first listings, a metadata batcher, the
//! importer and the version consolidator.

mod backfill;
mod batcher;
mod consolidate;
mod fetch;
mod gallery_sync;
mod importer;
mod normalize;
mod pager;
mod resync;
pub mod retry;
mod torrent_pages;
mod torrent_sync;
mod types;

pub use backfill::TorrentBackfill;
pub use batcher::{MetadataBatcher, METADATA_BATCH_SIZE};
pub use consolidate::VersionConsolidator;
pub use fetch::{parse_gallery_refs, ManualFetch};
pub use gallery_sync::GallerySync;
pub use importer::{to_record, Importer};
pub use normalize::{normalize_tag, normalize_tags};
pub use pager::{ListPager, ListingItem, PageCursor};
pub use resync::Resync;
pub use retry::{parse_ban_duration, pause, retry, retry_void, RetryError, RetryPolicy};
pub use torrent_pages::TorrentPageOutcome;
pub use torrent_sync::TorrentSync;
pub use types::*;

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::CrawlerConfig;
use crate::metrics;

/// Pacing and retry settings shared by all workflows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub retry: RetryPolicy,
    /// Between listing pages.
    pub page_delay: Duration,
    /// Between metadata batches.
    pub api_delay: Duration,
    /// Between torrent pages during torrent sync.
    pub torrent_delay: Duration,
    /// Between galleries during the backfill.
    pub backfill_delay: Duration,
    /// How long a gallery may stay "not found" upstream before it counts as removed.
    pub pending_grace: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            retry: RetryPolicy::new(config.retry_times, config.wait_for_ip_unban),
            page_delay: Duration::from_secs(config.page_delay_secs),
            api_delay: Duration::from_secs(config.api_delay_secs),
            torrent_delay: Duration::from_secs(config.torrent_delay_secs),
            backfill_delay: Duration::from_secs(config.backfill_delay_secs),
            pending_grace: Duration::from_secs(u64::from(config.pending_grace_days) * 86_400),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&CrawlerConfig::default())
    }
}

/// Log the end of a workflow run and record its duration.
pub(crate) fn finish_run<T>(workflow: &str, started: Instant, result: &Result<T, SyncError>) {
    let elapsed = started.elapsed();
    let outcome = match result {
        Ok(_) => {
            info!(workflow = workflow, elapsed_secs = elapsed.as_secs(), "Run finished");
            "ok"
        }
        Err(SyncError::Cancelled) => {
            warn!(workflow = workflow, elapsed_secs = elapsed.as_secs(), "Run cancelled");
            "cancelled"
        }
        Err(e) => {
            error!(workflow = workflow, error = %e, "Run failed");
            "error"
        }
    };
    metrics::RUN_DURATION
        .with_label_values(&[workflow, outcome])
        .observe(elapsed.as_secs_f64());
}
