use serde::Serialize;
use thiserror::Error;

use super::retry::RetryError;
use crate::store::StoreError;
use crate::upstream::{FetchError, TorrentListFilter};

/// The run's cancellation token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run cancelled")]
pub struct Cancelled;

/// Run-level failure. Anything not listed here is logged per item and skipped.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Retry(RetryError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("run cancelled")]
    Cancelled,
}

impl From<RetryError> for SyncError {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::Cancelled => SyncError::Cancelled,
            other => SyncError::Retry(other),
        }
    }
}

impl From<Cancelled> for SyncError {
    fn from(_: Cancelled) -> Self {
        SyncError::Cancelled
    }
}

/// Failure while handling one gallery's torrent page.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("gallery {0} is pending an upstream cache refresh")]
    Pending(u64),
}

/// Counts from one import pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Existing galleries left alone by the staleness guard.
    pub unchanged: usize,
    /// Records that could not be turned into a gallery.
    pub invalid: usize,
    /// Records the store rejected.
    pub failed: usize,
}

impl ImportSummary {
    pub fn imported(&self) -> usize {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GallerySyncOptions {
    /// Hours subtracted from the high-water mark. Non-zero forces updates.
    pub offset_hours: i64,
    /// Fetch exactly this many listing pages per sweep instead of stopping
    /// at the high-water mark.
    pub page_limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GallerySyncSummary {
    pub high_water_mark: i64,
    pub listed: usize,
    pub fetched: usize,
    pub import: ImportSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrentSyncOptions {
    /// Fetch exactly this many pages instead of stopping at the last known torrent.
    pub page_limit: Option<u32>,
    pub filter: TorrentListFilter,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TorrentSyncSummary {
    /// Torrents on the listing not yet in the store.
    pub new_torrents: usize,
    /// Distinct galleries those torrents belong to.
    pub galleries: usize,
    /// Galleries that had to be imported first.
    pub missing_galleries: usize,
    pub import: ImportSummary,
    pub processed: usize,
    pub removed: usize,
    pub failed: usize,
    pub torrents_saved: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncOptions {
    /// Window, in hours before now, of galleries to refresh.
    pub hours: u32,
}

/// Outcome of a resync or manual fetch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub selected: usize,
    /// Caller inputs that did not contain a gallery identifier.
    pub invalid_inputs: usize,
    pub fetched: usize,
    pub import: ImportSummary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillSummary {
    pub total: usize,
    pub resolved: usize,
    pub removed: usize,
    pub failed: usize,
    pub torrents_saved: usize,
}
