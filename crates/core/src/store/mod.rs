//! Local catalog store.
//!
//! The crawler only talks to the store through [`GalleryStore`]; the SQLite
//! implementation is the one used in production and in tests.

mod sqlite;
mod types;

pub use sqlite::SqliteGalleryStore;
pub use types::*;

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Gallery not found: {0}")]
    NotFound(u64),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Trait for catalog storage.
///
/// Every method is a single auto-committed statement unless stated otherwise.
pub trait GalleryStore: Send + Sync {
    /// Highest `posted` among galleries not imported through the torrent listing.
    fn last_posted(&self) -> Result<Option<i64>, StoreError>;

    /// Stored `posted` values for the given gids; unknown gids are absent.
    fn posted_for(&self, gids: &[u64]) -> Result<HashMap<u64, i64>, StoreError>;

    fn insert_gallery(&self, record: &GalleryRecord) -> Result<(), StoreError>;

    /// Overwrite an existing gallery. Clears the `by_torrent` flag.
    fn update_gallery(&self, record: &GalleryRecord) -> Result<(), StoreError>;

    /// Rebuild the category and tag aggregates in one transaction.
    fn refresh_stats(&self) -> Result<(), StoreError>;

    /// Galleries with `posted >= since`, ordered by gid.
    fn galleries_posted_since(&self, since: i64) -> Result<Vec<GalleryRef>, StoreError>;

    /// Galleries whose root has never been resolved and that are not removed.
    fn unresolved_galleries(&self) -> Result<Vec<PendingGallery>, StoreError>;

    /// Subset of `gids` already present in the store.
    fn existing_gids(&self, gids: &[u64]) -> Result<HashSet<u64>, StoreError>;

    fn mark_by_torrent(&self, gids: &[u64]) -> Result<u64, StoreError>;

    fn mark_removed(&self, gid: u64) -> Result<(), StoreError>;

    /// Set the root of a gallery, returning the previous root.
    fn set_root_gid(&self, gid: u64, root_gid: u64) -> Result<Option<u64>, StoreError>;

    /// Recompute `replaced` for the group keyed by `COALESCE(root_gid, gid) = group`.
    fn mark_replaced_group(&self, group: u64) -> Result<u64, StoreError>;

    /// Recompute `replaced` for every group.
    fn mark_replaced_all(&self) -> Result<u64, StoreError>;

    fn last_torrent_id(&self) -> Result<Option<u64>, StoreError>;

    /// Subset of torrent ids already present in the store.
    fn known_torrent_ids(&self, ids: &[u64]) -> Result<HashSet<u64>, StoreError>;

    /// Content hashes already recorded for a root group.
    fn torrent_hashes(&self, root_gid: u64) -> Result<HashSet<String>, StoreError>;

    /// Insert or update a torrent keyed by `(id, root_gid)`.
    fn upsert_torrent(&self, root_gid: u64, torrent: &TorrentRecord) -> Result<(), StoreError>;

    fn get_gallery(&self, gid: u64) -> Result<Option<Gallery>, StoreError>;

    fn torrents_for_group(&self, root_gid: u64) -> Result<Vec<TorrentRecord>, StoreError>;

    fn category_stats(&self) -> Result<Vec<CategoryStat>, StoreError>;
}
