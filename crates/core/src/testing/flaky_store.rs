//! Fault-injecting store wrapper for testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::store::{
    CategoryStat, Gallery, GalleryRecord, GalleryRef, GalleryStore, PendingGallery, StoreError,
    TorrentRecord,
};

/// Wraps a real store and fails selected operations on demand.
///
/// # Example
///
/// ```rust,ignore
/// let inner = Arc::new(SqliteGalleryStore::in_memory()?);
/// let store = FlakyStore::new(inner.clone());
/// store.fail_writes_for(13);
/// // inserting or updating gid 13 now fails, everything else goes through
/// ```
pub struct FlakyStore {
    inner: Arc<dyn GalleryStore>,
    failing_gids: Mutex<HashSet<u64>>,
    fail_posted_lookup: AtomicBool,
    fail_stats_refresh: AtomicBool,
    fail_hash_lookup: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn GalleryStore>) -> Self {
        Self {
            inner,
            failing_gids: Mutex::new(HashSet::new()),
            fail_posted_lookup: AtomicBool::new(false),
            fail_stats_refresh: AtomicBool::new(false),
            fail_hash_lookup: AtomicBool::new(false),
        }
    }

    /// Make gallery writes and torrent saves for `gid` fail.
    pub fn fail_writes_for(&self, gid: u64) {
        self.failing_gids.lock().unwrap().insert(gid);
    }

    pub fn fail_posted_lookup(&self, fail: bool) {
        self.fail_posted_lookup.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stats_refresh(&self, fail: bool) {
        self.fail_stats_refresh.store(fail, Ordering::SeqCst);
    }

    pub fn fail_hash_lookup(&self, fail: bool) {
        self.fail_hash_lookup.store(fail, Ordering::SeqCst);
    }

    fn check_gid(&self, gid: u64) -> Result<(), StoreError> {
        if self.failing_gids.lock().unwrap().contains(&gid) {
            return Err(StoreError::Database(format!("injected failure for {}", gid)));
        }
        Ok(())
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Database(format!("injected {} failure", what)));
        }
        Ok(())
    }
}

impl GalleryStore for FlakyStore {
    fn last_posted(&self) -> Result<Option<i64>, StoreError> {
        Self::check(&self.fail_posted_lookup, "last posted")?;
        self.inner.last_posted()
    }

    fn posted_for(&self, gids: &[u64]) -> Result<HashMap<u64, i64>, StoreError> {
        Self::check(&self.fail_posted_lookup, "posted lookup")?;
        self.inner.posted_for(gids)
    }

    fn insert_gallery(&self, record: &GalleryRecord) -> Result<(), StoreError> {
        self.check_gid(record.gid)?;
        self.inner.insert_gallery(record)
    }

    fn update_gallery(&self, record: &GalleryRecord) -> Result<(), StoreError> {
        self.check_gid(record.gid)?;
        self.inner.update_gallery(record)
    }

    fn refresh_stats(&self) -> Result<(), StoreError> {
        Self::check(&self.fail_stats_refresh, "stats refresh")?;
        self.inner.refresh_stats()
    }

    fn galleries_posted_since(&self, since: i64) -> Result<Vec<GalleryRef>, StoreError> {
        self.inner.galleries_posted_since(since)
    }

    fn unresolved_galleries(&self) -> Result<Vec<PendingGallery>, StoreError> {
        self.inner.unresolved_galleries()
    }

    fn existing_gids(&self, gids: &[u64]) -> Result<HashSet<u64>, StoreError> {
        self.inner.existing_gids(gids)
    }

    fn mark_by_torrent(&self, gids: &[u64]) -> Result<u64, StoreError> {
        self.inner.mark_by_torrent(gids)
    }

    fn mark_removed(&self, gid: u64) -> Result<(), StoreError> {
        self.check_gid(gid)?;
        self.inner.mark_removed(gid)
    }

    fn set_root_gid(&self, gid: u64, root_gid: u64) -> Result<Option<u64>, StoreError> {
        self.check_gid(gid)?;
        self.inner.set_root_gid(gid, root_gid)
    }

    fn mark_replaced_group(&self, group: u64) -> Result<u64, StoreError> {
        self.inner.mark_replaced_group(group)
    }

    fn mark_replaced_all(&self) -> Result<u64, StoreError> {
        self.inner.mark_replaced_all()
    }

    fn last_torrent_id(&self) -> Result<Option<u64>, StoreError> {
        self.inner.last_torrent_id()
    }

    fn known_torrent_ids(&self, ids: &[u64]) -> Result<HashSet<u64>, StoreError> {
        self.inner.known_torrent_ids(ids)
    }

    fn torrent_hashes(&self, root_gid: u64) -> Result<HashSet<String>, StoreError> {
        Self::check(&self.fail_hash_lookup, "hash lookup")?;
        self.inner.torrent_hashes(root_gid)
    }

    fn upsert_torrent(&self, root_gid: u64, torrent: &TorrentRecord) -> Result<(), StoreError> {
        self.check_gid(root_gid)?;
        self.inner.upsert_torrent(root_gid, torrent)
    }

    fn get_gallery(&self, gid: u64) -> Result<Option<Gallery>, StoreError> {
        self.inner.get_gallery(gid)
    }

    fn torrents_for_group(&self, root_gid: u64) -> Result<Vec<TorrentRecord>, StoreError> {
        self.inner.torrents_for_group(root_gid)
    }

    fn category_stats(&self) -> Result<Vec<CategoryStat>, StoreError> {
        self.inner.category_stats()
    }
}
