//! Version grouping and torrent deduplication.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::{GalleryStore, StoreError, TorrentRecord};

/// Keeps version groups consistent: one root per group, one live version
/// (the highest gid) per group, and one torrent per content hash per group.
#[derive(Clone)]
pub struct VersionConsolidator {
    store: Arc<dyn GalleryStore>,
}

impl VersionConsolidator {
    pub fn new(store: Arc<dyn GalleryStore>) -> Self {
        Self { store }
    }

    /// Point `gid` at `root_gid`. Returns the previous root.
    pub fn resolve_root(&self, gid: u64, root_gid: u64) -> Result<Option<u64>, StoreError> {
        let previous = self.store.set_root_gid(gid, root_gid)?;
        if previous != Some(root_gid) {
            debug!(gid = gid, root_gid = root_gid, previous = ?previous, "Resolved root");
        }
        Ok(previous)
    }

    /// Recompute the `replaced` flags of one group.
    pub fn mark_group(&self, group: u64) -> Result<u64, StoreError> {
        self.store.mark_replaced_group(group)
    }

    /// Recompute the `replaced` flags of every group.
    pub fn mark_all(&self) -> Result<u64, StoreError> {
        let changed = self.store.mark_replaced_all()?;
        info!(rows = changed, "Recomputed replaced flags");
        Ok(changed)
    }

    /// Save torrents under `root_gid`, skipping hashes the group already has.
    ///
    /// Torrents without a hash (expunged) are always upserted by id. A
    /// torrent the store rejects is logged and skipped. Returns the number of
    /// rows written.
    pub fn record_torrents(
        &self,
        root_gid: u64,
        torrents: &[TorrentRecord],
    ) -> Result<usize, StoreError> {
        let mut known = self.store.torrent_hashes(root_gid)?;
        let mut saved = 0;

        for torrent in torrents {
            if let Some(hash) = &torrent.hash {
                if known.contains(hash) {
                    debug!(root_gid = root_gid, torrent_id = torrent.id, "Duplicate torrent hash");
                    continue;
                }
            }

            match self.store.upsert_torrent(root_gid, torrent) {
                Ok(()) => {
                    if let Some(hash) = &torrent.hash {
                        known.insert(hash.clone());
                    }
                    metrics::TORRENTS_SAVED.inc();
                    saved += 1;
                }
                Err(e) => {
                    warn!(root_gid = root_gid, torrent_id = torrent.id, error = %e, "Failed to save torrent");
                }
            }
        }

        Ok(saved)
    }

    /// Apply a crawled torrent page: save torrents, set the root and re-mark
    /// both the new group and the group the gallery used to belong to.
    pub fn absorb(
        &self,
        gid: u64,
        root_gid: u64,
        torrents: &[TorrentRecord],
    ) -> Result<usize, StoreError> {
        let saved = self.record_torrents(root_gid, torrents)?;
        let previous = self.resolve_root(gid, root_gid)?;

        self.mark_group(root_gid)?;
        let old_group = previous.unwrap_or(gid);
        if old_group != root_gid {
            self.mark_group(old_group)?;
        }
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteGalleryStore;
    use crate::testing::{fixtures, FlakyStore};

    fn seeded(gids: &[u64]) -> Arc<SqliteGalleryStore> {
        let store = Arc::new(SqliteGalleryStore::in_memory().unwrap());
        for gid in gids {
            store.insert_gallery(&fixtures::record(*gid, 1000)).unwrap();
        }
        store
    }

    fn replaced(store: &SqliteGalleryStore, gid: u64) -> bool {
        store.get_gallery(gid).unwrap().unwrap().replaced
    }

    #[test]
    fn test_only_highest_gid_stays_live() {
        let store = seeded(&[100, 150, 200]);
        let consolidator = VersionConsolidator::new(store.clone());

        for gid in [100, 150, 200] {
            consolidator.absorb(gid, 100, &[]).unwrap();
        }

        assert!(replaced(&store, 100));
        assert!(replaced(&store, 150));
        assert!(!replaced(&store, 200));
    }

    #[test]
    fn test_marking_is_idempotent() {
        let store = seeded(&[100, 150, 200]);
        let consolidator = VersionConsolidator::new(store.clone());
        for gid in [150, 200] {
            consolidator.resolve_root(gid, 100).unwrap();
        }

        consolidator.mark_group(100).unwrap();
        let first: Vec<bool> = [100, 150, 200].iter().map(|g| replaced(&store, *g)).collect();
        consolidator.mark_group(100).unwrap();
        consolidator.mark_all().unwrap();
        let second: Vec<bool> = [100, 150, 200].iter().map(|g| replaced(&store, *g)).collect();

        assert_eq!(first, vec![true, true, false]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_leaving_a_group_remarks_the_old_one() {
        let store = seeded(&[10, 20]);
        let consolidator = VersionConsolidator::new(store.clone());

        // 20 first looks self-rooted, which makes 10 and 20 separate groups
        consolidator.absorb(10, 10, &[]).unwrap();
        consolidator.absorb(20, 20, &[]).unwrap();
        assert!(!replaced(&store, 10));

        // Then the upstream reports 20 as a new version of 10
        consolidator.absorb(20, 10, &[]).unwrap();
        assert!(replaced(&store, 10));
        assert!(!replaced(&store, 20));
    }

    #[test]
    fn test_torrent_dedup_across_passes() {
        let store = seeded(&[100, 150]);
        let consolidator = VersionConsolidator::new(store.clone());
        let torrents = vec![
            fixtures::torrent(1, Some(&"a".repeat(40))),
            fixtures::torrent(2, Some(&"b".repeat(40))),
        ];

        assert_eq!(consolidator.absorb(100, 100, &torrents).unwrap(), 2);

        // The next version re-lists the same content under new torrent ids
        let relisted = vec![
            fixtures::torrent(3, Some(&"a".repeat(40))),
            fixtures::torrent(4, Some(&"b".repeat(40))),
        ];
        assert_eq!(consolidator.absorb(150, 100, &relisted).unwrap(), 0);
        assert_eq!(store.torrents_for_group(100).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_hash_within_one_page() {
        let store = seeded(&[5]);
        let consolidator = VersionConsolidator::new(store.clone());
        let hash = "c".repeat(40);
        let torrents = vec![
            fixtures::torrent(1, Some(&hash)),
            fixtures::torrent(2, Some(&hash)),
            fixtures::torrent(3, None),
        ];

        assert_eq!(consolidator.record_torrents(5, &torrents).unwrap(), 2);
        // Hashless torrents are upserted by id, never duplicated
        assert_eq!(consolidator.record_torrents(5, &torrents).unwrap(), 1);
        assert_eq!(store.torrents_for_group(5).unwrap().len(), 2);
    }

    #[test]
    fn test_resolve_root_for_unknown_gallery_fails() {
        let store = seeded(&[]);
        let consolidator = VersionConsolidator::new(store);
        assert!(matches!(
            consolidator.resolve_root(1, 1),
            Err(StoreError::NotFound(1))
        ));
    }

    #[test]
    fn test_unreadable_hashes_fail_the_gallery() {
        let flaky = Arc::new(FlakyStore::new(seeded(&[5])));
        flaky.fail_hash_lookup(true);
        let consolidator = VersionConsolidator::new(flaky);

        let result = consolidator.absorb(5, 5, &[fixtures::torrent(1, Some(&"d".repeat(40)))]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejected_torrent_is_skipped() {
        let inner = seeded(&[5, 6]);
        let flaky = Arc::new(FlakyStore::new(inner.clone()));
        flaky.fail_writes_for(5);
        let consolidator = VersionConsolidator::new(flaky);

        let torrents = vec![fixtures::torrent(1, Some(&"e".repeat(40)))];
        assert_eq!(consolidator.record_torrents(5, &torrents).unwrap(), 0);
        assert_eq!(consolidator.record_torrents(6, &torrents).unwrap(), 1);
        assert!(inner.torrents_for_group(5).unwrap().is_empty());
    }
}
