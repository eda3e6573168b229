use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::batcher::MetadataBatcher;
use super::importer::Importer;
use super::pager::ListPager;
use super::retry::{pause, retry, RetryError};
use super::torrent_pages::{TorrentPageOutcome, TorrentPageProcessor};
use super::{
    finish_run, ImportSummary, SyncError, SyncSettings, TorrentSyncOptions, TorrentSyncSummary,
};
use crate::store::{GalleryRef, GalleryStore};
use crate::upstream::EhClient;

/// Follows the torrent listing and records new torrents under their
/// gallery's version group.
pub struct TorrentSync {
    client: EhClient,
    store: Arc<dyn GalleryStore>,
    settings: SyncSettings,
}

impl TorrentSync {
    pub fn new(client: EhClient, store: Arc<dyn GalleryStore>, settings: SyncSettings) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    pub async fn run(
        &self,
        options: &TorrentSyncOptions,
        cancel: &CancellationToken,
    ) -> Result<TorrentSyncSummary, SyncError> {
        let started = Instant::now();
        let result = self.sync(options, cancel).await;
        finish_run("torrent_sync", started, &result);
        result
    }

    async fn sync(
        &self,
        options: &TorrentSyncOptions,
        cancel: &CancellationToken,
    ) -> Result<TorrentSyncSummary, SyncError> {
        let last_torrent_id = self.store.last_torrent_id()?.unwrap_or(0);
        info!(last_torrent_id = last_torrent_id, "Starting torrent sync");

        let pager = ListPager::new(&self.settings.retry, cancel, self.settings.page_delay);
        let client = &self.client;
        let filter = &options.filter;
        let listings = pager
            .collect(
                "torrent_list",
                last_torrent_id as i64,
                options.page_limit,
                move |cursor| client.torrent_list_page(cursor.page, filter),
            )
            .await?;

        let ids: Vec<u64> = listings.iter().map(|l| l.gtid).collect();
        let known = self.store.known_torrent_ids(&ids)?;
        let fresh: Vec<_> = listings
            .into_iter()
            .filter(|l| !known.contains(&l.gtid))
            .collect();

        // One entry per gallery, in listing order
        let mut seen = HashSet::new();
        let galleries: Vec<GalleryRef> = fresh
            .iter()
            .filter(|l| seen.insert(l.gid))
            .map(|l| l.gallery_ref())
            .collect();

        let mut summary = TorrentSyncSummary {
            new_torrents: fresh.len(),
            galleries: galleries.len(),
            ..TorrentSyncSummary::default()
        };
        info!(
            new_torrents = summary.new_torrents,
            galleries = summary.galleries,
            "Torrent listing collected"
        );

        let (missing, import) = self.import_missing(&galleries, cancel).await?;
        summary.missing_galleries = missing;
        summary.import = import;

        let processor = TorrentPageProcessor::new(
            self.client.clone(),
            self.store.clone(),
            self.settings.pending_grace,
        );
        let processor = &processor;

        for (index, gallery) in galleries.iter().enumerate() {
            if index > 0 {
                pause(cancel, self.settings.torrent_delay).await?;
            }

            let result = retry(&self.settings.retry, cancel, "torrent_page", move || {
                processor.process(gallery)
            })
            .await;

            match result {
                Ok(TorrentPageOutcome::Resolved { saved, .. }) => {
                    summary.processed += 1;
                    summary.torrents_saved += saved;
                }
                Ok(TorrentPageOutcome::Removed) => {
                    summary.processed += 1;
                    summary.removed += 1;
                }
                Err(RetryError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(gid = gallery.gid, error = %e, "Failed to process torrent page");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Import galleries the store has never seen and flag them as found
    /// through the torrent listing.
    async fn import_missing(
        &self,
        galleries: &[GalleryRef],
        cancel: &CancellationToken,
    ) -> Result<(usize, ImportSummary), SyncError> {
        let gids: Vec<u64> = galleries.iter().map(|g| g.gid).collect();
        let existing = self.store.existing_gids(&gids)?;
        let missing: Vec<GalleryRef> = galleries
            .iter()
            .filter(|g| !existing.contains(&g.gid))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok((0, ImportSummary::default()));
        }
        info!(missing = missing.len(), "Importing galleries referenced by new torrents");

        let batcher = MetadataBatcher::new(
            self.client.clone(),
            self.settings.retry.clone(),
            self.settings.api_delay,
        );
        let metadata = batcher.fetch(&missing, cancel).await?;
        let import = Importer::new(self.store.clone()).import(&metadata, true)?;

        let missing_gids: Vec<u64> = missing.iter().map(|g| g.gid).collect();
        let imported: Vec<u64> = self
            .store
            .existing_gids(&missing_gids)?
            .into_iter()
            .collect();
        self.store.mark_by_torrent(&imported)?;

        Ok((missing.len(), import))
    }
}
