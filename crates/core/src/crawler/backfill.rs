use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::retry::{pause, retry, RetryError};
use super::torrent_pages::{TorrentPageOutcome, TorrentPageProcessor};
use super::{finish_run, BackfillSummary, SyncError, SyncSettings};
use crate::store::{GalleryRef, GalleryStore};
use crate::upstream::EhClient;

const PROGRESS_EVERY: usize = 100;

/// Visits the torrent page of every gallery whose root is still unknown.
pub struct TorrentBackfill {
    client: EhClient,
    store: Arc<dyn GalleryStore>,
    settings: SyncSettings,
}

impl TorrentBackfill {
    pub fn new(client: EhClient, store: Arc<dyn GalleryStore>, settings: SyncSettings) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<BackfillSummary, SyncError> {
        let started = Instant::now();
        let result = self.backfill(cancel).await;
        finish_run("torrent_backfill", started, &result);
        result
    }

    async fn backfill(&self, cancel: &CancellationToken) -> Result<BackfillSummary, SyncError> {
        let pending = self.store.unresolved_galleries()?;
        let mut summary = BackfillSummary {
            total: pending.len(),
            ..BackfillSummary::default()
        };
        info!(galleries = summary.total, "Starting torrent backfill");

        let processor = TorrentPageProcessor::new(
            self.client.clone(),
            self.store.clone(),
            self.settings.pending_grace,
        );
        let processor = &processor;

        for (index, gallery) in pending.iter().enumerate() {
            if index > 0 {
                pause(cancel, self.settings.backfill_delay).await?;
            }

            let gallery_ref = GalleryRef::new(gallery.gid, gallery.token.clone());
            let gallery_ref = &gallery_ref;
            let result = retry(&self.settings.retry, cancel, "torrent_backfill", move || {
                processor.process(gallery_ref)
            })
            .await;

            match result {
                Ok(TorrentPageOutcome::Resolved { saved, .. }) => {
                    summary.resolved += 1;
                    summary.torrents_saved += saved;
                }
                Ok(TorrentPageOutcome::Removed) => summary.removed += 1,
                Err(RetryError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(gid = gallery.gid, error = %e, "Failed to backfill gallery");
                    summary.failed += 1;
                }
            }

            if (index + 1) % PROGRESS_EVERY == 0 {
                info!(
                    processed = index + 1,
                    total = summary.total,
                    resolved = summary.resolved,
                    removed = summary.removed,
                    failed = summary.failed,
                    "Backfill progress"
                );
            }
        }

        Ok(summary)
    }
}
