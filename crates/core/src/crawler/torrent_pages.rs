//! Handling of a single gallery's torrent page, shared by the torrent
//! workflows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use super::consolidate::VersionConsolidator;
use super::ItemError;
use crate::parser::TorrentPage;
use crate::store::{GalleryRef, GalleryStore};
use crate::upstream::EhClient;

/// What happened to a gallery after its torrent page was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentPageOutcome {
    /// The gallery is gone upstream and was flagged removed.
    Removed,
    /// The root was resolved and `saved` torrents were written.
    Resolved { root_gid: u64, saved: usize },
}

pub(crate) struct TorrentPageProcessor {
    client: EhClient,
    store: Arc<dyn GalleryStore>,
    consolidator: VersionConsolidator,
    pending_grace: Duration,
}

impl TorrentPageProcessor {
    pub(crate) fn new(
        client: EhClient,
        store: Arc<dyn GalleryStore>,
        pending_grace: Duration,
    ) -> Self {
        Self {
            client,
            consolidator: VersionConsolidator::new(store.clone()),
            store,
            pending_grace,
        }
    }

    /// Fetch, classify and apply one torrent page.
    ///
    /// A "not found" page for a gallery younger than the grace period is
    /// reported as [`ItemError::Pending`] so the caller retries it later.
    pub(crate) async fn process(
        &self,
        gallery: &GalleryRef,
    ) -> Result<TorrentPageOutcome, ItemError> {
        let gid = gallery.gid;
        match self.client.torrent_page(gallery).await? {
            TorrentPage::Unavailable => {
                info!(gid = gid, "Gallery unavailable upstream, marking removed");
                self.store.mark_removed(gid)?;
                Ok(TorrentPageOutcome::Removed)
            }
            TorrentPage::NotFound => {
                let posted = self.store.posted_for(&[gid])?.get(&gid).copied();
                let age = posted.map(|p| Utc::now().timestamp().saturating_sub(p));
                match age {
                    Some(age) if age > self.pending_grace.as_secs() as i64 => {
                        info!(gid = gid, age_secs = age, "Gallery not found upstream, marking removed");
                        self.store.mark_removed(gid)?;
                        Ok(TorrentPageOutcome::Removed)
                    }
                    _ => Err(ItemError::Pending(gid)),
                }
            }
            TorrentPage::Listed { root_gid, torrents } => {
                let root_gid = root_gid.unwrap_or(gid);
                let saved = self.consolidator.absorb(gid, root_gid, &torrents)?;
                Ok(TorrentPageOutcome::Resolved { root_gid, saved })
            }
        }
    }
}
