use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::batcher::MetadataBatcher;
use super::importer::Importer;
use super::pager::ListPager;
use super::{finish_run, GallerySyncOptions, GallerySyncSummary, SyncError, SyncSettings};
use crate::parser::GalleryListing;
use crate::store::GalleryStore;
use crate::upstream::EhClient;

/// Pulls galleries posted since the last run from the front-page listing.
pub struct GallerySync {
    client: EhClient,
    store: Arc<dyn GalleryStore>,
    settings: SyncSettings,
}

impl GallerySync {
    pub fn new(client: EhClient, store: Arc<dyn GalleryStore>, settings: SyncSettings) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    pub async fn run(
        &self,
        options: &GallerySyncOptions,
        cancel: &CancellationToken,
    ) -> Result<GallerySyncSummary, SyncError> {
        let started = Instant::now();
        let result = self.sync(options, cancel).await;
        finish_run("gallery_sync", started, &result);
        result
    }

    async fn sync(
        &self,
        options: &GallerySyncOptions,
        cancel: &CancellationToken,
    ) -> Result<GallerySyncSummary, SyncError> {
        let last_posted = self.store.last_posted()?.unwrap_or(0);
        let high_water_mark = last_posted - options.offset_hours * 3600;
        info!(
            last_posted = last_posted,
            high_water_mark = high_water_mark,
            offset_hours = options.offset_hours,
            "Starting gallery sync"
        );

        let pager = ListPager::new(&self.settings.retry, cancel, self.settings.page_delay);
        let client = &self.client;
        let mut listed: Vec<GalleryListing> = Vec::new();

        // Expunged galleries only show up with the f_sh filter
        for expunged in [false, true] {
            let items = pager
                .collect(
                    "gallery_list",
                    high_water_mark,
                    options.page_limit,
                    move |cursor| client.gallery_page(cursor.after, expunged),
                )
                .await?;
            info!(expunged = expunged, count = items.len(), "Listing sweep finished");
            listed.extend(items);
        }

        let mut seen = HashSet::new();
        let refs: Vec<_> = listed
            .iter()
            .filter(|item| seen.insert(item.gid))
            .map(GalleryListing::gallery_ref)
            .collect();

        let batcher = MetadataBatcher::new(
            self.client.clone(),
            self.settings.retry.clone(),
            self.settings.api_delay,
        );
        let metadata = batcher.fetch(&refs, cancel).await?;

        let force = options.offset_hours != 0;
        let import = Importer::new(self.store.clone()).import(&metadata, force)?;

        Ok(GallerySyncSummary {
            high_water_mark,
            listed: refs.len(),
            fetched: metadata.len(),
            import,
        })
    }
}
