use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::batcher::MetadataBatcher;
use super::importer::Importer;
use super::{finish_run, RefreshSummary, ResyncOptions, SyncError, SyncSettings};
use crate::store::GalleryStore;
use crate::upstream::EhClient;

/// Re-fetches recently posted galleries to pick up later edits (tags,
/// ratings, torrent counts). Always forces the update.
pub struct Resync {
    client: EhClient,
    store: Arc<dyn GalleryStore>,
    settings: SyncSettings,
}

impl Resync {
    pub fn new(client: EhClient, store: Arc<dyn GalleryStore>, settings: SyncSettings) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    pub async fn run(
        &self,
        options: ResyncOptions,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, SyncError> {
        let started = Instant::now();
        let result = self.resync(options, cancel).await;
        finish_run("resync", started, &result);
        result
    }

    async fn resync(
        &self,
        options: ResyncOptions,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary, SyncError> {
        let since = Utc::now().timestamp() - i64::from(options.hours) * 3600;
        let refs = self.store.galleries_posted_since(since)?;
        info!(hours = options.hours, galleries = refs.len(), "Starting resync");

        let batcher = MetadataBatcher::new(
            self.client.clone(),
            self.settings.retry.clone(),
            self.settings.api_delay,
        );
        let metadata = batcher.fetch(&refs, cancel).await?;
        let import = Importer::new(self.store.clone()).import(&metadata, true)?;

        Ok(RefreshSummary {
            selected: refs.len(),
            invalid_inputs: 0,
            fetched: metadata.len(),
            import,
        })
    }
}
