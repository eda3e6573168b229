//! Workflow jobs and the application context that runs them.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use ehdb_core::crawler::{GallerySyncOptions, ResyncOptions, TorrentSyncOptions};
use ehdb_core::upstream::TorrentListFilter;
use ehdb_core::{
    Config, EhClient, GallerySync, GalleryStore, HttpFetcher, ManualFetch, Resync, RunCoordinator,
    SqliteGalleryStore, SyncSettings, TorrentBackfill, TorrentSync, VersionConsolidator, Workflow,
};

use crate::cli::{page_limit, Command};
use crate::scheduler::JobRunner;

/// One workflow run with its options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    GallerySync(GallerySyncOptions),
    TorrentSync(TorrentSyncOptions),
    Resync(ResyncOptions),
    ManualFetch(Vec<String>),
    TorrentBackfill,
    MarkReplaced,
}

impl Job {
    pub fn workflow(&self) -> Workflow {
        match self {
            Job::GallerySync(_) => Workflow::GallerySync,
            Job::TorrentSync(_) => Workflow::TorrentSync,
            Job::Resync(_) => Workflow::Resync,
            Job::ManualFetch(_) => Workflow::ManualFetch,
            Job::TorrentBackfill => Workflow::TorrentBackfill,
            Job::MarkReplaced => Workflow::MarkReplaced,
        }
    }

    /// Build the job for a one-shot command. `Daemon` has no single job.
    pub async fn from_command(command: &Command) -> Result<Option<Job>> {
        let job = match command {
            Command::Sync { offset, pages, .. } => Job::GallerySync(GallerySyncOptions {
                offset_hours: *offset,
                page_limit: page_limit(*pages),
            }),
            Command::Resync { hours } => {
                if *hours == 0 {
                    bail!("--hours must be greater than zero");
                }
                Job::Resync(ResyncOptions { hours: *hours })
            }
            Command::Fetch { galleries, file } => {
                let mut inputs = galleries.clone();
                if let Some(path) = file {
                    inputs.extend(read_gallery_file(path).await?);
                }
                if inputs.is_empty() {
                    bail!("no galleries given; pass gid/token pairs or --file");
                }
                Job::ManualFetch(inputs)
            }
            Command::TorrentSync {
                pages,
                status,
                search,
                ..
            } => Job::TorrentSync(TorrentSyncOptions {
                page_limit: page_limit(*pages),
                filter: TorrentListFilter {
                    search: search.clone(),
                    status: status.clone(),
                },
            }),
            Command::TorrentImport { .. } => Job::TorrentBackfill,
            Command::MarkReplaced => Job::MarkReplaced,
            Command::Daemon => return Ok(None),
        };
        Ok(Some(job))
    }
}

async fn read_gallery_file(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read gallery list {:?}", path))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Everything a workflow needs, built once per process.
pub struct App {
    client: EhClient,
    store: Arc<dyn GalleryStore>,
    settings: SyncSettings,
    coordinator: RunCoordinator,
}

impl App {
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher =
            HttpFetcher::new(&config.crawler).context("Failed to create HTTP client")?;
        let client = EhClient::from_config(Arc::new(fetcher), &config.crawler);
        let store = SqliteGalleryStore::new(&config.database.path).with_context(|| {
            format!("Failed to open database {:?}", config.database.path)
        })?;
        info!(path = ?config.database.path, host = %config.crawler.host, "Store opened");

        Ok(Self::new(
            client,
            Arc::new(store),
            SyncSettings::from_config(&config.crawler),
        ))
    }

    pub fn new(client: EhClient, store: Arc<dyn GalleryStore>, settings: SyncSettings) -> Self {
        Self {
            client,
            store,
            settings,
            coordinator: RunCoordinator::new(),
        }
    }

    async fn execute(&self, job: &Job, cancel: &CancellationToken) -> Result<Value> {
        let client = self.client.clone();
        let store = self.store.clone();
        let settings = self.settings.clone();

        let summary = match job {
            Job::GallerySync(options) => serde_json::to_value(
                GallerySync::new(client, store, settings)
                    .run(options, cancel)
                    .await?,
            )?,
            Job::TorrentSync(options) => serde_json::to_value(
                TorrentSync::new(client, store, settings)
                    .run(options, cancel)
                    .await?,
            )?,
            Job::Resync(options) => serde_json::to_value(
                Resync::new(client, store, settings)
                    .run(*options, cancel)
                    .await?,
            )?,
            Job::ManualFetch(inputs) => serde_json::to_value(
                ManualFetch::new(client, store, settings)
                    .run(inputs, cancel)
                    .await?,
            )?,
            Job::TorrentBackfill => serde_json::to_value(
                TorrentBackfill::new(client, store, settings)
                    .run(cancel)
                    .await?,
            )?,
            Job::MarkReplaced => {
                let rows = VersionConsolidator::new(store).mark_all()?;
                json!({ "rows": rows })
            }
        };
        Ok(summary)
    }
}

#[async_trait]
impl JobRunner for App {
    /// Waits for the run slot, then runs the job.
    async fn run_job(&self, job: &Job, cancel: &CancellationToken) -> Result<Value> {
        let workflow = job.workflow();
        if let Some(running) = self.coordinator.running() {
            info!(workflow = %workflow, running = %running, "Waiting for the running workflow");
        }
        let _guard = tokio::select! {
            _ = cancel.cancelled() => bail!("{} cancelled while waiting to start", workflow),
            guard = self.coordinator.acquire(workflow) => guard?,
        };
        self.execute(job, cancel)
            .await
            .with_context(|| format!("{} failed", workflow))
    }
}
