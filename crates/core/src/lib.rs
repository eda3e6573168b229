pub mod config;
pub mod coordinator;
pub mod crawler;
pub mod metrics;
pub mod parser;
pub mod store;
pub mod testing;
pub mod upstream;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use coordinator::{CoordinatorError, RunCoordinator, RunGuard, Workflow};
pub use crawler::{
    GallerySync, ManualFetch, Resync, SyncError, SyncSettings, TorrentBackfill, TorrentSync,
    VersionConsolidator,
};
pub use store::{GalleryStore, SqliteGalleryStore, StoreError};
pub use upstream::{EhClient, FetchError, HttpFetcher, PageFetcher};
