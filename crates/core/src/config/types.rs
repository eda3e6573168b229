use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("ehdb.sqlite")
}

/// Upstream access and pacing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    /// Site host used for listing and torrent pages (e.g. "e-hentai.org").
    #[serde(default = "default_site_host")]
    pub host: String,
    /// Metadata API endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Raw `Cookie` header sent with page requests.
    #[serde(default)]
    pub cookies: Option<String>,
    /// HTTP or SOCKS5 proxy URL.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Attempts per operation before giving up (default: 3)
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
    /// Suspend instead of failing when the upstream reports an IP ban.
    #[serde(default)]
    pub wait_for_ip_unban: bool,
    #[serde(default = "default_one")]
    pub page_delay_secs: u64,
    #[serde(default = "default_one")]
    pub api_delay_secs: u64,
    /// Delay between per-gallery torrent page fetches during torrent sync.
    #[serde(default = "default_one")]
    pub torrent_delay_secs: u64,
    /// Delay between galleries during the torrent backfill.
    #[serde(default = "default_backfill_delay")]
    pub backfill_delay_secs: u64,
    /// Age after which a "not found" gallery is considered gone for good.
    #[serde(default = "default_pending_grace_days")]
    pub pending_grace_days: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            host: default_site_host(),
            api_url: default_api_url(),
            cookies: None,
            proxy: None,
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            retry_times: default_retry_times(),
            wait_for_ip_unban: false,
            page_delay_secs: default_one(),
            api_delay_secs: default_one(),
            torrent_delay_secs: default_one(),
            backfill_delay_secs: default_backfill_delay(),
            pending_grace_days: default_pending_grace_days(),
        }
    }
}

impl CrawlerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_site_host() -> String {
    "e-hentai.org".to_string()
}

fn default_api_url() -> String {
    "https://api.e-hentai.org/api.php".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_retry_times() -> u32 {
    3
}

fn default_one() -> u64 {
    1
}

fn default_backfill_delay() -> u64 {
    2
}

fn default_pending_grace_days() -> u32 {
    7
}

/// Periodic jobs run by the daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub gallery_sync_enabled: bool,
    #[serde(default = "default_sync_interval")]
    pub gallery_sync_interval_mins: u64,
    /// Hours subtracted from the high-water mark; non-zero forces updates.
    #[serde(default)]
    pub gallery_sync_offset_hours: i64,
    #[serde(default = "default_true")]
    pub torrent_sync_enabled: bool,
    #[serde(default = "default_sync_interval")]
    pub torrent_sync_interval_mins: u64,
    #[serde(default)]
    pub resync_enabled: bool,
    #[serde(default = "default_resync_interval")]
    pub resync_interval_mins: u64,
    #[serde(default = "default_resync_hours")]
    pub resync_hours: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            gallery_sync_enabled: true,
            gallery_sync_interval_mins: default_sync_interval(),
            gallery_sync_offset_hours: 0,
            torrent_sync_enabled: true,
            torrent_sync_interval_mins: default_sync_interval(),
            resync_enabled: false,
            resync_interval_mins: default_resync_interval(),
            resync_hours: default_resync_hours(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    60
}

fn default_resync_interval() -> u64 {
    24 * 60
}

fn default_resync_hours() -> u32 {
    24
}

/// Logging output.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Sanitized config for startup logging (cookies redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub database: DatabaseConfig,
    pub crawler: SanitizedCrawlerConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Crawler config with the cookie header hidden.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedCrawlerConfig {
    pub host: String,
    pub api_url: String,
    pub cookies_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    pub timeout_secs: u64,
    pub retry_times: u32,
    pub wait_for_ip_unban: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let crawler = &config.crawler;
        Self {
            database: config.database.clone(),
            crawler: SanitizedCrawlerConfig {
                host: crawler.host.clone(),
                api_url: crawler.api_url.clone(),
                cookies_configured: crawler.cookies.as_ref().is_some_and(|c| !c.is_empty()),
                proxy: crawler.proxy.clone(),
                timeout_secs: crawler.timeout_secs,
                retry_times: crawler.retry_times,
                wait_for_ip_unban: crawler.wait_for_ip_unban,
            },
            scheduler: config.scheduler.clone(),
            logging: config.logging.clone(),
        }
    }
}
