use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Crawler host and API URL are set
/// - Proxy uses a supported scheme
/// - Enabled scheduler jobs have a non-zero interval
/// - Resync window is not empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let crawler = &config.crawler;
    if crawler.host.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "crawler.host cannot be empty".to_string(),
        ));
    }

    if !crawler.api_url.starts_with("http://") && !crawler.api_url.starts_with("https://") {
        return Err(ConfigError::ValidationError(format!(
            "crawler.api_url must be an http(s) URL, got {:?}",
            crawler.api_url
        )));
    }

    if let Some(proxy) = crawler.proxy.as_deref().filter(|p| !p.is_empty()) {
        let supported = ["http://", "https://", "socks5://", "socks5h://"];
        if !supported.iter().any(|scheme| proxy.starts_with(scheme)) {
            return Err(ConfigError::ValidationError(format!(
                "crawler.proxy has an unsupported scheme: {}",
                proxy
            )));
        }
    }

    if crawler.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "crawler.timeout_secs cannot be 0".to_string(),
        ));
    }

    let scheduler = &config.scheduler;
    let jobs = [
        (
            "gallery_sync",
            scheduler.gallery_sync_enabled,
            scheduler.gallery_sync_interval_mins,
        ),
        (
            "torrent_sync",
            scheduler.torrent_sync_enabled,
            scheduler.torrent_sync_interval_mins,
        ),
        (
            "resync",
            scheduler.resync_enabled,
            scheduler.resync_interval_mins,
        ),
    ];
    for (name, enabled, interval) in jobs {
        if enabled && interval == 0 {
            return Err(ConfigError::ValidationError(format!(
                "scheduler.{}_interval_mins cannot be 0 when the job is enabled",
                name
            )));
        }
    }

    if scheduler.resync_enabled && scheduler.resync_hours == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.resync_hours cannot be 0".to_string(),
        ));
    }

    Ok(())
}
