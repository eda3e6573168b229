use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix of environment overrides. Sections and fields are separated by a
/// double underscore, e.g. `EHDB_CRAWLER__RETRY_TIMES=5`.
const ENV_PREFIX: &str = "EHDB_";

/// Read `path` and layer `EHDB_*` environment variables on top.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Parse TOML text without environment overrides.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[crawler]
retry_times = 5

[scheduler]
resync_enabled = true
resync_hours = 48
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.crawler.retry_times, 5);
        assert!(config.scheduler.resync_enabled);
        assert_eq!(config.scheduler.resync_hours, 48);
    }

    #[test]
    fn test_load_config_from_str_wrong_type() {
        let toml = r#"
[crawler]
retry_times = "many"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[database]
path = "/tmp/mirror.sqlite"

[crawler]
host = "exhentai.org"
cookies = "ipb_member_id=1"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.crawler.host, "exhentai.org");
        assert_eq!(config.crawler.cookies.as_deref(), Some("ipb_member_id=1"));
        assert_eq!(config.database.path.to_str(), Some("/tmp/mirror.sqlite"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[crawler]\nbackfill_delay_secs = 4").unwrap();

        std::env::set_var("EHDB_CRAWLER__BACKFILL_DELAY_SECS", "9");
        let config = load_config(temp_file.path());
        std::env::remove_var("EHDB_CRAWLER__BACKFILL_DELAY_SECS");

        assert_eq!(config.unwrap().crawler.backfill_delay_secs, 9);
    }
}
