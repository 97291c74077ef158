//! Configuration management for Folio.
//!
//! Configuration is read from `~/.config/folio/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::fetcher::BackoffPolicy;

/// What happens to cached records that vanish from a fresh fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Keep the record and flag it as orphaned.
    #[default]
    Mark,
    /// Delete the record together with its local state.
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Default age after which a source is due again (default: 6 hours)
    pub staleness_ttl_secs: u64,
    /// Maximum reconciler runs in flight at once (default: 4)
    pub max_concurrent_syncs: usize,
    pub orphan_policy: OrphanPolicy,
    /// How often the daemon looks for due sources (default: 15 minutes)
    pub daemon_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staleness_ttl_secs: 6 * 3600,
            max_concurrent_syncs: 4,
            orphan_policy: OrphanPolicy::Mark,
            daemon_interval_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_factor: f64,
    pub rate_limit_delay_secs: u64,
    /// Concurrent chapter-body requests within one sync (default: 8)
    pub body_concurrency: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_factor: 2.0,
            rate_limit_delay_secs: 30,
            body_concurrency: 8,
            user_agent: crate::fetcher::http_fetcher::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.backoff_factor,
        )
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_secs(self.rate_limit_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Events buffered per subscriber before new ones are dropped
    pub buffer: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { buffer: 256 }
    }
}

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub fetch: FetchConfig,
    pub notifier: NotifierConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/folio/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("folio").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> &'static str {
        r##"# Folio Configuration

[sync]
# Age after which a source is synced again, in seconds (sources may override)
staleness_ttl_secs = 21600

# Maximum sources synchronized at the same time
max_concurrent_syncs = 4

# Records missing from a fresh fetch: "mark" keeps them flagged as orphaned,
# "delete" removes them along with their read state
orphan_policy = "mark"

# How often `folio daemon` checks for due sources, in seconds
daemon_interval_secs = 900

[fetch]
timeout_secs = 15

# Retries after the first attempt on timeouts, connection errors and 5xx
max_retries = 3

# Exponential backoff between retries
initial_backoff_ms = 500
max_backoff_ms = 30000
backoff_factor = 2.0

# Minimum wait after an HTTP 429, longer if the server asks for it
rate_limit_delay_secs = 30

# Concurrent chapter page requests when a source fetches bodies during sync
body_concurrency = 8

user_agent = "folio/0.1.0"

[notifier]
# Change events buffered per subscriber
buffer = 256
"##
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl From<ConfigError> for crate::app::FolioError {
    fn from(e: ConfigError) -> Self {
        crate::app::FolioError::Config(e.to_string())
    }
}

/// Parse interval string like "1h", "30m", "6h", "1d" into seconds
pub fn parse_interval(s: &str) -> Result<u64, String> {
    let s = s.trim().to_lowercase();

    if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .map(|h| h * 3600)
            .map_err(|_| format!("Invalid hours: {}", hours))
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes
            .parse::<u64>()
            .map(|m| m * 60)
            .map_err(|_| format!("Invalid minutes: {}", minutes))
    } else if let Some(days) = s.strip_suffix('d') {
        days.parse::<u64>()
            .map(|d| d * 86400)
            .map_err(|_| format!("Invalid days: {}", days))
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>()
            .map_err(|_| format!("Invalid seconds: {}", secs))
    } else {
        s.parse::<u64>()
            .map_err(|_| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s))
    }
}

/// Format interval for display
pub fn format_interval(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let config: Config = toml::from_str(Config::default_config_content())
            .expect("Default config should be valid TOML");

        assert_eq!(config.sync.staleness_ttl_secs, 21600);
        assert_eq!(config.sync.max_concurrent_syncs, 4);
        assert_eq!(config.sync.orphan_policy, OrphanPolicy::Mark);
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.notifier.buffer, 256);
    }

    #[test]
    fn test_partial_config() {
        let content = r#"
[sync]
orphan_policy = "delete"
max_concurrent_syncs = 1
"#;
        let config: Config = toml::from_str(content).expect("Partial config should work");
        assert_eq!(config.sync.orphan_policy, OrphanPolicy::Delete);
        assert_eq!(config.sync.max_concurrent_syncs, 1);
        assert_eq!(config.sync.staleness_ttl_secs, 6 * 3600);
        assert_eq!(config.fetch.timeout_secs, 15);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config.sync.daemon_interval_secs, 900);
        assert_eq!(config.fetch.backoff_factor, 2.0);
    }

    #[test]
    fn test_fetch_durations() {
        let fetch = FetchConfig::default();
        assert_eq!(fetch.timeout(), Duration::from_secs(15));
        assert_eq!(fetch.rate_limit_delay(), Duration::from_secs(30));
        assert_eq!(fetch.backoff().delay(0), Duration::from_millis(500));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[fetch]\nmax_retries = 7\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.fetch.max_retries, 7);

        fs::write(&path, "[fetch\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("1h").unwrap(), 3600);
        assert_eq!(parse_interval("30m").unwrap(), 1800);
        assert_eq!(parse_interval("1d").unwrap(), 86400);
        assert_eq!(parse_interval("60s").unwrap(), 60);
        assert_eq!(parse_interval("3600").unwrap(), 3600);
        assert!(parse_interval("invalid").is_err());
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(3600), "1h");
        assert_eq!(format_interval(1800), "30m");
        assert_eq!(format_interval(86400), "1d");
        assert_eq!(format_interval(90), "90s");
    }
}
