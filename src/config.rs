use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
    pub backup: BackupConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/restock.db"),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the retailer API.
    pub endpoint: String,
    /// Default region (country code) for new items.
    pub region: String,
    pub language: String,
    /// Currency the configured region prices in.
    pub currency: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.zara.com".to_string(),
            region: "tr".to_string(),
            language: "en".to_string(),
            currency: "TRY".to_string(),
            request_timeout_secs: 15,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// One of the presets "1m", "5m", "15m", "30m", or a raw seconds value.
    pub poll_interval: String,
    pub max_concurrent_checks: usize,
    /// Additional attempts after the first failed fetch.
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Deadline for one full sweep; unfinished items fail for that cycle.
    pub cycle_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: "5m".to_string(),
            max_concurrent_checks: 4,
            retry_attempts: 2,
            retry_base_delay_ms: 500,
            cycle_timeout_secs: 120,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_poll_interval(&self.poll_interval)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub webhook_url: Option<String>,
    pub webhook_username: String,
    /// Whether "went out of stock" transitions are dispatched. They are
    /// always classified and recorded either way.
    pub notify_out_of_stock: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_username: "Restock Watcher".to_string(),
            notify_out_of_stock: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub interval_secs: u64,
    /// How many backups to keep; older ones are pruned after each success.
    pub retention: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/backups"),
            interval_secs: 86_400,
            retention: 5,
        }
    }
}

impl BackupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Optional log file; stderr only when unset.
    pub file: Option<PathBuf>,
}

/// Parses the recognized poll intervals: the preset menu values or a raw
/// number of seconds.
pub fn parse_poll_interval(value: &str) -> Result<Duration, ConfigError> {
    let seconds = match value.trim() {
        "1m" => 60,
        "5m" => 300,
        "15m" => 900,
        "30m" => 1800,
        raw => raw.parse::<u64>().map_err(|_| {
            ConfigError::Message(format!(
                "invalid poll interval '{value}': expected 1m, 5m, 15m, 30m or seconds"
            ))
        })?,
    };

    if seconds == 0 {
        return Err(ConfigError::Message(
            "poll interval must be at least 1 second".into(),
        ));
    }

    Ok(Duration::from_secs(seconds))
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "RESTOCK"
            .add_source(Environment::with_prefix("RESTOCK").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "database max_connections must be greater than 0".into(),
            ));
        }

        if Url::parse(&self.provider.endpoint).is_err() {
            return Err(ConfigError::Message("invalid provider endpoint URL".into()));
        }

        if self.provider.region.is_empty() || self.provider.language.is_empty() {
            return Err(ConfigError::Message(
                "provider region and language must not be empty".into(),
            ));
        }

        if self.provider.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "provider request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(ConfigError::Message(
                "cache ttl_secs must be greater than 0 when the cache is enabled".into(),
            ));
        }

        // Fails fast on an unrecognized interval
        self.scheduler.interval()?;

        if self.scheduler.max_concurrent_checks == 0 {
            return Err(ConfigError::Message(
                "scheduler max_concurrent_checks must be greater than 0".into(),
            ));
        }

        if self.scheduler.retry_attempts > 10 {
            return Err(ConfigError::Message(
                "scheduler retry_attempts must be 10 or fewer".into(),
            ));
        }

        if self.scheduler.retry_base_delay_ms == 0 {
            return Err(ConfigError::Message(
                "scheduler retry_base_delay_ms must be greater than 0".into(),
            ));
        }

        if self.scheduler.cycle_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "scheduler cycle_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Some(url) = &self.notifications.webhook_url {
            if Url::parse(url).is_err() {
                return Err(ConfigError::Message("invalid webhook URL".into()));
            }
        }

        if self.backup.retention == 0 {
            return Err(ConfigError::Message(
                "backup retention must be at least 1".into(),
            ));
        }

        if self.backup.interval_secs == 0 {
            return Err(ConfigError::Message(
                "backup interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}
