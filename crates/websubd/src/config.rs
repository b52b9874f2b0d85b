//! Daemon configuration
//!
//! Settings come from a TOML file, then `WEBSUB_HUBD_*` environment
//! variables override individual values (see `env_vars`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use websub::HubConfig;
use websub_common::backoff::DEFAULT_RETRY_DELAYS;

/// Where log output goes
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoggingOutput {
    /// Log to stderr only
    Stderr,
    /// Log to file only
    File,
    /// Log to both stderr and file (default)
    #[default]
    Both,
}

impl std::str::FromStr for LoggingOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stderr" => Ok(LoggingOutput::Stderr),
            "file" => Ok(LoggingOutput::File),
            "both" => Ok(LoggingOutput::Both),
            _ => Err(format!(
                "Unknown logging output: {s}. Valid options: stderr, file, both"
            )),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Where to output logs: stderr, file, or both
    #[serde(default)]
    pub output: LoggingOutput,
    /// Log level for console output
    pub console_level: Option<String>,
    /// Log level for file output
    pub file_level: Option<String>,
}

/// Server identity and listen address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    /// The hub's public base URL, as subscribers and publishers see it
    pub url: String,
    /// Listen address
    pub listen_host: String,
    /// Listen port
    pub listen_port: u16,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Info {
    fn default() -> Self {
        Info {
            url: "http://127.0.0.1:8080/".to_string(),
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8080,
            logging: LoggingConfig::default(),
        }
    }
}

/// Which storage backend to run on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    /// Embedded SQLite database
    #[default]
    Sqlite,
    /// PostgreSQL server
    Postgres,
}

impl std::str::FromStr for DatabaseEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(DatabaseEngine::Sqlite),
            "postgres" => Ok(DatabaseEngine::Postgres),
            _ => Err(format!(
                "Unknown database engine: {s}. Valid options: sqlite, postgres"
            )),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Database {
    /// Storage backend
    #[serde(default)]
    pub engine: DatabaseEngine,
    /// Postgres connection string (postgres engine only)
    pub url: Option<String>,
    /// SQLite file path; defaults to `<work-dir>/websub-hub.sqlite`
    pub path: Option<PathBuf>,
}

impl Database {
    /// The SQLite file to open, defaulting into the work directory
    pub fn sqlite_path(&self, work_dir: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| work_dir.join("websub-hub.sqlite"))
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    10
}

fn default_claim_lease() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    120
}

fn default_lease_preferred() -> u32 {
    86400 * 10
}

fn default_lease_min() -> u32 {
    86400
}

fn default_lease_max() -> u32 {
    86400 * 365
}

fn default_retry_delays() -> Vec<u64> {
    DEFAULT_RETRY_DELAYS.to_vec()
}

/// Hub behaviour knobs, mapped onto [`HubConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Create topics on first mention instead of rejecting unknown ones
    #[serde(default = "default_true")]
    pub public_hub: bool,
    /// Drop topics whose content stops advertising this hub
    #[serde(default)]
    pub strict_topic_hub_link: bool,
    /// Reject (rather than warn about) secrets over plaintext callbacks
    #[serde(default)]
    pub strict_secrets: bool,
    /// Concurrent work units per node
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Scheduler poll interval, seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Work claim lease, seconds
    #[serde(default = "default_claim_lease")]
    pub claim_lease_seconds: u64,
    /// Outbound request timeout, seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Default subscription lease, seconds
    #[serde(default = "default_lease_preferred")]
    pub lease_seconds_preferred: u32,
    /// Minimum accepted lease, seconds
    #[serde(default = "default_lease_min")]
    pub lease_seconds_min: u32,
    /// Maximum accepted lease, seconds
    #[serde(default = "default_lease_max")]
    pub lease_seconds_max: u32,
    /// Retry delay table for topic fetches, seconds
    #[serde(default = "default_retry_delays")]
    pub fetch_retry_delays: Vec<u64>,
    /// Retry delay table for verifications, seconds
    #[serde(default = "default_retry_delays")]
    pub verify_retry_delays: Vec<u64>,
    /// Retry delay table for deliveries, seconds
    #[serde(default = "default_retry_delays")]
    pub delivery_retry_delays: Vec<u64>,
    /// Process ingress-created work inline instead of waiting for a poll
    #[serde(default = "default_true")]
    pub immediate_processing: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            public_hub: true,
            strict_topic_hub_link: false,
            strict_secrets: false,
            max_concurrent: default_max_concurrent(),
            poll_interval_seconds: default_poll_interval(),
            claim_lease_seconds: default_claim_lease(),
            request_timeout_seconds: default_request_timeout(),
            lease_seconds_preferred: default_lease_preferred(),
            lease_seconds_min: default_lease_min(),
            lease_seconds_max: default_lease_max(),
            fetch_retry_delays: default_retry_delays(),
            verify_retry_delays: default_retry_delays(),
            delivery_retry_delays: default_retry_delays(),
            immediate_processing: true,
        }
    }
}

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server identity and listen address
    #[serde(default)]
    pub info: Info,
    /// Storage configuration
    #[serde(default)]
    pub database: Database,
    /// Hub behaviour
    #[serde(default)]
    pub hub: HubSettings,
}

impl Settings {
    /// Loads settings from an optional config file, then applies
    /// environment overrides.
    pub fn new(config_file_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = config_file_path {
            builder = builder.add_source(File::from(path));
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings.from_env())
    }

    /// The engine configuration these settings describe
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            public_url: self.info.url.clone(),
            user_agent: format!(
                "websub-hub/{} (websubd)",
                option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
            ),
            public_hub: self.hub.public_hub,
            strict_topic_hub_link: self.hub.strict_topic_hub_link,
            strict_secrets: self.hub.strict_secrets,
            max_concurrent: self.hub.max_concurrent,
            poll_interval: Duration::from_secs(self.hub.poll_interval_seconds),
            claim_lease_seconds: self.hub.claim_lease_seconds,
            request_timeout: Duration::from_secs(self.hub.request_timeout_seconds),
            lease_seconds_preferred: self.hub.lease_seconds_preferred,
            lease_seconds_min: self.hub.lease_seconds_min,
            lease_seconds_max: self.hub.lease_seconds_max,
            fetch_retry_delays: self.hub.fetch_retry_delays.clone(),
            verify_retry_delays: self.hub.verify_retry_delays.clone(),
            delivery_retry_delays: self.hub.delivery_retry_delays.clone(),
            immediate_processing: self.hub.immediate_processing,
        }
    }
}
