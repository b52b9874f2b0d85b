//! Environment variable overrides
//!
//! Every variable carries the `WEBSUB_HUBD_` prefix and overrides the
//! matching config-file value after the file is loaded.

use std::env;
use std::str::FromStr;

use crate::config::{DatabaseEngine, LoggingOutput, Settings};

/// Working directory override, read before settings are loaded
pub const ENV_WORK_DIR: &str = "WEBSUB_HUBD_WORK_DIR";

const ENV_URL: &str = "WEBSUB_HUBD_URL";
const ENV_LISTEN_HOST: &str = "WEBSUB_HUBD_LISTEN_HOST";
const ENV_LISTEN_PORT: &str = "WEBSUB_HUBD_LISTEN_PORT";
const ENV_LOGGING_OUTPUT: &str = "WEBSUB_HUBD_LOGGING_OUTPUT";
const ENV_LOGGING_CONSOLE_LEVEL: &str = "WEBSUB_HUBD_LOGGING_CONSOLE_LEVEL";
const ENV_LOGGING_FILE_LEVEL: &str = "WEBSUB_HUBD_LOGGING_FILE_LEVEL";
const ENV_DATABASE_ENGINE: &str = "WEBSUB_HUBD_DATABASE_ENGINE";
const ENV_DATABASE_URL: &str = "WEBSUB_HUBD_DATABASE_URL";
const ENV_DATABASE_PATH: &str = "WEBSUB_HUBD_DATABASE_PATH";
const ENV_PUBLIC_HUB: &str = "WEBSUB_HUBD_PUBLIC_HUB";
const ENV_STRICT_TOPIC_HUB_LINK: &str = "WEBSUB_HUBD_STRICT_TOPIC_HUB_LINK";
const ENV_STRICT_SECRETS: &str = "WEBSUB_HUBD_STRICT_SECRETS";
const ENV_MAX_CONCURRENT: &str = "WEBSUB_HUBD_MAX_CONCURRENT";
const ENV_POLL_INTERVAL: &str = "WEBSUB_HUBD_POLL_INTERVAL_SECONDS";
const ENV_CLAIM_LEASE: &str = "WEBSUB_HUBD_CLAIM_LEASE_SECONDS";
const ENV_IMMEDIATE_PROCESSING: &str = "WEBSUB_HUBD_IMMEDIATE_PROCESSING";

fn env_override<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = env::var(name) {
        match value.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring unparseable {}={}", name, value),
        }
    }
}

impl Settings {
    /// Applies `WEBSUB_HUBD_*` overrides on top of the loaded file
    pub fn from_env(mut self) -> Self {
        env_override(ENV_URL, &mut self.info.url);
        env_override(ENV_LISTEN_HOST, &mut self.info.listen_host);
        env_override(ENV_LISTEN_PORT, &mut self.info.listen_port);

        if let Ok(value) = env::var(ENV_LOGGING_OUTPUT) {
            match value.parse::<LoggingOutput>() {
                Ok(output) => self.info.logging.output = output,
                Err(err) => tracing::warn!("{}", err),
            }
        }
        if let Ok(value) = env::var(ENV_LOGGING_CONSOLE_LEVEL) {
            self.info.logging.console_level = Some(value);
        }
        if let Ok(value) = env::var(ENV_LOGGING_FILE_LEVEL) {
            self.info.logging.file_level = Some(value);
        }

        if let Ok(value) = env::var(ENV_DATABASE_ENGINE) {
            match value.parse::<DatabaseEngine>() {
                Ok(engine) => self.database.engine = engine,
                Err(err) => tracing::warn!("{}", err),
            }
        }
        if let Ok(value) = env::var(ENV_DATABASE_URL) {
            self.database.url = Some(value);
        }
        if let Ok(value) = env::var(ENV_DATABASE_PATH) {
            self.database.path = Some(value.into());
        }

        env_override(ENV_PUBLIC_HUB, &mut self.hub.public_hub);
        env_override(ENV_STRICT_TOPIC_HUB_LINK, &mut self.hub.strict_topic_hub_link);
        env_override(ENV_STRICT_SECRETS, &mut self.hub.strict_secrets);
        env_override(ENV_MAX_CONCURRENT, &mut self.hub.max_concurrent);
        env_override(ENV_POLL_INTERVAL, &mut self.hub.poll_interval_seconds);
        env_override(ENV_CLAIM_LEASE, &mut self.hub.claim_lease_seconds);
        env_override(ENV_IMMEDIATE_PROCESSING, &mut self.hub.immediate_processing);

        self
    }
}
