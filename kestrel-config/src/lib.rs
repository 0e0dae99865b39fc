//! Layered configuration loading utilities.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root bridge configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub venue: VenueSettings,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
}

/// Connection settings for the venue integration.
///
/// Everything the bridge itself consumes is a named field; driver-specific
/// connect parameters (addresses, credentials, app ids) stay opaque in
/// `params` and are handed to the session implementation untouched.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct VenueSettings {
    #[serde(default = "default_venue_driver_name")]
    pub driver: String,
    /// Offset the venue stamps its naive bar datetimes with, e.g. `+08:00`.
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset: String,
    #[serde(default = "default_poll_backoff_ms")]
    pub poll_backoff_ms: u64,
    #[serde(default, flatten)]
    pub params: Value,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedSettings {
    /// Historical rows requested per feed before it goes live.
    #[serde(default = "default_backfill")]
    pub backfill: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Seed and refresh positions from venue leg snapshots.
    #[serde(default = "default_use_positions")]
    pub use_positions: bool,
    /// Upper bound on waiting for the first account snapshot.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            driver: default_venue_driver_name(),
            timezone_offset: default_timezone_offset(),
            poll_backoff_ms: default_poll_backoff_ms(),
            params: Value::Null,
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            backfill: default_backfill(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            use_positions: default_use_positions(),
            startup_timeout_secs: default_startup_timeout_secs(),
        }
    }
}

impl VenueSettings {
    /// Parse the configured timezone offset.
    pub fn venue_offset(&self) -> Result<FixedOffset> {
        self.timezone_offset
            .parse()
            .with_context(|| format!("invalid venue timezone offset {:?}", self.timezone_offset))
    }

    /// Idle backoff between empty event pulls.
    #[must_use]
    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }
}

impl BrokerSettings {
    /// Startup barrier bound as a duration.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_venue_driver_name() -> String {
    "ctp".to_string()
}

fn default_timezone_offset() -> String {
    "+08:00".to_string()
}

fn default_poll_backoff_ms() -> u64 {
    200
}

fn default_backfill() -> usize {
    100
}

fn default_use_positions() -> bool {
    true
}

fn default_startup_timeout_secs() -> u64 {
    30
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `KESTREL_`
pub fn load_config(env: Option<&str>) -> Result<BridgeConfig> {
    load_config_from(Path::new("config"), env)
}

/// Same as [`load_config`] with an explicit base directory.
pub fn load_config_from(base_path: &Path, env: Option<&str>) -> Result<BridgeConfig> {
    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(true));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("KESTREL")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}
