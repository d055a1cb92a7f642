//! Configuration loading.
//!
//! Values come from an optional TOML file, overridden by raw environment
//! variables (keys are matched case-insensitively, so `POKE_DB_INTERVAL`
//! fills `poke_db_interval`).

use crate::error::ConfigError;
use crate::registry::TableDescriptor;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::DurationParser;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "pacemaker.toml";

/// Longest accepted poke interval: one year.
pub const MAX_POKE_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bind name → connection URL. The keys are the only binds that get poked.
    #[serde(default)]
    pub db_binds: BTreeMap<String, String>,

    /// Model manifests to load on every tick. Accepts a single path or a list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub models_path_list: Vec<PathBuf>,

    /// Tables registered directly in configuration.
    #[serde(default, rename = "pacemaker_tables")]
    pub tables: Vec<TableDescriptor>,

    #[serde(default = "default_true", rename = "db_pacemaker_switch")]
    pub enabled: bool,

    #[serde(
        default = "default_poke_interval",
        rename = "poke_db_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poke_interval: Duration,

    /// Log a `POKE` line for every successful poke.
    #[serde(default = "default_true", rename = "db_pacemaker_display")]
    pub display: bool,

    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    #[serde(
        default = "default_acquire_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub db_acquire_timeout: Duration,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poke_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_max_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Config {
    /// Build the provider chain: TOML file first, environment on top.
    pub fn figment(path: &Path) -> Figment {
        Figment::new().merge(Toml::file(path)).merge(Env::raw())
    }

    /// Load configuration from `path` (or [`DEFAULT_CONFIG_PATH`]) and the environment.
    ///
    /// A missing file is not an error; the environment alone may be enough.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
        Self::figment(path)
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Checks that must pass before a recurring job is registered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poke_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.poke_interval > MAX_POKE_INTERVAL {
            return Err(ConfigError::IntervalTooLarge {
                max: MAX_POKE_INTERVAL,
            });
        }
        if !self.has_model_sources() {
            return Err(ConfigError::MissingModels);
        }
        Ok(())
    }

    pub fn has_model_sources(&self) -> bool {
        !self.models_path_list.is_empty() || !self.tables.is_empty()
    }

    /// Names of the configured binds.
    pub fn bind_names(&self) -> impl Iterator<Item = &str> {
        self.db_binds.keys().map(String::as_str)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            db_binds: BTreeMap::new(),
            models_path_list: Vec::new(),
            tables: Vec::new(),
            enabled: true,
            poke_interval: default_poke_interval(),
            display: true,
            shutdown_timeout: default_shutdown_timeout(),
            db_max_connections: default_max_connections(),
            db_acquire_timeout: default_acquire_timeout(),
        }
    }
}

/// Parse a duration such as `90`, `"90s"`, `"15m"` or `"1h"`. Bare numbers are seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let parsed = DurationParser::with_all_time_units()
        .parse(input.trim())
        .map_err(|e| format!("invalid duration `{input}`: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration `{input}`: {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    let paths = match Raw::deserialize(deserializer)? {
        Raw::One(path) => vec![path],
        Raw::Many(paths) => paths,
    };
    Ok(paths
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect())
}
