//! Configuration for the lsx executor binary
//!
//! Loaded from an optional TOML file:
//!
//! ```toml
//! poll_interval_ms = 100
//!
//! [executors.vfs]
//! root = "/var/lib/lsx/vfs"
//! instanceID = "node-1"
//! ```
//!
//! Each `[executors.<driver>]` table becomes that driver's option store, with
//! keys prefixed by the driver name (`vfs.root`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use executor_kit::executor::DEFAULT_POLL_INTERVAL;
use executor_kit::Store;
use serde::Deserialize;

/// Environment variable naming the config file when `--config` is absent
pub const CONFIG_ENV_VAR: &str = "LSX_CONFIG";

/// Parsed configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LsxConfig {
    /// Interval between device enumerations while waiting
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Per-driver option tables
    #[serde(default)]
    pub executors: BTreeMap<String, toml::Table>,
}

impl LsxConfig {
    /// Load from `path`, or from `$LSX_CONFIG`, or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from),
        };

        match path {
            Some(p) => {
                log::debug!("Loading configuration from {}", p.display());
                let content = std::fs::read_to_string(&p)
                    .map_err(|e| ConfigError::Read(p.clone(), e))?;
                Self::parse(&content).map_err(|e| ConfigError::Parse(p, e))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Option store for `driver`, keys prefixed with `<driver>.`
    pub fn driver_store(&self, driver: &str) -> Store {
        let mut store = Store::new();
        if let Some(table) = self.executors.get(driver) {
            for (key, value) in table {
                match serde_json::to_value(value) {
                    Ok(json) => store.set(format!("{}.{}", driver, key), json),
                    Err(e) => log::warn!("Ignoring option {}.{}: {}", driver, key, e),
                }
            }
        }
        store
    }
}

/// Errors that can occur while loading configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the file
    Read(PathBuf, std::io::Error),
    /// Failed to parse the file
    Parse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(p, e) => write!(f, "Failed to read {}: {}", p.display(), e),
            ConfigError::Parse(p, e) => write!(f, "Failed to parse {}: {}", p.display(), e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read(_, e) => Some(e),
            ConfigError::Parse(_, e) => Some(e),
        }
    }
}
