//! Pool configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use trawl_payouts::PayoutsConfig;
use trawl_proxy::{ProxyConfig, UpstreamConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for one pool instance.
///
/// Loaded from a TOML file via [`PoolConfig::from_toml_file`]; every key has
/// a default so an empty document is valid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Instance name, used to label log lines.
    #[serde(default = "default_name")]
    pub name: String,

    /// Directory holding the LMDB ledger.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_upstream_check_interval_secs")]
    pub upstream_check_interval_secs: u64,

    /// How often share counters are written to the log.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Daemon endpoints in order of preference.
    #[serde(default, rename = "upstream")]
    pub upstreams: Vec<UpstreamConfig>,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub payouts: PayoutsConfig,
}

fn default_name() -> String {
    "main".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./trawl_data")
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_upstream_check_interval_secs() -> u64 {
    5
}

fn default_stats_interval_secs() -> u64 {
    60
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            upstream_check_interval_secs: default_upstream_check_interval_secs(),
            stats_interval_secs: default_stats_interval_secs(),
            upstreams: Vec::new(),
            proxy: ProxyConfig::default(),
            payouts: PayoutsConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn upstream_check_interval(&self) -> Duration {
        Duration::from_secs(self.upstream_check_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Reject settings the pool cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.enabled {
            if self.upstreams.is_empty() {
                return Err(ConfigError::Invalid(
                    "at least one [[upstream]] is required when the proxy is enabled".into(),
                ));
            }
            if self.upstream_check_interval_secs == 0 {
                return Err(ConfigError::Invalid(
                    "upstream_check_interval_secs must be non-zero".into(),
                ));
            }
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::Invalid("stats_interval_secs must be non-zero".into()));
        }
        if let Some(upstream) = self.upstreams.iter().find(|u| u.url.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "upstream {} has no url",
                upstream.name
            )));
        }
        self.proxy
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.payouts
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}
