//! Proxy and upstream configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use trawl_store::FINGERPRINT_WINDOW;

use crate::ProxyError;

/// Job refresh and share validation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reward address passed to `getwork`.
    #[serde(default)]
    pub address: String,

    /// Pool share difficulty (the low bar).
    #[serde(default = "default_difficulty")]
    pub difficulty: u64,

    #[serde(default = "default_block_refresh_interval_secs")]
    pub block_refresh_interval_secs: u64,

    /// How long a share counts toward its payee's hashrate.
    #[serde(default = "default_hashrate_expiration_secs")]
    pub hashrate_expiration_secs: u64,

    /// Heights of job headers kept in the backlog.
    #[serde(default = "default_max_backlog")]
    pub max_backlog: u64,
}

fn default_true() -> bool {
    true
}

fn default_difficulty() -> u64 {
    2_000_000_000
}

fn default_block_refresh_interval_secs() -> u64 {
    1
}

fn default_hashrate_expiration_secs() -> u64 {
    3 * 60 * 60
}

fn default_max_backlog() -> u64 {
    3
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: String::new(),
            difficulty: default_difficulty(),
            block_refresh_interval_secs: default_block_refresh_interval_secs(),
            hashrate_expiration_secs: default_hashrate_expiration_secs(),
            max_backlog: default_max_backlog(),
        }
    }
}

impl ProxyConfig {
    pub fn block_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.block_refresh_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if !self.enabled {
            return Ok(());
        }
        if self.address.is_empty() {
            return Err(ProxyError::Config("proxy.address must be set".into()));
        }
        if self.difficulty == 0 {
            return Err(ProxyError::Config("proxy.difficulty must be non-zero".into()));
        }
        if self.block_refresh_interval_secs == 0 {
            return Err(ProxyError::Config(
                "proxy.block_refresh_interval_secs must be non-zero".into(),
            ));
        }
        if self.max_backlog == 0 {
            return Err(ProxyError::Config("proxy.max_backlog must be non-zero".into()));
        }
        if self.max_backlog > FINGERPRINT_WINDOW {
            return Err(ProxyError::Config(format!(
                "proxy.max_backlog must not exceed {FINGERPRINT_WINDOW}"
            )));
        }
        Ok(())
    }
}

/// One daemon endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_once_address_is_set() {
        let mut config = ProxyConfig::default();
        assert!(config.validate().is_err());
        config.address = "Zx1".into();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_backlog, 3);
    }

    #[test]
    fn disabled_proxy_skips_validation() {
        let config = ProxyConfig {
            enabled: false,
            ..ProxyConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backlog_wider_than_duplicate_detection_is_rejected() {
        let mut config = ProxyConfig {
            address: "Zx1".into(),
            max_backlog: FINGERPRINT_WINDOW + 1,
            ..ProxyConfig::default()
        };
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));
        config.max_backlog = FINGERPRINT_WINDOW;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_refresh_interval_is_rejected() {
        let config = ProxyConfig {
            address: "Zx1".into(),
            block_refresh_interval_secs: 0,
            ..ProxyConfig::default()
        };
        assert!(matches!(config.validate(), Err(ProxyError::Config(_))));
    }
}
