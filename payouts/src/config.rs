//! Payout settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use trawl_types::{Atomic, Shannon};

use crate::PayoutError;

/// Settlement configuration. Amount fields are in the unit their name says.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Minimum daemon peers before any payee is paid.
    #[serde(default = "default_require_peers")]
    pub require_peers: u64,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Daemon endpoint used for peer checks.
    #[serde(default = "default_daemon_url")]
    pub daemon: String,

    #[serde(default = "default_wallet_url")]
    pub wallet: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Pool wallet address, used to probe that the wallet is unlocked.
    #[serde(default)]
    pub address: String,

    /// Flat network fee per transaction, in atomic units.
    #[serde(default = "default_base_fee")]
    pub base_fee: u64,

    /// Deduct `nw_tx_gas * nw_tx_gas_price` from each payee.
    #[serde(default)]
    pub keep_nw_fees: bool,

    #[serde(default)]
    pub nw_tx_gas: u64,

    #[serde(default)]
    pub nw_tx_gas_price: u64,

    #[serde(default)]
    pub mixin: u64,

    /// Pool-wide payout threshold in Shannon.
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    /// Flush the ledger to disk after payments.
    #[serde(default)]
    pub bgsave: bool,
}

fn default_require_peers() -> u64 {
    5
}

fn default_interval_secs() -> u64 {
    600
}

fn default_daemon_url() -> String {
    "http://127.0.0.1:11211/json_rpc".to_string()
}

fn default_wallet_url() -> String {
    "http://127.0.0.1:11212/json_rpc".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_base_fee() -> u64 {
    10_000_000_000
}

fn default_threshold() -> u64 {
    500_000_000
}

impl Default for PayoutsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            require_peers: default_require_peers(),
            interval_secs: default_interval_secs(),
            daemon: default_daemon_url(),
            wallet: default_wallet_url(),
            timeout_secs: default_timeout_secs(),
            address: String::new(),
            base_fee: default_base_fee(),
            keep_nw_fees: false,
            nw_tx_gas: 0,
            nw_tx_gas_price: 0,
            mixin: 0,
            threshold: default_threshold(),
            bgsave: false,
        }
    }
}

impl PayoutsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_fee(&self) -> Atomic {
        Atomic::new(u128::from(self.base_fee))
    }

    pub fn threshold(&self) -> Shannon {
        Shannon::new(self.threshold)
    }

    /// Per-payee network charge, zero unless `keep_nw_fees` is set.
    pub fn tx_charges(&self) -> Atomic {
        if self.keep_nw_fees {
            Atomic::new(u128::from(self.nw_tx_gas) * u128::from(self.nw_tx_gas_price))
        } else {
            Atomic::ZERO
        }
    }

    pub fn validate(&self) -> Result<(), PayoutError> {
        if !self.enabled {
            return Ok(());
        }
        if self.address.is_empty() {
            return Err(PayoutError::Config("payouts.address must be set".into()));
        }
        if self.interval_secs == 0 {
            return Err(PayoutError::Config("payouts.interval_secs must be non-zero".into()));
        }
        if self.daemon.is_empty() || self.wallet.is_empty() {
            return Err(PayoutError::Config(
                "payouts.daemon and payouts.wallet must be set".into(),
            ));
        }
        Ok(())
    }
}
