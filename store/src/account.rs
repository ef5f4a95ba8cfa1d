//! Payee account storage trait.

use crate::StoreError;
use serde::{Deserialize, Serialize};
use trawl_types::{PayeeAddress, Shannon, Timestamp};

/// Per-payee state stored in the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayeeAccount {
    /// Credit available for payout.
    pub balance: Shannon,
    /// Debited for an in-flight payment, not yet recorded as paid.
    pub pending: Shannon,
    /// Lifetime total recorded as paid.
    pub paid: Shannon,
    /// Payee-chosen payout threshold; zero means "use the pool default".
    pub threshold: Shannon,
    /// Last source IP that submitted a valid share, and when.
    pub last_ip: Option<String>,
    pub last_ip_at: Option<Timestamp>,
}

/// Balance, threshold and telemetry operations on payee accounts.
pub trait PayeeStore {
    /// All payees with a non-zero balance, in address order.
    fn payees(&self) -> Result<Vec<PayeeAddress>, StoreError>;

    /// Full account record; absent payees read as the default account.
    fn account(&self, payee: &PayeeAddress) -> Result<PayeeAccount, StoreError>;

    fn balance(&self, payee: &PayeeAddress) -> Result<Shannon, StoreError> {
        self.account(payee).map(|a| a.balance)
    }

    /// Payee threshold override, zero if unset.
    fn threshold(&self, payee: &PayeeAddress) -> Result<Shannon, StoreError> {
        self.account(payee).map(|a| a.threshold)
    }

    fn set_threshold(&self, payee: &PayeeAddress, threshold: Shannon) -> Result<(), StoreError>;

    /// Add to a payee's available balance.
    fn credit_balance(&self, payee: &PayeeAddress, amount: Shannon) -> Result<(), StoreError>;

    /// Record the source IP of a valid solution.
    fn log_ip(&self, payee: &PayeeAddress, ip: &str, at: Timestamp) -> Result<(), StoreError>;
}
