//! Payout locking, pending payments and the payment log.
//!
//! Settlement of one payee walks a fixed sequence of calls:
//!
//! 1. [`PaymentStore::lock_payout`] sets the global payout lock and writes the
//!    [`PendingPayment`] record,
//! 2. [`PaymentStore::debit_balance`] moves the amount from `balance` to
//!    `pending` and marks the record debited,
//! 3. [`PaymentStore::write_payment`] moves it to `paid`, appends a
//!    [`PaymentRecord`], deletes the pending record and releases the lock once
//!    no pending record remains.
//!
//! A crash between steps leaves the pending record behind; the lock stays set
//! until the resolution pass clears it.

use crate::StoreError;
use serde::{Deserialize, Serialize};
use trawl_types::{PayeeAddress, Shannon, Timestamp};

/// A payment in flight. At most one exists per payee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
    pub address: PayeeAddress,
    pub amount: Shannon,
    pub timestamp: Timestamp,
    /// Set by `debit_balance` in the same write.
    #[serde(default)]
    pub debited: bool,
    /// Transaction carrying this payment, once the wallet returned one.
    #[serde(default)]
    pub tx_hash: Option<String>,
}

impl PendingPayment {
    pub fn new(address: PayeeAddress, amount: Shannon, timestamp: Timestamp) -> Self {
        Self {
            address,
            amount,
            timestamp,
            debited: false,
            tx_hash: None,
        }
    }

    /// A pending record for a transfer that already went out.
    pub fn submitted(
        address: PayeeAddress,
        amount: Shannon,
        timestamp: Timestamp,
        tx_hash: impl Into<String>,
    ) -> Self {
        Self {
            tx_hash: Some(tx_hash.into()),
            ..Self::new(address, amount, timestamp)
        }
    }
}

/// One completed payout, appended to the payment log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub address: PayeeAddress,
    pub tx_hash: String,
    pub amount: Shannon,
    pub timestamp: Timestamp,
}

/// Payout lock, pending-payment and payment-log operations.
pub trait PaymentStore {
    /// All pending payments, oldest first.
    fn pending_payments(&self) -> Result<Vec<PendingPayment>, StoreError>;

    /// Whether the global payout lock is set.
    fn is_payouts_locked(&self) -> Result<bool, StoreError>;

    /// Set the global lock and write the pending record.
    ///
    /// Fails with [`StoreError::PayoutsLocked`] if the lock is already held.
    fn lock_payout(&self, pending: &PendingPayment) -> Result<(), StoreError>;

    /// Move the pending amount out of the payee's balance and mark the record
    /// debited. Fails without effect if the balance cannot cover it.
    fn debit_balance(&self, payee: &PayeeAddress) -> Result<(), StoreError>;

    /// Attach the transaction hash to a pending record.
    fn mark_submitted(&self, payee: &PayeeAddress, tx_hash: &str) -> Result<(), StoreError>;

    /// Complete a debited pending payment (see the module docs).
    fn write_payment(&self, payee: &PayeeAddress, tx_hash: &str) -> Result<(), StoreError>;

    /// Credit a debited pending amount back to the balance and delete the record.
    fn rollback_balance(&self, payee: &PayeeAddress) -> Result<(), StoreError>;

    /// Delete a pending record that was never debited.
    fn discard_pending(&self, payee: &PayeeAddress) -> Result<(), StoreError>;

    /// Clear the global payout lock.
    fn unlock_payouts(&self) -> Result<(), StoreError>;

    /// Payment log entries for a payee, oldest first.
    fn payments(&self, payee: &PayeeAddress) -> Result<Vec<PaymentRecord>, StoreError>;

    /// Flush ledger state to durable storage; returns a short status line.
    fn snapshot(&self) -> Result<String, StoreError>;
}
