//! LMDB implementation of PaymentStore.
//!
//! `pending` is keyed by payee address. `payments` uses the composite key
//! `payee ++ 0x00 ++ seq_be(8)`: addresses are alphanumeric, so the zero
//! separator keeps one payee's prefix from matching another's, and the
//! big-endian sequence keeps each payee's log in insertion order.

use std::ops::Bound;

use heed::{RoTxn, RwTxn};

use trawl_store::{PaymentRecord, PaymentStore, PendingPayment, StoreError};
use trawl_types::{PayeeAddress, Timestamp};

use crate::environment::increment_prefix;
use crate::meta::PAYMENT_SEQ_KEY;
use crate::{LmdbError, LmdbLedger};

fn payment_prefix(payee: &PayeeAddress) -> Vec<u8> {
    let mut key = payee.as_str().as_bytes().to_vec();
    key.push(0);
    key
}

fn payment_key(payee: &PayeeAddress, seq: u64) -> Vec<u8> {
    let mut key = payment_prefix(payee);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

impl LmdbLedger {
    fn read_pending(
        &self,
        txn: &RoTxn,
        payee: &PayeeAddress,
    ) -> Result<PendingPayment, StoreError> {
        let bytes = self
            .pending_db
            .get(txn, payee.as_str().as_bytes())
            .map_err(LmdbError::from)?
            .ok_or_else(|| StoreError::NotFound(format!("pending payment for {payee}")))?;
        Ok(bincode::deserialize(bytes).map_err(LmdbError::from)?)
    }

    fn write_pending(&self, wtxn: &mut RwTxn, pending: &PendingPayment) -> Result<(), LmdbError> {
        let bytes = bincode::serialize(pending)?;
        self.pending_db
            .put(wtxn, pending.address.as_str().as_bytes(), &bytes)?;
        Ok(())
    }

    fn delete_pending(&self, wtxn: &mut RwTxn, payee: &PayeeAddress) -> Result<(), LmdbError> {
        self.pending_db.delete(wtxn, payee.as_str().as_bytes())?;
        Ok(())
    }

    /// Load a pending record and require its `debited` flag to be `want`.
    fn pending_in_state(
        &self,
        txn: &RoTxn,
        payee: &PayeeAddress,
        want_debited: bool,
    ) -> Result<PendingPayment, StoreError> {
        let pending = self.read_pending(txn, payee)?;
        if pending.debited != want_debited {
            let state = if pending.debited { "already" } else { "not" };
            return Err(StoreError::Conflict(format!(
                "pending payment for {payee} is {state} debited"
            )));
        }
        Ok(pending)
    }
}

impl PaymentStore for LmdbLedger {
    fn pending_payments(&self) -> Result<Vec<PendingPayment>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for entry in self.pending_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (_key, val) = entry.map_err(LmdbError::from)?;
            let pending: PendingPayment = bincode::deserialize(val).map_err(LmdbError::from)?;
            results.push(pending);
        }
        results.sort_by_key(|p| p.timestamp);
        Ok(results)
    }

    fn is_payouts_locked(&self) -> Result<bool, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(self.lock_held(&rtxn)?)
    }

    fn lock_payout(&self, pending: &PendingPayment) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self.lock_held(&wtxn)? {
            return Err(StoreError::PayoutsLocked);
        }
        self.set_lock(&mut wtxn, true)?;
        self.write_pending(&mut wtxn, pending)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn debit_balance(&self, payee: &PayeeAddress) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut pending = self.pending_in_state(&wtxn, payee, false)?;
        let mut account = self.read_account(&wtxn, payee)?;
        account.balance = account.balance.checked_sub(pending.amount).ok_or_else(|| {
            StoreError::InsufficientBalance {
                payee: payee.to_string(),
                needed: pending.amount.raw(),
                available: account.balance.raw(),
            }
        })?;
        account.pending = account.pending.saturating_add(pending.amount);
        pending.debited = true;
        self.write_account(&mut wtxn, payee, &account)?;
        self.write_pending(&mut wtxn, &pending)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn mark_submitted(&self, payee: &PayeeAddress, tx_hash: &str) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut pending = self.read_pending(&wtxn, payee)?;
        pending.tx_hash = Some(tx_hash.to_string());
        self.write_pending(&mut wtxn, &pending)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn write_payment(&self, payee: &PayeeAddress, tx_hash: &str) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let pending = self.pending_in_state(&wtxn, payee, true)?;

        let mut account = self.read_account(&wtxn, payee)?;
        account.pending = account.pending.saturating_sub(pending.amount);
        account.paid = account.paid.saturating_add(pending.amount);
        self.write_account(&mut wtxn, payee, &account)?;

        let record = PaymentRecord {
            address: payee.clone(),
            tx_hash: tx_hash.to_string(),
            amount: pending.amount,
            timestamp: Timestamp::now(),
        };
        let seq = self.next_seq(&mut wtxn, PAYMENT_SEQ_KEY)?;
        let bytes = bincode::serialize(&record).map_err(LmdbError::from)?;
        self.payments_db
            .put(&mut wtxn, &payment_key(payee, seq), &bytes)
            .map_err(LmdbError::from)?;

        self.delete_pending(&mut wtxn, payee)?;
        if self.pending_db.is_empty(&wtxn).map_err(LmdbError::from)? {
            self.set_lock(&mut wtxn, false)?;
        }
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn rollback_balance(&self, payee: &PayeeAddress) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let pending = self.pending_in_state(&wtxn, payee, true)?;
        let mut account = self.read_account(&wtxn, payee)?;
        account.pending = account.pending.saturating_sub(pending.amount);
        account.balance = account.balance.saturating_add(pending.amount);
        self.write_account(&mut wtxn, payee, &account)?;
        self.delete_pending(&mut wtxn, payee)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn discard_pending(&self, payee: &PayeeAddress) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.pending_in_state(&wtxn, payee, false)?;
        self.delete_pending(&mut wtxn, payee)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn unlock_payouts(&self) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.set_lock(&mut wtxn, false)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn payments(&self, payee: &PayeeAddress) -> Result<Vec<PaymentRecord>, StoreError> {
        let prefix = payment_prefix(payee);
        let mut upper = prefix.clone();
        increment_prefix(&mut upper);

        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let bounds = (
            Bound::Included(prefix.as_slice()),
            Bound::Excluded(upper.as_slice()),
        );
        let iter = self
            .payments_db
            .range(&rtxn, &bounds)
            .map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for entry in iter {
            let (_key, val) = entry.map_err(LmdbError::from)?;
            let record: PaymentRecord = bincode::deserialize(val).map_err(LmdbError::from)?;
            results.push(record);
        }
        Ok(results)
    }

    fn snapshot(&self) -> Result<String, StoreError> {
        self.env.force_sync().map_err(LmdbError::from)?;
        Ok(format!("ledger synced to {}", self.path().display()))
    }
}
