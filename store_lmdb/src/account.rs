//! LMDB implementation of PayeeStore.
//!
//! Key format: the payee address bytes. Values are bincode `PayeeAccount`.

use heed::{RoTxn, RwTxn};

use trawl_store::{PayeeAccount, PayeeStore, StoreError};
use trawl_types::{PayeeAddress, Shannon, Timestamp};

use crate::{LmdbError, LmdbLedger};

impl LmdbLedger {
    /// Read an account inside an open transaction; absent reads as default.
    pub(crate) fn read_account(
        &self,
        txn: &RoTxn,
        payee: &PayeeAddress,
    ) -> Result<PayeeAccount, LmdbError> {
        match self.accounts_db.get(txn, payee.as_str().as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(bytes)?),
            None => Ok(PayeeAccount::default()),
        }
    }

    pub(crate) fn write_account(
        &self,
        wtxn: &mut RwTxn,
        payee: &PayeeAddress,
        account: &PayeeAccount,
    ) -> Result<(), LmdbError> {
        let bytes = bincode::serialize(account)?;
        self.accounts_db
            .put(wtxn, payee.as_str().as_bytes(), &bytes)?;
        Ok(())
    }

    /// Read-modify-write one account in its own transaction.
    fn update_account<F>(&self, payee: &PayeeAddress, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut PayeeAccount) -> Result<(), StoreError>,
    {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut account = self.read_account(&wtxn, payee)?;
        f(&mut account)?;
        self.write_account(&mut wtxn, payee, &account)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }
}

impl PayeeStore for LmdbLedger {
    fn payees(&self) -> Result<Vec<PayeeAddress>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for entry in self.accounts_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (key, val) = entry.map_err(LmdbError::from)?;
            let account: PayeeAccount = bincode::deserialize(val).map_err(LmdbError::from)?;
            if account.balance.is_zero() {
                continue;
            }
            let raw = std::str::from_utf8(key)
                .map_err(|e| StoreError::Corruption(format!("account key: {e}")))?;
            let payee = PayeeAddress::new(raw)
                .map_err(|e| StoreError::Corruption(format!("account key: {e}")))?;
            results.push(payee);
        }
        Ok(results)
    }

    fn account(&self, payee: &PayeeAddress) -> Result<PayeeAccount, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(self.read_account(&rtxn, payee)?)
    }

    fn set_threshold(&self, payee: &PayeeAddress, threshold: Shannon) -> Result<(), StoreError> {
        self.update_account(payee, |account| {
            account.threshold = threshold;
            Ok(())
        })
    }

    fn credit_balance(&self, payee: &PayeeAddress, amount: Shannon) -> Result<(), StoreError> {
        self.update_account(payee, |account| {
            account.balance = account
                .balance
                .checked_add(amount)
                .ok_or_else(|| StoreError::Conflict(format!("balance overflow for {payee}")))?;
            Ok(())
        })
    }

    fn log_ip(&self, payee: &PayeeAddress, ip: &str, at: Timestamp) -> Result<(), StoreError> {
        self.update_account(payee, |account| {
            account.last_ip = Some(ip.to_string());
            account.last_ip_at = Some(at);
            Ok(())
        })
    }
}
