//! Nullable wallet: records transfers instead of sending them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use trawl_rpc::{RpcError, TransferDestination, WalletRpc};
use trawl_types::Atomic;

/// One recorded `transfer` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub destinations: Vec<TransferDestination>,
    pub fee: Atomic,
    pub mixin: u64,
    pub tx_hash: String,
}

/// A wallet with a settable balance.
///
/// Successful transfers deduct their total plus fee from the balance and
/// return hashes `tx1`, `tx2`, ...
pub struct NullWallet {
    balance: Mutex<Atomic>,
    locked: AtomicBool,
    fail_balance: AtomicBool,
    /// Transfers left before transfers start failing; `None` never fails.
    transfer_budget: Mutex<Option<usize>>,
    transfers: Mutex<Vec<RecordedTransfer>>,
    attempts: AtomicUsize,
}

impl NullWallet {
    pub fn new(balance: u128) -> Self {
        Self {
            balance: Mutex::new(Atomic::new(balance)),
            locked: AtomicBool::new(false),
            fail_balance: AtomicBool::new(false),
            transfer_budget: Mutex::new(None),
            transfers: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn set_balance(&self, balance: u128) {
        *self.balance.lock().unwrap() = Atomic::new(balance);
    }

    pub fn current_balance(&self) -> Atomic {
        *self.balance.lock().unwrap()
    }

    /// A locked wallet refuses to sign.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    pub fn fail_balance(&self, fail: bool) {
        self.fail_balance.store(fail, Ordering::SeqCst);
    }

    /// Let `successes` more transfers through, then fail every one after.
    pub fn fail_transfers_after(&self, successes: usize) {
        *self.transfer_budget.lock().unwrap() = Some(successes);
    }

    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.transfers.lock().unwrap().clone()
    }

    /// Transfer calls, including failed ones.
    pub fn transfer_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn remote_error(message: &str) -> RpcError {
        RpcError::Remote {
            endpoint: "null-wallet".to_string(),
            code: -1,
            message: message.to_string(),
        }
    }
}

impl Default for NullWallet {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl WalletRpc for NullWallet {
    async fn balance(&self) -> Result<Atomic, RpcError> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(Self::remote_error("balance unavailable"));
        }
        Ok(*self.balance.lock().unwrap())
    }

    async fn transfer(
        &self,
        destinations: &[TransferDestination],
        fee: Atomic,
        mixin: u64,
    ) -> Result<String, RpcError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut budget = self.transfer_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => return Err(Self::remote_error("transfer failed")),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        let total = destinations
            .iter()
            .try_fold(fee, |acc, d| acc.checked_add(d.amount))
            .ok_or_else(|| Self::remote_error("amount overflow"))?;
        let mut balance = self.balance.lock().unwrap();
        *balance = balance
            .checked_sub(total)
            .ok_or_else(|| Self::remote_error("not enough money"))?;
        let mut transfers = self.transfers.lock().unwrap();
        let tx_hash = format!("tx{}", transfers.len() + 1);
        transfers.push(RecordedTransfer {
            destinations: destinations.to_vec(),
            fee,
            mixin,
            tx_hash: tx_hash.clone(),
        });
        Ok(tx_hash)
    }

    async fn sign(&self, address: &str, message: &str) -> Result<String, RpcError> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(Self::remote_error("wallet is locked"));
        }
        Ok(format!("sig:{address}:{message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transfer_deducts_total_and_fee() {
        let wallet = NullWallet::new(1_000);
        let dests = vec![
            TransferDestination::new("Zx1", Atomic::new(300)),
            TransferDestination::new("Zx2", Atomic::new(200)),
        ];
        let hash = wallet.transfer(&dests, Atomic::new(10), 0).await.unwrap();
        assert_eq!(hash, "tx1");
        assert_eq!(wallet.current_balance(), Atomic::new(490));
        assert_eq!(wallet.transfers()[0].destinations.len(), 2);
    }

    #[tokio::test]
    async fn transfer_failure_after_budget() {
        let wallet = NullWallet::new(1_000);
        wallet.fail_transfers_after(1);
        let dests = vec![TransferDestination::new("Zx1", Atomic::new(1))];
        assert!(wallet.transfer(&dests, Atomic::ZERO, 0).await.is_ok());
        assert!(wallet.transfer(&dests, Atomic::ZERO, 0).await.is_err());
        assert_eq!(wallet.transfer_attempts(), 2);
        assert_eq!(wallet.transfers().len(), 1);
    }

    #[tokio::test]
    async fn locked_wallet_cannot_sign() {
        let wallet = NullWallet::default();
        assert!(wallet.sign("Zx1", "0x0").await.is_ok());
        wallet.set_locked(true);
        assert!(wallet.sign("Zx1", "0x0").await.is_err());
    }
}
