//! Nullable ledger: thread-safe in-memory ledger for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use trawl_store::{
    BlockRecord, PayeeAccount, PayeeStore, PaymentRecord, PaymentStore, PendingPayment,
    ShareRecord, ShareStore, SolutionFingerprint, StoreError, FINGERPRINT_WINDOW,
};
use trawl_types::{PayeeAddress, Shannon, Timestamp};

/// Every ledger operation, for fault injection and call counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    Payees,
    Account,
    SetThreshold,
    CreditBalance,
    LogIp,
    PendingPayments,
    IsPayoutsLocked,
    LockPayout,
    DebitBalance,
    MarkSubmitted,
    WritePayment,
    RollbackBalance,
    DiscardPending,
    UnlockPayouts,
    Payments,
    Snapshot,
    WriteShare,
    WriteBlock,
    RoundShares,
    BlockCandidates,
    RecentShares,
}

#[derive(Default)]
struct LedgerState {
    accounts: BTreeMap<PayeeAddress, PayeeAccount>,
    pending: BTreeMap<PayeeAddress, PendingPayment>,
    locked: bool,
    payments: Vec<PaymentRecord>,
    fingerprints: HashMap<SolutionFingerprint, u64>,
    newest_height: u64,
    round: BTreeMap<PayeeAddress, u64>,
    shares: Vec<ShareRecord>,
    blocks: Vec<BlockRecord>,
    snapshots: u64,
}

impl LedgerState {
    /// Insert a fingerprint unless present; prunes old fingerprints.
    fn insert_fingerprint(&mut self, fingerprint: SolutionFingerprint, height: u64) -> bool {
        if self.fingerprints.contains_key(&fingerprint) {
            return false;
        }
        self.newest_height = self.newest_height.max(height);
        let floor = self.newest_height.saturating_sub(FINGERPRINT_WINDOW);
        self.fingerprints.retain(|_, h| *h >= floor);
        self.fingerprints.insert(fingerprint, height);
        true
    }

    fn pending_mut(&mut self, payee: &PayeeAddress) -> Result<&mut PendingPayment, StoreError> {
        self.pending
            .get_mut(payee)
            .ok_or_else(|| StoreError::NotFound(format!("pending payment for {payee}")))
    }
}

/// An in-memory ledger with the same semantics as the LMDB backend.
///
/// Thread-safe for use with tokio's multi-threaded runtime.
pub struct NullLedger {
    state: Mutex<LedgerState>,
    /// op -> number of further calls that succeed before the op starts failing.
    faults: Mutex<HashMap<LedgerOp, usize>>,
    calls: Mutex<HashMap<LedgerOp, usize>>,
}

impl NullLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a payee balance.
    pub fn with_balance(self, payee: &str, amount: u64) -> Self {
        self.set_balance(payee, amount);
        self
    }

    pub fn set_balance(&self, payee: &str, amount: u64) {
        let payee = address(payee);
        self.state
            .lock()
            .unwrap()
            .accounts
            .entry(payee)
            .or_default()
            .balance = Shannon::new(amount);
    }

    /// Seed a pending payment and set the lock, as a crashed run leaves them.
    pub fn seed_pending(&self, pending: PendingPayment) {
        let mut state = self.state.lock().unwrap();
        if pending.debited {
            let account = state.accounts.entry(pending.address.clone()).or_default();
            account.pending = account.pending.saturating_add(pending.amount);
        }
        state.pending.insert(pending.address.clone(), pending);
        state.locked = true;
    }

    /// Set the payout lock without any pending record.
    pub fn set_locked(&self, locked: bool) {
        self.state.lock().unwrap().locked = locked;
    }

    /// Make `op` fail on its next call and every call after.
    pub fn fail_on(&self, op: LedgerOp) {
        self.fail_after(op, 0);
    }

    /// Let `op` succeed `successes` more times, then fail.
    pub fn fail_after(&self, op: LedgerOp, successes: usize) {
        self.faults.lock().unwrap().insert(op, successes);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.faults.lock().unwrap().clear();
    }

    /// Number of calls made to `op` (including failed ones).
    pub fn calls(&self, op: LedgerOp) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// Total calls across all operations.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().locked
    }

    pub fn account_of(&self, payee: &str) -> PayeeAccount {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(&address(payee))
            .cloned()
            .unwrap_or_default()
    }

    pub fn balance_of(&self, payee: &str) -> u64 {
        self.account_of(payee).balance.raw()
    }

    pub fn pending(&self) -> Vec<PendingPayment> {
        self.state.lock().unwrap().pending.values().cloned().collect()
    }

    pub fn all_payments(&self) -> Vec<PaymentRecord> {
        self.state.lock().unwrap().payments.clone()
    }

    pub fn shares(&self) -> Vec<ShareRecord> {
        self.state.lock().unwrap().shares.clone()
    }

    pub fn blocks(&self) -> Vec<BlockRecord> {
        self.state.lock().unwrap().blocks.clone()
    }

    pub fn snapshots(&self) -> u64 {
        self.state.lock().unwrap().snapshots
    }

    fn enter(&self, op: LedgerOp) -> Result<(), StoreError> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(&op) {
            Some(0) => Err(StoreError::Backend(format!("injected failure: {op:?}"))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Default for NullLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn address(raw: &str) -> PayeeAddress {
    PayeeAddress::new(raw).expect("test payee address must be alphanumeric")
}

impl PayeeStore for NullLedger {
    fn payees(&self) -> Result<Vec<PayeeAddress>, StoreError> {
        self.enter(LedgerOp::Payees)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .accounts
            .iter()
            .filter(|(_, a)| !a.balance.is_zero())
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn account(&self, payee: &PayeeAddress) -> Result<PayeeAccount, StoreError> {
        self.enter(LedgerOp::Account)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .accounts
            .get(payee)
            .cloned()
            .unwrap_or_default())
    }

    fn set_threshold(&self, payee: &PayeeAddress, threshold: Shannon) -> Result<(), StoreError> {
        self.enter(LedgerOp::SetThreshold)?;
        self.state
            .lock()
            .unwrap()
            .accounts
            .entry(payee.clone())
            .or_default()
            .threshold = threshold;
        Ok(())
    }

    fn credit_balance(&self, payee: &PayeeAddress, amount: Shannon) -> Result<(), StoreError> {
        self.enter(LedgerOp::CreditBalance)?;
        let mut state = self.state.lock().unwrap();
        let account = state.accounts.entry(payee.clone()).or_default();
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| StoreError::Conflict(format!("balance overflow for {payee}")))?;
        Ok(())
    }

    fn log_ip(&self, payee: &PayeeAddress, ip: &str, at: Timestamp) -> Result<(), StoreError> {
        self.enter(LedgerOp::LogIp)?;
        let mut state = self.state.lock().unwrap();
        let account = state.accounts.entry(payee.clone()).or_default();
        account.last_ip = Some(ip.to_string());
        account.last_ip_at = Some(at);
        Ok(())
    }
}

impl PaymentStore for NullLedger {
    fn pending_payments(&self) -> Result<Vec<PendingPayment>, StoreError> {
        self.enter(LedgerOp::PendingPayments)?;
        let mut list: Vec<_> = self.state.lock().unwrap().pending.values().cloned().collect();
        list.sort_by_key(|p| p.timestamp);
        Ok(list)
    }

    fn is_payouts_locked(&self) -> Result<bool, StoreError> {
        self.enter(LedgerOp::IsPayoutsLocked)?;
        Ok(self.state.lock().unwrap().locked)
    }

    fn lock_payout(&self, pending: &PendingPayment) -> Result<(), StoreError> {
        self.enter(LedgerOp::LockPayout)?;
        let mut state = self.state.lock().unwrap();
        if state.locked {
            return Err(StoreError::PayoutsLocked);
        }
        state.locked = true;
        state.pending.insert(pending.address.clone(), pending.clone());
        Ok(())
    }

    fn debit_balance(&self, payee: &PayeeAddress) -> Result<(), StoreError> {
        self.enter(LedgerOp::DebitBalance)?;
        let mut state = self.state.lock().unwrap();
        let record = state.pending_mut(payee)?;
        if record.debited {
            return Err(StoreError::Conflict(format!("{payee} already debited")));
        }
        let amount = record.amount;
        let account = state.accounts.entry(payee.clone()).or_default();
        let balance = account
            .balance
            .checked_sub(amount)
            .ok_or_else(|| StoreError::InsufficientBalance {
                payee: payee.to_string(),
                needed: amount.raw(),
                available: account.balance.raw(),
            })?;
        account.balance = balance;
        account.pending = account.pending.saturating_add(amount);
        state.pending_mut(payee)?.debited = true;
        Ok(())
    }

    fn mark_submitted(&self, payee: &PayeeAddress, tx_hash: &str) -> Result<(), StoreError> {
        self.enter(LedgerOp::MarkSubmitted)?;
        let mut state = self.state.lock().unwrap();
        state.pending_mut(payee)?.tx_hash = Some(tx_hash.to_string());
        Ok(())
    }

    fn write_payment(&self, payee: &PayeeAddress, tx_hash: &str) -> Result<(), StoreError> {
        self.enter(LedgerOp::WritePayment)?;
        let mut state = self.state.lock().unwrap();
        let record = state.pending_mut(payee)?.clone();
        if !record.debited {
            return Err(StoreError::Conflict(format!("{payee} not debited")));
        }
        let account = state.accounts.entry(payee.clone()).or_default();
        account.pending = account.pending.saturating_sub(record.amount);
        account.paid = account.paid.saturating_add(record.amount);
        state.payments.push(PaymentRecord {
            address: payee.clone(),
            tx_hash: tx_hash.to_string(),
            amount: record.amount,
            timestamp: Timestamp::now(),
        });
        state.pending.remove(payee);
        if state.pending.is_empty() {
            state.locked = false;
        }
        Ok(())
    }

    fn rollback_balance(&self, payee: &PayeeAddress) -> Result<(), StoreError> {
        self.enter(LedgerOp::RollbackBalance)?;
        let mut state = self.state.lock().unwrap();
        let record = state.pending_mut(payee)?.clone();
        if !record.debited {
            return Err(StoreError::Conflict(format!("{payee} not debited")));
        }
        let account = state.accounts.entry(payee.clone()).or_default();
        account.pending = account.pending.saturating_sub(record.amount);
        account.balance = account.balance.saturating_add(record.amount);
        state.pending.remove(payee);
        Ok(())
    }

    fn discard_pending(&self, payee: &PayeeAddress) -> Result<(), StoreError> {
        self.enter(LedgerOp::DiscardPending)?;
        let mut state = self.state.lock().unwrap();
        if state.pending_mut(payee)?.debited {
            return Err(StoreError::Conflict(format!("{payee} already debited")));
        }
        state.pending.remove(payee);
        Ok(())
    }

    fn unlock_payouts(&self) -> Result<(), StoreError> {
        self.enter(LedgerOp::UnlockPayouts)?;
        self.state.lock().unwrap().locked = false;
        Ok(())
    }

    fn payments(&self, payee: &PayeeAddress) -> Result<Vec<PaymentRecord>, StoreError> {
        self.enter(LedgerOp::Payments)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .payments
            .iter()
            .filter(|p| &p.address == payee)
            .cloned()
            .collect())
    }

    fn snapshot(&self) -> Result<String, StoreError> {
        self.enter(LedgerOp::Snapshot)?;
        let mut state = self.state.lock().unwrap();
        state.snapshots += 1;
        Ok(format!("snapshot {}", state.snapshots))
    }
}

impl ShareStore for NullLedger {
    fn write_share(&self, share: &ShareRecord) -> Result<bool, StoreError> {
        self.enter(LedgerOp::WriteShare)?;
        let mut state = self.state.lock().unwrap();
        if !state.insert_fingerprint(share.fingerprint, share.height) {
            return Ok(true);
        }
        *state.round.entry(share.payee.clone()).or_insert(0) += share.share_difficulty;
        state.shares.push(share.clone());
        Ok(false)
    }

    fn write_block(&self, block: &BlockRecord) -> Result<bool, StoreError> {
        self.enter(LedgerOp::WriteBlock)?;
        let mut state = self.state.lock().unwrap();
        if !state.insert_fingerprint(block.share.fingerprint, block.share.height) {
            return Ok(true);
        }
        *state.round.entry(block.share.payee.clone()).or_insert(0) +=
            block.share.share_difficulty;
        let mut record = block.clone();
        record.round_shares = state.round.values().sum();
        state.round.clear();
        state.blocks.push(record);
        Ok(false)
    }

    fn round_shares(&self, payee: &PayeeAddress) -> Result<u64, StoreError> {
        self.enter(LedgerOp::RoundShares)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .round
            .get(payee)
            .copied()
            .unwrap_or(0))
    }

    fn block_candidates(&self) -> Result<Vec<BlockRecord>, StoreError> {
        self.enter(LedgerOp::BlockCandidates)?;
        let mut blocks = self.state.lock().unwrap().blocks.clone();
        blocks.sort_by_key(|b| b.share.height);
        Ok(blocks)
    }

    fn recent_shares(&self, now: Timestamp) -> Result<BTreeMap<PayeeAddress, u64>, StoreError> {
        self.enter(LedgerOp::RecentShares)?;
        let state = self.state.lock().unwrap();
        let mut totals = BTreeMap::new();
        let shares = state.shares.iter().chain(state.blocks.iter().map(|b| &b.share));
        for share in shares.filter(|s| s.hashrate_expiry() > now.as_secs()) {
            *totals.entry(share.payee.clone()).or_insert(0) += share.share_difficulty;
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(payee: &str, nonce: &str, height: u64) -> ShareRecord {
        ShareRecord {
            payee: address(payee),
            worker: "rig".to_string(),
            fingerprint: SolutionFingerprint::of(nonce, "0xaa", "0xbb"),
            share_difficulty: 100,
            height,
            timestamp: Timestamp::new(1),
            hashrate_window_secs: 600,
        }
    }

    #[test]
    fn duplicate_share_is_reported_and_not_written() {
        let ledger = NullLedger::new();
        assert!(!ledger.write_share(&share("Zx1", "0x1", 10)).unwrap());
        assert!(ledger.write_share(&share("Zx1", "0x1", 10)).unwrap());
        assert_eq!(ledger.shares().len(), 1);
        assert_eq!(ledger.round_shares(&address("Zx1")).unwrap(), 100);
    }

    #[test]
    fn recent_shares_respect_the_hashrate_window() {
        let ledger = NullLedger::new();
        ledger.write_share(&share("Zx1", "0x1", 10)).unwrap();
        let mut longer = share("Zx2", "0x2", 10);
        longer.hashrate_window_secs = 3_600;
        ledger.write_share(&longer).unwrap();

        let recent = ledger.recent_shares(Timestamp::new(500)).unwrap();
        assert_eq!(recent.len(), 2);
        let recent = ledger.recent_shares(Timestamp::new(601)).unwrap();
        assert_eq!(recent.into_iter().collect::<Vec<_>>(), vec![(address("Zx2"), 100)]);
    }

    #[test]
    fn old_fingerprints_are_pruned() {
        let ledger = NullLedger::new();
        ledger.write_share(&share("Zx1", "0x1", 10)).unwrap();
        ledger
            .write_share(&share("Zx1", "0x2", 10 + FINGERPRINT_WINDOW + 1))
            .unwrap();
        // pruned, so no longer detected as a duplicate
        assert!(!ledger.write_share(&share("Zx1", "0x1", 10)).unwrap());
    }

    #[test]
    fn settlement_cycle_moves_funds_and_releases_lock() {
        let ledger = NullLedger::new().with_balance("Zx1", 1000);
        let payee = address("Zx1");
        ledger
            .lock_payout(&PendingPayment::new(
                payee.clone(),
                Shannon::new(600),
                Timestamp::new(5),
            ))
            .unwrap();
        assert!(ledger.is_locked());
        ledger.debit_balance(&payee).unwrap();
        ledger.write_payment(&payee, "tx1").unwrap();

        let account = ledger.account_of("Zx1");
        assert_eq!(account.balance, Shannon::new(400));
        assert_eq!(account.pending, Shannon::ZERO);
        assert_eq!(account.paid, Shannon::new(600));
        assert!(!ledger.is_locked());
        assert!(ledger.pending().is_empty());
        assert_eq!(ledger.payments(&payee).unwrap()[0].tx_hash, "tx1");
    }

    #[test]
    fn second_lock_is_refused() {
        let ledger = NullLedger::new();
        let p = PendingPayment::new(address("Zx1"), Shannon::new(1), Timestamp::new(1));
        ledger.lock_payout(&p).unwrap();
        assert!(matches!(
            ledger.lock_payout(&p),
            Err(StoreError::PayoutsLocked)
        ));
    }

    #[test]
    fn debit_never_goes_negative() {
        let ledger = NullLedger::new().with_balance("Zx1", 5);
        let payee = address("Zx1");
        ledger
            .lock_payout(&PendingPayment::new(
                payee.clone(),
                Shannon::new(6),
                Timestamp::new(1),
            ))
            .unwrap();
        assert!(matches!(
            ledger.debit_balance(&payee),
            Err(StoreError::InsufficientBalance { .. })
        ));
        assert_eq!(ledger.balance_of("Zx1"), 5);
        assert!(!ledger.pending()[0].debited);
    }

    #[test]
    fn injected_failure_after_successes() {
        let ledger = NullLedger::new();
        ledger.fail_after(LedgerOp::Payees, 1);
        assert!(ledger.payees().is_ok());
        assert!(ledger.payees().is_err());
        assert_eq!(ledger.calls(LedgerOp::Payees), 2);
        ledger.heal();
        assert!(ledger.payees().is_ok());
    }

    #[test]
    fn block_closes_round() {
        let ledger = NullLedger::new();
        ledger.write_share(&share("Zx1", "0x1", 10)).unwrap();
        let block = BlockRecord {
            share: share("Zx2", "0x2", 10),
            block_difficulty: 5000,
            nonce: "0x2".to_string(),
            header: "0xaa".to_string(),
            round_shares: 0,
        };
        assert!(!ledger.write_block(&block).unwrap());
        assert_eq!(ledger.blocks()[0].round_shares, 200);
        assert_eq!(ledger.round_shares(&address("Zx1")).unwrap(), 0);
    }
}
