//! Settlement runs and the resolution pass against scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use trawl_nullables::{LedgerOp, NullDaemon, NullLedger, NullWallet};
use trawl_payouts::{PayoutError, PayoutProcessor, PayoutsConfig, ResolutionReport, StartupMode};
use trawl_rpc::{DaemonRpc, WalletRpc};
use trawl_store::{Ledger, PayeeStore, PendingPayment, StoreError};
use trawl_types::{Atomic, PayeeAddress, Shannon, Timestamp};

const BASE_FEE: u128 = 10_000_000_000;
const RICH: u128 = 10_000_000_000_000;

fn atomic(shannon: u64) -> u128 {
    u128::from(shannon) * 1_000_000_000
}

fn payee(s: &str) -> PayeeAddress {
    PayeeAddress::new(s).unwrap()
}

fn config() -> PayoutsConfig {
    PayoutsConfig {
        enabled: true,
        address: "Zxpool".to_string(),
        threshold: 100,
        ..PayoutsConfig::default()
    }
}

struct Harness {
    ledger: Arc<NullLedger>,
    daemon: Arc<NullDaemon>,
    wallet: Arc<NullWallet>,
    processor: PayoutProcessor,
}

impl Harness {
    fn new(config: PayoutsConfig, wallet_balance: u128) -> Self {
        let ledger = Arc::new(NullLedger::new());
        let daemon = Arc::new(NullDaemon::new("payouts"));
        let wallet = Arc::new(NullWallet::new(wallet_balance));
        let processor = PayoutProcessor::new(
            config,
            ledger.clone() as Arc<dyn Ledger>,
            daemon.clone() as Arc<dyn DaemonRpc>,
            wallet.clone() as Arc<dyn WalletRpc>,
        );
        Self {
            ledger,
            daemon,
            wallet,
            processor,
        }
    }

    fn funded() -> Self {
        Self::new(config(), RICH)
    }
}

#[tokio::test]
async fn batch_fee_remainder_goes_to_first_destination() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.ledger.set_balance("Zxb", 300);
    h.ledger.set_balance("Zxc", 200);

    let summary = h.processor.process().await;

    assert_eq!(summary.eligible, 3);
    assert_eq!(summary.paid, 3);
    assert_eq!(summary.total_paid, Shannon::new(1_000));
    let transfers = h.wallet.transfers();
    assert_eq!(transfers.len(), 1);
    let batch = &transfers[0];
    assert_eq!(batch.fee, Atomic::new(BASE_FEE));
    let amounts: Vec<u128> = batch.destinations.iter().map(|d| d.amount.raw()).collect();
    assert_eq!(
        amounts,
        vec![
            atomic(500) - 3_333_333_334,
            atomic(300) - 3_333_333_333,
            atomic(200) - 3_333_333_333,
        ]
    );
    let sent: u128 = amounts.iter().sum();
    assert_eq!(atomic(1_000) - sent, BASE_FEE);

    for name in ["Zxa", "Zxb", "Zxc"] {
        assert_eq!(h.ledger.balance_of(name), 0);
    }
    let payments = h.ledger.all_payments();
    assert_eq!(payments.len(), 3);
    assert!(payments.iter().all(|p| p.tx_hash == "tx1"));
    assert!(h.ledger.pending().is_empty());
    assert!(!h.ledger.is_locked());
}

#[tokio::test]
async fn integrated_address_is_paid_alone_minus_base_fee() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.ledger.set_balance("iZpay", 400);

    let summary = h.processor.process().await;

    assert_eq!(summary.paid, 2);
    let transfers = h.wallet.transfers();
    assert_eq!(transfers.len(), 2);
    assert_eq!(transfers[0].destinations.len(), 1);
    assert_eq!(transfers[0].destinations[0].address, "Zxa");
    assert_eq!(transfers[0].destinations[0].amount.raw(), atomic(500) - BASE_FEE);
    assert_eq!(transfers[1].destinations.len(), 1);
    assert_eq!(transfers[1].destinations[0].address, "iZpay");
    assert_eq!(transfers[1].destinations[0].amount.raw(), atomic(400) - BASE_FEE);
    assert_eq!(transfers[1].fee, Atomic::new(BASE_FEE));
    assert_eq!(h.ledger.balance_of("iZpay"), 0);
}

#[tokio::test]
async fn insufficient_pool_funds_halt_before_any_transfer() {
    let mut h = Harness::new(config(), atomic(100));
    h.ledger.set_balance("Zxa", 500);

    let summary = h.processor.process().await;

    assert_eq!(summary.paid, 0);
    assert!(h.processor.is_halted());
    assert!(matches!(
        h.processor.last_failure(),
        Some(PayoutError::InsufficientFunds { .. })
    ));
    assert_eq!(h.wallet.transfer_attempts(), 0);
    assert_eq!(h.ledger.calls(LedgerOp::LockPayout), 0);
    assert_eq!(h.ledger.balance_of("Zxa"), 500);
}

#[tokio::test]
async fn halted_processor_does_nothing() {
    let mut h = Harness::new(config(), atomic(100));
    h.ledger.set_balance("Zxa", 500);
    h.processor.process().await;
    assert!(h.processor.is_halted());

    h.wallet.set_balance(RICH);
    let ledger_calls = h.ledger.total_calls();
    let summary = h.processor.process().await;

    assert_eq!(summary.eligible, 0);
    assert_eq!(h.ledger.total_calls(), ledger_calls);
    assert_eq!(h.wallet.transfer_attempts(), 0);
    assert_eq!(h.ledger.balance_of("Zxa"), 500);
}

#[tokio::test]
async fn wallet_balance_failure_halts() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.wallet.fail_balance(true);

    h.processor.process().await;

    assert!(h.processor.is_halted());
    assert!(matches!(h.processor.last_failure(), Some(PayoutError::Rpc(_))));
    assert_eq!(h.ledger.calls(LedgerOp::Payees), 0);
}

#[tokio::test]
async fn balance_must_exceed_threshold() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 100);
    h.ledger.set_balance("Zxb", 101);

    let summary = h.processor.process().await;

    assert_eq!(summary.eligible, 1);
    assert_eq!(h.ledger.balance_of("Zxa"), 100);
    assert_eq!(h.ledger.balance_of("Zxb"), 0);
}

#[tokio::test]
async fn payee_threshold_overrides_only_above_ten() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.ledger.set_balance("Zxb", 50);
    h.ledger.set_threshold(&payee("Zxa"), Shannon::new(1_000)).unwrap();
    // Ten or less falls back to the pool threshold of 100.
    h.ledger.set_threshold(&payee("Zxb"), Shannon::new(10)).unwrap();

    let summary = h.processor.process().await;

    assert_eq!(summary.eligible, 0);
    assert_eq!(h.wallet.transfer_attempts(), 0);
    assert!(!h.processor.is_halted());
}

#[tokio::test]
async fn too_few_peers_stops_the_run_without_halting() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.daemon.set_peers(1);

    let summary = h.processor.process().await;
    assert_eq!(summary.paid, 0);
    assert_eq!(h.wallet.transfer_attempts(), 0);
    assert!(!h.processor.is_halted());

    h.daemon.set_peers(8);
    let summary = h.processor.process().await;
    assert_eq!(summary.paid, 1);
}

#[tokio::test]
async fn unreachable_daemon_is_a_soft_stop() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.daemon.set_unreachable(true);

    h.processor.process().await;

    assert!(!h.processor.is_halted());
    assert_eq!(h.wallet.transfer_attempts(), 0);
}

#[tokio::test]
async fn nothing_to_pay_is_not_an_error() {
    let mut h = Harness::funded();

    let summary = h.processor.process().await;

    assert_eq!(summary.eligible, 0);
    assert!(!h.processor.is_halted());
    assert_eq!(h.wallet.transfer_attempts(), 0);
}

#[tokio::test]
async fn network_charges_come_off_each_payee() {
    let mut h = Harness::new(
        PayoutsConfig {
            keep_nw_fees: true,
            nw_tx_gas: 1_000,
            nw_tx_gas_price: 1_000_000,
            ..config()
        },
        RICH,
    );
    h.ledger.set_balance("Zxa", 500);

    h.processor.process().await;

    let transfers = h.wallet.transfers();
    assert_eq!(
        transfers[0].destinations[0].amount.raw(),
        atomic(500) - 1_000_000_000 - BASE_FEE
    );
    assert_eq!(h.ledger.balance_of("Zxa"), 0);
}

#[tokio::test]
async fn batch_member_below_its_fee_share_is_skipped() {
    let mut h = Harness::new(
        PayoutsConfig {
            threshold: 0,
            ..config()
        },
        RICH,
    );
    h.ledger.set_balance("Zxa", 500);
    h.ledger.set_balance("Zxb", 1);

    let summary = h.processor.process().await;

    assert_eq!(summary.paid, 1);
    let transfers = h.wallet.transfers();
    assert_eq!(transfers[0].destinations.len(), 1);
    assert_eq!(transfers[0].destinations[0].amount.raw(), atomic(500) - BASE_FEE);
    assert_eq!(h.ledger.balance_of("Zxb"), 1);
}

#[tokio::test]
async fn batch_transfer_failure_leaves_ledger_untouched() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.ledger.set_balance("Zxb", 300);
    h.wallet.fail_transfers_after(0);

    h.processor.process().await;

    assert!(h.processor.is_halted());
    assert_eq!(h.ledger.calls(LedgerOp::LockPayout), 0);
    assert_eq!(h.ledger.calls(LedgerOp::DebitBalance), 0);
    assert_eq!(h.ledger.balance_of("Zxa"), 500);
    assert_eq!(h.ledger.balance_of("Zxb"), 300);
    assert!(!h.ledger.is_locked());
}

#[tokio::test]
async fn debit_failure_leaves_a_submitted_pending_record() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.ledger.set_balance("Zxb", 300);
    h.ledger.fail_on(LedgerOp::DebitBalance);

    h.processor.process().await;

    assert!(h.processor.is_halted());
    let pending = h.ledger.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].address, payee("Zxa"));
    assert_eq!(pending[0].tx_hash.as_deref(), Some("tx1"));
    assert!(!pending[0].debited);
    assert!(h.ledger.is_locked());
    assert_eq!(h.ledger.calls(LedgerOp::LockPayout), 1);
    assert_eq!(h.ledger.balance_of("Zxb"), 300);

    h.ledger.heal();
    let report = h.processor.resolve().await.unwrap();
    assert_eq!(
        report,
        ResolutionReport {
            settled_forward: 1,
            ..ResolutionReport::default()
        }
    );
    assert_eq!(h.ledger.balance_of("Zxa"), 0);
    assert_eq!(h.ledger.all_payments().len(), 1);
    assert!(!h.ledger.is_locked());
}

#[tokio::test]
async fn batch_crash_stops_the_integrated_group() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.ledger.set_balance("iZpay", 400);
    h.ledger.fail_on(LedgerOp::DebitBalance);

    h.processor.process().await;

    assert_eq!(h.wallet.transfers().len(), 1);
    assert_eq!(h.ledger.calls(LedgerOp::LockPayout), 1);
    assert_eq!(h.ledger.balance_of("iZpay"), 400);
    assert_eq!(h.ledger.pending().len(), 1);
    assert!(matches!(
        h.processor.last_failure(),
        Some(PayoutError::Store(StoreError::Backend(_)))
    ));
}

#[tokio::test]
async fn failed_batch_transfer_stops_the_integrated_group() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.ledger.set_balance("iZpay", 400);
    h.wallet.fail_transfers_after(0);

    h.processor.process().await;

    assert!(h.processor.is_halted());
    assert_eq!(h.wallet.transfer_attempts(), 1);
    assert!(matches!(h.processor.last_failure(), Some(PayoutError::Rpc(_))));
    assert_eq!(h.ledger.calls(LedgerOp::LockPayout), 0);
    assert!(h.ledger.pending().is_empty());
    assert!(!h.ledger.is_locked());
    assert_eq!(h.ledger.balance_of("iZpay"), 400);
    assert_eq!(h.ledger.balance_of("Zxa"), 500);
}

#[tokio::test]
async fn failed_integrated_transfer_is_credited_back() {
    let mut h = Harness::funded();
    h.ledger.set_balance("iZpay", 400);
    h.wallet.fail_transfers_after(0);

    h.processor.process().await;

    assert!(h.processor.is_halted());
    let pending = h.ledger.pending();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].debited);
    assert_eq!(pending[0].tx_hash, None);

    let report = h.processor.resolve().await.unwrap();
    assert_eq!(report.credited_back, 1);
    assert_eq!(h.ledger.balance_of("iZpay"), 400);
    assert!(!h.ledger.is_locked());
}

#[tokio::test]
async fn unrecorded_integrated_transfer_halts_with_debit_in_place() {
    let mut h = Harness::funded();
    h.ledger.set_balance("iZpay", 400);
    h.ledger.fail_on(LedgerOp::MarkSubmitted);

    h.processor.process().await;

    assert!(h.processor.is_halted());
    assert_eq!(h.wallet.transfers().len(), 1);
    assert_eq!(h.ledger.balance_of("iZpay"), 0);
    assert_eq!(h.ledger.calls(LedgerOp::WritePayment), 0);
}

#[tokio::test]
async fn payment_log_failure_is_settled_forward() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.ledger.fail_on(LedgerOp::WritePayment);

    h.processor.process().await;
    assert!(h.processor.is_halted());
    let pending = h.ledger.pending();
    assert!(pending[0].debited);
    assert_eq!(pending[0].tx_hash.as_deref(), Some("tx1"));

    h.ledger.heal();
    let report = h.processor.resolve().await.unwrap();
    assert_eq!(report.settled_forward, 1);
    assert_eq!(h.ledger.calls(LedgerOp::DebitBalance), 1);
    assert_eq!(h.ledger.account_of("Zxa").paid, Shannon::new(500));
    assert_eq!(h.ledger.balance_of("Zxa"), 0);
}

#[tokio::test]
async fn bgsave_follows_successful_payments() {
    let mut h = Harness::new(
        PayoutsConfig {
            bgsave: true,
            ..config()
        },
        RICH,
    );
    h.ledger.set_balance("Zxa", 500);

    h.processor.process().await;
    assert_eq!(h.ledger.snapshots(), 1);

    h.processor.process().await;
    assert_eq!(h.ledger.snapshots(), 1);
}

#[tokio::test]
async fn preflight_refuses_pending_payments() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    h.ledger.seed_pending(PendingPayment::new(
        payee("Zxb"),
        Shannon::new(10),
        Timestamp::new(1),
    ));
    let (_tx, rx) = broadcast::channel(1);

    let err = h.processor.start(StartupMode::Settle, rx).await.unwrap_err();

    assert!(matches!(err, PayoutError::PendingPaymentsExist(1)));
    assert_eq!(h.wallet.transfer_attempts(), 0);
    assert_eq!(h.ledger.calls(LedgerOp::Payees), 0);
}

#[tokio::test]
async fn preflight_refuses_a_held_lock() {
    let h = Harness::funded();
    h.ledger.set_locked(true);

    let err = h.processor.preflight().await.unwrap_err();
    assert!(matches!(err, PayoutError::PayoutsLocked));
}

#[tokio::test]
async fn preflight_refuses_a_failed_lock_check() {
    let h = Harness::funded();
    h.ledger.fail_on(LedgerOp::IsPayoutsLocked);

    let err = h.processor.preflight().await.unwrap_err();
    assert!(matches!(err, PayoutError::Store(_)));
}

#[tokio::test]
async fn preflight_refuses_a_locked_wallet() {
    let h = Harness::funded();
    h.wallet.set_locked(true);

    let err = h.processor.preflight().await.unwrap_err();
    assert!(matches!(err, PayoutError::WalletLocked(_)));
    assert!(h.processor.preflight().await.is_err());

    h.wallet.set_locked(false);
    assert!(h.processor.preflight().await.is_ok());
}

#[tokio::test]
async fn resolution_with_nothing_pending_leaves_the_lock_alone() {
    let h = Harness::funded();
    h.ledger.set_locked(true);

    let report = h.processor.resolve().await.unwrap();

    assert_eq!(report, ResolutionReport::default());
    assert!(h.ledger.is_locked());
    assert_eq!(h.ledger.calls(LedgerOp::UnlockPayouts), 0);
}

#[tokio::test]
async fn resolution_is_idempotent() {
    let h = Harness::funded();
    h.ledger.seed_pending(PendingPayment {
        debited: true,
        ..PendingPayment::new(payee("Zxa"), Shannon::new(50), Timestamp::new(1))
    });
    h.ledger.seed_pending(PendingPayment::new(
        payee("Zxb"),
        Shannon::new(20),
        Timestamp::new(1),
    ));

    let first = h.processor.resolve().await.unwrap();
    assert_eq!(first.credited_back, 1);
    assert_eq!(first.discarded, 1);
    assert_eq!(h.ledger.balance_of("Zxa"), 50);
    assert!(!h.ledger.is_locked());

    let second = h.processor.resolve().await.unwrap();
    assert_eq!(second, ResolutionReport::default());
    assert_eq!(h.ledger.balance_of("Zxa"), 50);
    assert_eq!(h.ledger.calls(LedgerOp::UnlockPayouts), 1);
}

#[tokio::test]
async fn resolution_stops_at_first_failure() {
    let h = Harness::funded();
    for name in ["Zxa", "Zxb"] {
        h.ledger.seed_pending(PendingPayment {
            debited: true,
            ..PendingPayment::new(payee(name), Shannon::new(50), Timestamp::new(1))
        });
    }
    h.ledger.fail_after(LedgerOp::RollbackBalance, 1);

    assert!(h.processor.resolve().await.is_err());
    assert_eq!(h.ledger.pending().len(), 1);
    assert!(h.ledger.is_locked());

    h.ledger.heal();
    let report = h.processor.resolve().await.unwrap();
    assert_eq!(report.credited_back, 1);
    assert_eq!(h.ledger.balance_of("Zxa"), 50);
    assert_eq!(h.ledger.balance_of("Zxb"), 50);
    assert!(!h.ledger.is_locked());
}

#[tokio::test]
async fn resolve_mode_repairs_and_returns() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxb", 500);
    h.ledger.seed_pending(PendingPayment {
        debited: true,
        ..PendingPayment::new(payee("Zxa"), Shannon::new(50), Timestamp::new(1))
    });
    let (_tx, rx) = broadcast::channel(1);

    h.processor.start(StartupMode::Resolve, rx).await.unwrap();

    assert!(h.ledger.pending().is_empty());
    assert_eq!(h.wallet.transfer_attempts(), 0);
    assert_eq!(h.ledger.balance_of("Zxb"), 500);
}

#[tokio::test]
async fn periodic_loop_runs_once_then_honours_shutdown() {
    let mut h = Harness::funded();
    h.ledger.set_balance("Zxa", 500);
    let (tx, rx) = broadcast::channel(1);
    tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), h.processor.run_periodic(rx))
        .await
        .expect("loop should stop on shutdown");

    assert_eq!(h.wallet.transfers().len(), 1);
    assert_eq!(h.ledger.balance_of("Zxa"), 0);
}
