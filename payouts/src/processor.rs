//! The periodic settlement loop and the manual resolution pass.

use std::sync::Arc;

use tokio::sync::broadcast;
use trawl_rpc::{DaemonRpc, TransferDestination, WalletRpc};
use trawl_store::{Ledger, PendingPayment};
use trawl_types::{AddressKind, Atomic, PayeeAddress, Shannon, Timestamp};

use crate::fees::{fee_shares, split_batch_fee};
use crate::{PayoutError, PayoutsConfig};

/// Payee thresholds at or below this are treated as unset.
const MIN_PAYEE_THRESHOLD: u64 = 10;

/// Message signed to probe that the wallet is unlocked.
const SIGN_PROBE: &str = "0x0";

/// How the processor is started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartupMode {
    /// Run the periodic settlement loop.
    Settle,
    /// Repair pending payments left by a crashed run, then return.
    Resolve,
}

/// Outcome of one `process()` run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Payees whose balance crossed their threshold.
    pub eligible: usize,
    /// Payees whose settlement fully completed.
    pub paid: usize,
    pub total_paid: Shannon,
}

/// What the resolution pass did with each pending record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub credited_back: usize,
    pub settled_forward: usize,
    pub discarded: usize,
}

/// One payee selected for this run.
#[derive(Clone, Debug)]
struct Payment {
    payee: PayeeAddress,
    /// Ledger amount to debit.
    amount: Shannon,
    /// Wallet amount before the base fee, after network charges.
    gross: Atomic,
}

#[derive(Debug, Default)]
struct Plan {
    batch: Vec<Payment>,
    integrated: Vec<Payment>,
    eligible: usize,
    total: Atomic,
}

/// Drains qualifying payee balances into wallet transfers.
///
/// Any error touching balances or transfers sets the halt latch; after that
/// [`process`](Self::process) does nothing until the process is restarted.
pub struct PayoutProcessor {
    config: PayoutsConfig,
    ledger: Arc<dyn Ledger>,
    daemon: Arc<dyn DaemonRpc>,
    wallet: Arc<dyn WalletRpc>,
    halted: bool,
    last_failure: Option<PayoutError>,
}

impl PayoutProcessor {
    pub fn new(
        config: PayoutsConfig,
        ledger: Arc<dyn Ledger>,
        daemon: Arc<dyn DaemonRpc>,
        wallet: Arc<dyn WalletRpc>,
    ) -> Self {
        Self {
            config,
            ledger,
            daemon,
            wallet,
            halted: false,
            last_failure: None,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn last_failure(&self) -> Option<&PayoutError> {
        self.last_failure.as_ref()
    }

    /// Entry point selected by the operator.
    pub async fn start(
        &mut self,
        mode: StartupMode,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), PayoutError> {
        tracing::info!(?mode, "starting payouts");
        match mode {
            StartupMode::Resolve => {
                let report = self.resolve().await?;
                tracing::info!(
                    credited_back = report.credited_back,
                    settled_forward = report.settled_forward,
                    discarded = report.discarded,
                    "resolution finished, restart in settle mode for normal operation"
                );
                Ok(())
            }
            StartupMode::Settle => {
                self.preflight().await?;
                self.run_periodic(shutdown_rx).await;
                Ok(())
            }
        }
    }

    /// Refuse to settle while a previous run is unresolved or the wallet is
    /// locked.
    pub async fn preflight(&self) -> Result<(), PayoutError> {
        let pending = self.ledger.pending_payments()?;
        if !pending.is_empty() {
            tracing::error!(
                "previous payout failed, you have to resolve it. List of failed payments:\n{}",
                format_pending_payments(&pending)
            );
            return Err(PayoutError::PendingPaymentsExist(pending.len()));
        }
        if self.ledger.is_payouts_locked()? {
            tracing::error!("unable to start payouts because they are locked");
            return Err(PayoutError::PayoutsLocked);
        }
        if let Err(e) = self.wallet.sign(&self.config.address, SIGN_PROBE).await {
            tracing::error!(error = %e, "unable to process payouts, wallet is locked");
            return Err(PayoutError::WalletLocked(e));
        }
        Ok(())
    }

    /// Run [`process`](Self::process) now and then every interval, measured
    /// from the end of the previous run, until shutdown.
    pub async fn run_periodic(&mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let interval = self.config.interval();
        tracing::info!(interval_secs = interval.as_secs(), "set payouts interval");
        loop {
            self.process().await;
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::info!("payouts shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One settlement run.
    pub async fn process(&mut self) -> RunSummary {
        if self.halted {
            if let Some(e) = &self.last_failure {
                tracing::warn!(error = %e, "payments suspended due to last critical error");
            }
            return RunSummary::default();
        }

        let pool_balance = match self.wallet.balance().await {
            Ok(balance) => balance,
            Err(e) => {
                self.halt(e.into());
                return RunSummary::default();
            }
        };

        let payees = match self.ledger.payees() {
            Ok(payees) => payees,
            Err(e) => {
                tracing::error!(error = %e, "error while retrieving payees from backend");
                return RunSummary::default();
            }
        };

        let plan = match self.plan(&payees).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(error = %e, "error while selecting payees");
                return RunSummary::default();
            }
        };

        let mut summary = RunSummary {
            eligible: plan.eligible,
            ..RunSummary::default()
        };
        if plan.batch.is_empty() && plan.integrated.is_empty() {
            tracing::info!(eligible = plan.eligible, "nothing to pay");
            return summary;
        }

        if pool_balance < plan.total {
            self.halt(PayoutError::InsufficientFunds {
                needed: plan.total,
                available: pool_balance,
            });
            return summary;
        }

        if !plan.batch.is_empty() {
            self.pay_batch(&plan.batch, &mut summary).await;
        }
        if self.halted {
            tracing::warn!(
                skipped = plan.integrated.len(),
                "halted during batch, integrated payments not sent"
            );
        } else {
            for payment in &plan.integrated {
                if !self.pay_integrated(payment, &mut summary).await {
                    break;
                }
            }
        }

        tracing::info!(
            total = %summary.total_paid,
            paid = summary.paid,
            eligible = summary.eligible,
            "paid total"
        );
        if summary.paid > 0 && self.config.bgsave {
            self.bgsave();
        }
        summary
    }

    /// Select payees over threshold and size their transfers.
    async fn plan(&self, payees: &[PayeeAddress]) -> Result<Plan, PayoutError> {
        let default_threshold = self.config.threshold();
        let charges = self.config.tx_charges();
        let base_fee = self.config.base_fee();
        let mut plan = Plan::default();

        for payee in payees {
            let account = self.ledger.account(payee)?;
            let threshold = if account.threshold.raw() > MIN_PAYEE_THRESHOLD {
                account.threshold
            } else {
                default_threshold
            };
            if account.balance <= threshold {
                continue;
            }
            plan.eligible += 1;

            if !self.check_peers().await {
                break;
            }

            let gross = match account.balance.to_atomic().checked_sub(charges) {
                Some(gross) if !gross.is_zero() => gross,
                _ => {
                    tracing::warn!(%payee, balance = %account.balance, "balance does not cover network charges, skipping");
                    continue;
                }
            };
            let payment = Payment {
                payee: payee.clone(),
                amount: account.balance,
                gross,
            };
            match payee.kind() {
                AddressKind::Integrated if gross <= base_fee => {
                    tracing::warn!(%payee, "amount does not cover the base fee, skipping");
                    continue;
                }
                AddressKind::Integrated => plan.integrated.push(payment),
                AddressKind::Standard => plan.batch.push(payment),
            }
            plan.total = plan.total.try_add(gross)?;
        }

        // Drop batch members that cannot cover their fee share, re-splitting
        // among the rest until every share fits.
        loop {
            let shares = fee_shares(plan.batch.len(), base_fee);
            let Some(index) = shares
                .iter()
                .zip(&plan.batch)
                .position(|(share, p)| p.gross <= *share)
            else {
                break;
            };
            let dropped = plan.batch.remove(index);
            tracing::warn!(payee = %dropped.payee, "amount does not cover its fee share, skipping");
            plan.total = plan.total.try_sub(dropped.gross)?;
        }

        Ok(plan)
    }

    async fn check_peers(&self) -> bool {
        match self.daemon.peer_count().await {
            Ok(peers) if peers >= self.config.require_peers => true,
            Ok(peers) => {
                tracing::warn!(
                    peers,
                    required = self.config.require_peers,
                    "number of peers on the node is less than required"
                );
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to retrieve number of peers from node");
                false
            }
        }
    }

    async fn pay_batch(&mut self, batch: &[Payment], summary: &mut RunSummary) {
        let base_fee = self.config.base_fee();
        let gross: Vec<Atomic> = batch.iter().map(|p| p.gross).collect();
        let net = match split_batch_fee(&gross, base_fee) {
            Ok(net) => net,
            Err(e) => {
                self.halt(e);
                return;
            }
        };
        let destinations: Vec<TransferDestination> = batch
            .iter()
            .zip(net)
            .map(|(p, amount)| TransferDestination::new(p.payee.as_str(), amount))
            .collect();

        let tx_hash = match self
            .wallet
            .transfer(&destinations, base_fee, self.config.mixin)
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                tracing::error!(
                    destinations = destinations.len(),
                    "failed to send batch payment, check outgoing transactions in the wallet"
                );
                self.halt(e.into());
                return;
            }
        };

        for payment in batch {
            let pending = PendingPayment::submitted(
                payment.payee.clone(),
                payment.amount,
                Timestamp::now(),
                tx_hash.clone(),
            );
            if let Err(e) = self.reserve(&pending).and_then(|()| self.record(&pending, &tx_hash)) {
                self.halt(e);
                return;
            }
            summary.paid += 1;
            summary.total_paid = summary.total_paid.saturating_add(payment.amount);
            tracing::info!(payee = %payment.payee, amount = %payment.amount, %tx_hash, "paid standard address");
        }
    }

    /// Settle one integrated address in its own transaction. Returns `false`
    /// if the processor halted.
    async fn pay_integrated(&mut self, payment: &Payment, summary: &mut RunSummary) -> bool {
        let base_fee = self.config.base_fee();
        let pending = PendingPayment::new(payment.payee.clone(), payment.amount, Timestamp::now());
        if let Err(e) = self.reserve(&pending) {
            self.halt(e);
            return false;
        }

        let amount = match payment.gross.try_sub(base_fee) {
            Ok(amount) => amount,
            Err(e) => {
                self.halt(e.into());
                return false;
            }
        };
        let destination = [TransferDestination::new(payment.payee.as_str(), amount)];
        let tx_hash = match self
            .wallet
            .transfer(&destination, base_fee, self.config.mixin)
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                tracing::error!(payee = %payment.payee, "failed to send payment, balance stays reserved until resolved");
                self.halt(e.into());
                return false;
            }
        };

        if let Err(e) = self.ledger.mark_submitted(&payment.payee, &tx_hash) {
            tracing::error!(
                payee = %payment.payee,
                amount = %payment.amount,
                %tx_hash,
                "transfer sent but not recorded, settle this payment forward before resolving"
            );
            self.halt(e.into());
            return false;
        }
        if let Err(e) = self.record(&pending, &tx_hash) {
            self.halt(e);
            return false;
        }

        summary.paid += 1;
        summary.total_paid = summary.total_paid.saturating_add(payment.amount);
        tracing::info!(payee = %payment.payee, amount = %payment.amount, %tx_hash, "paid integrated address");
        true
    }

    /// Lock the payout and debit the payee.
    fn reserve(&self, pending: &PendingPayment) -> Result<(), PayoutError> {
        let payee = &pending.address;
        self.ledger.lock_payout(pending).map_err(|e| {
            tracing::error!(%payee, error = %e, "failed to lock payment");
            e
        })?;
        tracing::info!(%payee, amount = %pending.amount, "locked payment");
        self.ledger.debit_balance(payee).map_err(|e| {
            tracing::error!(%payee, amount = %pending.amount, error = %e, "failed to update balance");
            e
        })?;
        Ok(())
    }

    fn record(&self, pending: &PendingPayment, tx_hash: &str) -> Result<(), PayoutError> {
        self.ledger
            .write_payment(&pending.address, tx_hash)
            .map_err(|e| {
                tracing::error!(
                    payee = %pending.address,
                    amount = %pending.amount,
                    %tx_hash,
                    error = %e,
                    "failed to log payment data"
                );
                e.into()
            })
    }

    /// Latch the halt. The first failure is the one reported afterwards.
    fn halt(&mut self, error: PayoutError) {
        tracing::error!(error = %error, "payouts halted");
        self.halted = true;
        self.last_failure.get_or_insert(error);
    }

    fn bgsave(&self) {
        match self.ledger.snapshot() {
            Ok(status) => tracing::info!(%status, "saving backend state to disk"),
            Err(e) => tracing::warn!(error = %e, "failed to save backend state"),
        }
    }

    /// Repair pending payments left by a crashed run.
    ///
    /// Records with a known transaction are settled forward, debited records
    /// without one are credited back, and records never debited are dropped.
    /// Stops at the first failure; the rest stay for another pass. The global
    /// lock is released once every record is cleared.
    pub async fn resolve(&self) -> Result<ResolutionReport, PayoutError> {
        let pending = self.ledger.pending_payments()?;
        let mut report = ResolutionReport::default();

        if pending.is_empty() {
            tracing::info!("no pending payments to resolve");
            if self.config.bgsave {
                self.bgsave();
            }
            return Ok(report);
        }

        tracing::info!(
            "will resolve the following payments:\n{}",
            format_pending_payments(&pending)
        );
        for record in &pending {
            let payee = &record.address;
            let result = match (&record.tx_hash, record.debited) {
                (Some(tx_hash), debited) => {
                    let settled = if debited {
                        Ok(())
                    } else {
                        self.ledger.debit_balance(payee)
                    };
                    settled.and_then(|()| self.ledger.write_payment(payee, tx_hash))
                        .map(|()| {
                            report.settled_forward += 1;
                            tracing::info!(%payee, amount = %record.amount, %tx_hash, "settled payment forward");
                        })
                }
                (None, true) => self.ledger.rollback_balance(payee).map(|()| {
                    report.credited_back += 1;
                    tracing::info!(%payee, amount = %record.amount, "credited back");
                }),
                (None, false) => self.ledger.discard_pending(payee).map(|()| {
                    report.discarded += 1;
                    tracing::info!(%payee, amount = %record.amount, "dropped pending payment that was never debited");
                }),
            };
            if let Err(e) = result {
                tracing::error!(%payee, amount = %record.amount, error = %e, "failed to resolve pending payment");
                return Err(e.into());
            }
        }

        self.ledger.unlock_payouts()?;
        if self.config.bgsave {
            self.bgsave();
        }
        tracing::info!("payouts unlocked");
        Ok(report)
    }
}

/// One line per pending payment, for operator-facing logs.
pub fn format_pending_payments(list: &[PendingPayment]) -> String {
    list.iter()
        .map(|p| {
            let state = match (&p.tx_hash, p.debited) {
                (Some(tx), _) => format!("submitted in {tx}"),
                (None, true) => "debited".to_string(),
                (None, false) => "locked".to_string(),
            };
            format!(
                "\tAddress: {}, Amount: {}, at {}s, {}\n",
                p.address,
                p.amount,
                p.timestamp.as_secs(),
                state
            )
        })
        .collect()
}
