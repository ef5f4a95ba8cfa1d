//! Share pipeline behavior against scripted collaborators.

use std::sync::Arc;

use trawl_nullables::{LedgerOp, NullDaemon, NullLedger, SubmitBehavior};
use trawl_proxy::{
    BlockTemplate, BlockTemplateStore, ShareSubmissionPipeline, Submission, UpstreamSet, Verdict,
};
use trawl_rpc::DaemonRpc;
use trawl_store::{Ledger, PayeeStore, ShareStore};
use trawl_types::PayeeAddress;

const SHARE_DIFFICULTY: u64 = 1_000;
const SHARE_NONCE: &str = "0x11";
const BLOCK_NONCE: &str = "0x0102030405060708";
const WEAK_NONCE: &str = "0x22";

struct Harness {
    daemon: Arc<NullDaemon>,
    ledger: Arc<NullLedger>,
    templates: Arc<BlockTemplateStore>,
    pipeline: ShareSubmissionPipeline,
}

impl Harness {
    async fn new() -> Self {
        Self::with_backlog(3).await
    }

    async fn with_backlog(max_backlog: u64) -> Self {
        let daemon = Arc::new(NullDaemon::new("main"));
        daemon.set_strength(SHARE_NONCE, SHARE_DIFFICULTY);
        daemon.set_strength(BLOCK_NONCE, NullDaemon::BLOCK_DIFFICULTY);
        daemon.set_strength(WEAK_NONCE, SHARE_DIFFICULTY - 1);

        let ledger = Arc::new(NullLedger::new());
        let upstreams = Arc::new(
            UpstreamSet::new(vec![daemon.clone() as Arc<dyn DaemonRpc>], "Zxpool").unwrap(),
        );
        let templates = Arc::new(BlockTemplateStore::new(upstreams.clone(), max_backlog));
        templates.refresh().await.unwrap();
        let pipeline = ShareSubmissionPipeline::new(
            templates.clone(),
            upstreams,
            ledger.clone() as Arc<dyn Ledger>,
            SHARE_DIFFICULTY,
            600,
        );
        Self {
            daemon,
            ledger,
            templates,
            pipeline,
        }
    }

    fn template(&self) -> Arc<BlockTemplate> {
        self.templates.current().unwrap()
    }

    fn submission(&self, nonce: &str) -> Submission {
        Submission {
            payee: PayeeAddress::new("Zxminer").unwrap(),
            worker: "rig1".to_string(),
            ip: "10.1.2.3".to_string(),
            nonce: nonce.to_string(),
            header: self.template().header.clone(),
            aux_digest: "0xmix".to_string(),
        }
    }

    async fn submit(&self, nonce: &str) -> (bool, bool) {
        let template = self.template();
        self.pipeline.submit(&template, &self.submission(nonce)).await
    }
}

#[tokio::test]
async fn stale_header_touches_nothing() {
    let h = Harness::new().await;
    let mut sub = h.submission(SHARE_NONCE);
    sub.header = "0xunknown".to_string();
    let verdict = h.pipeline.evaluate(&h.template(), &sub).await;
    assert_eq!(verdict, Verdict::Stale);
    assert_eq!(verdict.as_pair(), (false, false));
    assert!(h.daemon.verify_calls().is_empty());
    assert_eq!(h.ledger.total_calls(), 0);
}

#[tokio::test]
async fn solution_below_share_difficulty_is_invalid() {
    let h = Harness::new().await;
    assert_eq!(h.submit(WEAK_NONCE).await, (false, false));
    assert_eq!(h.daemon.verify_calls().len(), 1);
    assert_eq!(h.ledger.total_calls(), 0);
    assert_eq!(h.pipeline.stats().get("shares_invalid"), 1);
}

#[tokio::test]
async fn verifier_error_on_low_bar_never_writes() {
    let h = Harness::new().await;
    h.daemon.fail_verify(true);
    assert_eq!(h.submit(SHARE_NONCE).await, (false, false));
    assert_eq!(h.ledger.total_calls(), 0);
}

#[tokio::test]
async fn malformed_nonce_is_invalid() {
    let h = Harness::new().await;
    assert_eq!(h.submit("0xnothex").await, (false, false));
    assert!(h.daemon.verify_calls().is_empty());
}

#[tokio::test]
async fn valid_share_is_credited_once() {
    let h = Harness::new().await;
    assert_eq!(h.submit(SHARE_NONCE).await, (false, true));
    assert_eq!(h.submit(SHARE_NONCE).await, (true, false));

    let shares = h.ledger.shares();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].share_difficulty, SHARE_DIFFICULTY);
    assert_eq!(shares[0].height, 100);
    assert_eq!(
        h.ledger.account_of("Zxminer").last_ip.as_deref(),
        Some("10.1.2.3")
    );

    let checks = h.daemon.verify_calls();
    assert_eq!(checks[0].difficulty_hex, format!("0x{SHARE_DIFFICULTY:x}"));
    assert_eq!(
        checks[1].difficulty_hex,
        format!("0x{:x}", NullDaemon::BLOCK_DIFFICULTY)
    );
    assert_eq!(h.pipeline.stats().get("shares_valid"), 1);
    assert_eq!(h.pipeline.stats().get("shares_duplicate"), 1);
}

#[tokio::test]
async fn ip_is_logged_even_for_blocks() {
    let h = Harness::new().await;
    h.submit(BLOCK_NONCE).await;
    assert_eq!(h.ledger.calls(LedgerOp::LogIp), 1);
}

#[tokio::test]
async fn accepted_block_is_submitted_refreshed_and_recorded() {
    let h = Harness::new().await;
    let latest_before = h.daemon.latest_calls();

    assert_eq!(h.submit(BLOCK_NONCE).await, (false, true));

    let submitted = h.daemon.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(&submitted[0][..2], "00");
    assert_eq!(&submitted[0][2..18], "0807060504030201");
    assert_eq!(h.daemon.latest_calls(), latest_before + 1);

    let blocks = h.ledger.blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].block_difficulty, NullDaemon::BLOCK_DIFFICULTY);
    assert!(h.ledger.shares().is_empty());
    assert_eq!(h.pipeline.stats().get("blocks_found"), 1);
}

#[tokio::test]
async fn resubmitted_block_is_duplicate() {
    let h = Harness::new().await;
    let template = h.template();
    let sub = h.submission(BLOCK_NONCE);
    assert_eq!(h.pipeline.submit(&template, &sub).await, (false, true));
    assert_eq!(h.pipeline.submit(&template, &sub).await, (true, false));
    assert_eq!(h.ledger.blocks().len(), 1);
}

#[tokio::test]
async fn rejected_block_is_not_downgraded_to_share() {
    let h = Harness::new().await;
    h.daemon.set_submit_behavior(SubmitBehavior::Reject);
    assert_eq!(h.submit(BLOCK_NONCE).await, (false, false));
    assert!(h.ledger.shares().is_empty());
    assert!(h.ledger.blocks().is_empty());
    assert_eq!(h.pipeline.stats().get("blocks_rejected"), 1);
}

#[tokio::test]
async fn block_submit_error_is_not_accepted() {
    let h = Harness::new().await;
    h.daemon.set_submit_behavior(SubmitBehavior::Error);
    assert_eq!(h.submit(BLOCK_NONCE).await, (false, false));
    assert!(h.ledger.blocks().is_empty());
    assert_eq!(h.pipeline.stats().get("block_submit_errors"), 1);
}

#[tokio::test]
async fn ledger_failure_after_acceptance_still_acknowledges() {
    let h = Harness::new().await;
    h.ledger.fail_on(LedgerOp::WriteBlock);
    assert_eq!(h.submit(BLOCK_NONCE).await, (false, true));

    h.ledger.fail_on(LedgerOp::WriteShare);
    assert_eq!(h.submit(SHARE_NONCE).await, (false, true));
}

#[tokio::test]
async fn submission_against_older_snapshot_within_backlog() {
    let h = Harness::new().await;
    let old = h.template();
    let sub = h.submission(SHARE_NONCE);

    h.daemon.advance(101, "0xtip2");
    h.templates.refresh().await.unwrap();
    assert_ne!(h.template().header, old.header);

    assert_eq!(h.pipeline.submit(&h.template(), &sub).await, (false, true));
    let payee = PayeeAddress::new("Zxminer").unwrap();
    assert_eq!(h.ledger.round_shares(&payee).unwrap(), SHARE_DIFFICULTY);
    assert_eq!(h.ledger.balance(&payee).unwrap().raw(), 0);
}

#[tokio::test]
async fn header_outside_backlog_is_stale() {
    let h = Harness::new().await;
    let sub = h.submission(SHARE_NONCE);
    h.daemon.advance(104, "0xtip5");
    h.templates.refresh().await.unwrap();
    assert_eq!(h.pipeline.evaluate(&h.template(), &sub).await, Verdict::Stale);
}

#[tokio::test]
async fn wide_backlog_never_credits_a_solution_twice() {
    let h = Harness::with_backlog(20).await;
    let first = h.submission(SHARE_NONCE);
    assert_eq!(h.submit(SHARE_NONCE).await, (false, true));

    h.daemon.advance(110, "0xtip11");
    h.templates.refresh().await.unwrap();
    let mut other = h.submission(SHARE_NONCE);
    other.payee = PayeeAddress::new("Zxother").unwrap();
    assert_eq!(h.pipeline.submit(&h.template(), &other).await, (false, true));

    let again = h.pipeline.submit(&h.template(), &first).await;
    assert_ne!(again, (false, true));
    assert_eq!(h.ledger.shares().len(), 2);
}
