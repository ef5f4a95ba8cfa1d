//! Solution validation and ledger recording.

use std::sync::Arc;

use trawl_rpc::SolutionParams;
use trawl_store::{BlockRecord, Ledger, ShareRecord, SolutionFingerprint};
use trawl_types::{PayeeAddress, Timestamp};
use trawl_utils::StatsCounter;

use crate::template::{BlockTemplate, BlockTemplateStore, HeaderRecord};
use crate::upstream::UpstreamSet;
use crate::work::{difficulty_hex, parse_nonce, splice_nonce};

/// Counter names maintained by the pipeline.
pub const SHARE_COUNTERS: &[&str] = &[
    "shares_valid",
    "shares_stale",
    "shares_invalid",
    "shares_duplicate",
    "blocks_found",
    "blocks_rejected",
    "block_submit_errors",
];

/// One solution as delivered by the miner-facing transport.
#[derive(Clone, Debug)]
pub struct Submission {
    pub payee: PayeeAddress,
    pub worker: String,
    pub ip: String,
    pub nonce: String,
    pub header: String,
    pub aux_digest: String,
}

/// How a submission was classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Header not in the template backlog.
    Stale,
    /// Malformed, or below the pool share difficulty.
    Invalid,
    /// Fingerprint already recorded.
    Duplicate,
    /// Credited as a share.
    Share,
    /// Accepted by the daemon as a block.
    Block,
    /// Met block difficulty but the daemon refused it.
    BlockRejected,
    /// Met block difficulty but submission failed in transport.
    BlockSubmitFailed,
}

impl Verdict {
    /// The `(duplicate, accepted)` pair reported back to the miner.
    pub fn as_pair(self) -> (bool, bool) {
        match self {
            Verdict::Duplicate => (true, false),
            Verdict::Share | Verdict::Block => (false, true),
            Verdict::Stale
            | Verdict::Invalid
            | Verdict::BlockRejected
            | Verdict::BlockSubmitFailed => (false, false),
        }
    }
}

/// Validates solutions against the job snapshot they were found on.
pub struct ShareSubmissionPipeline {
    templates: Arc<BlockTemplateStore>,
    upstreams: Arc<UpstreamSet>,
    ledger: Arc<dyn Ledger>,
    share_difficulty: u64,
    hashrate_window_secs: u64,
    stats: Arc<StatsCounter>,
}

impl ShareSubmissionPipeline {
    pub fn new(
        templates: Arc<BlockTemplateStore>,
        upstreams: Arc<UpstreamSet>,
        ledger: Arc<dyn Ledger>,
        share_difficulty: u64,
        hashrate_window_secs: u64,
    ) -> Self {
        Self {
            templates,
            upstreams,
            ledger,
            share_difficulty,
            hashrate_window_secs,
            stats: Arc::new(StatsCounter::new(SHARE_COUNTERS)),
        }
    }

    pub fn stats(&self) -> Arc<StatsCounter> {
        Arc::clone(&self.stats)
    }

    /// Validate and record one solution; returns `(duplicate, accepted)`.
    pub async fn submit(&self, template: &BlockTemplate, submission: &Submission) -> (bool, bool) {
        self.evaluate(template, submission).await.as_pair()
    }

    /// Validate and record one solution, returning its classification.
    pub async fn evaluate(&self, template: &BlockTemplate, submission: &Submission) -> Verdict {
        let verdict = self.classify(template, submission).await;
        let counter = match verdict {
            Verdict::Stale => "shares_stale",
            Verdict::Invalid => "shares_invalid",
            Verdict::Duplicate => "shares_duplicate",
            Verdict::Share => "shares_valid",
            Verdict::Block => "blocks_found",
            Verdict::BlockRejected => "blocks_rejected",
            Verdict::BlockSubmitFailed => "block_submit_errors",
        };
        self.stats.increment(counter);
        verdict
    }

    async fn classify(&self, template: &BlockTemplate, sub: &Submission) -> Verdict {
        let nonce = match parse_nonce(&sub.nonce) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(payee = %sub.payee, worker = %sub.worker, error = %e, "invalid share");
                return Verdict::Invalid;
            }
        };

        let Some(record) = template.lookup(&sub.header) else {
            tracing::info!(payee = %sub.payee, ip = %sub.ip, "stale share");
            return Verdict::Stale;
        };

        let daemon = self.upstreams.current();
        let share_params = self.params(sub, record.height, self.share_difficulty);
        match daemon.verify_solution(&share_params).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(payee = %sub.payee, worker = %sub.worker, "solution below share difficulty");
                return Verdict::Invalid;
            }
            Err(e) => {
                tracing::warn!(upstream = daemon.name(), error = %e, "share verification failed");
                return Verdict::Invalid;
            }
        }

        if let Err(e) = self.ledger.log_ip(&sub.payee, &sub.ip, Timestamp::now()) {
            tracing::warn!(payee = %sub.payee, error = %e, "failed to record source ip");
        }

        let block_params = self.params(sub, record.height, record.difficulty);
        let is_block = match daemon.verify_solution(&block_params).await {
            Ok(meets) => meets,
            Err(e) => {
                tracing::warn!(upstream = daemon.name(), error = %e, "block verification failed, counting as share");
                false
            }
        };

        if is_block {
            self.submit_block(template, sub, nonce, record).await
        } else {
            self.record_share(sub, record)
        }
    }

    async fn submit_block(
        &self,
        template: &BlockTemplate,
        sub: &Submission,
        nonce: u64,
        record: HeaderRecord,
    ) -> Verdict {
        let blob = match splice_nonce(&template.blob, nonce) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::error!(height = record.height, error = %e, "cannot assemble block");
                return Verdict::BlockSubmitFailed;
            }
        };

        let daemon = self.upstreams.current();
        match daemon.submit_block(&blob).await {
            Err(e) => {
                tracing::error!(
                    height = record.height,
                    header = %template.header,
                    error = %e,
                    "block submission failure"
                );
                return Verdict::BlockSubmitFailed;
            }
            Ok(false) => {
                tracing::warn!(height = record.height, header = %template.header, "block rejected");
                return Verdict::BlockRejected;
            }
            Ok(true) => {}
        }

        self.templates.refresh_or_warn().await;

        let block = BlockRecord {
            share: self.share_record(sub, record),
            block_difficulty: record.difficulty,
            nonce: sub.nonce.clone(),
            header: sub.header.clone(),
            round_shares: 0,
        };
        match self.ledger.write_block(&block) {
            Ok(true) => return Verdict::Duplicate,
            Ok(false) => tracing::info!(height = record.height, "inserted block to backend"),
            Err(e) => tracing::error!(
                height = record.height,
                error = %e,
                "failed to insert block candidate into backend"
            ),
        }
        tracing::info!(payee = %sub.payee, ip = %sub.ip, height = record.height, "block found");
        Verdict::Block
    }

    fn record_share(&self, sub: &Submission, record: HeaderRecord) -> Verdict {
        match self.ledger.write_share(&self.share_record(sub, record)) {
            Ok(true) => Verdict::Duplicate,
            Ok(false) => Verdict::Share,
            Err(e) => {
                tracing::error!(payee = %sub.payee, error = %e, "failed to insert share data into backend");
                Verdict::Share
            }
        }
    }

    fn share_record(&self, sub: &Submission, record: HeaderRecord) -> ShareRecord {
        ShareRecord {
            payee: sub.payee.clone(),
            worker: sub.worker.clone(),
            fingerprint: SolutionFingerprint::of(&sub.nonce, &sub.header, &sub.aux_digest),
            share_difficulty: self.share_difficulty,
            height: record.height,
            timestamp: Timestamp::now(),
            hashrate_window_secs: self.hashrate_window_secs,
        }
    }

    fn params(&self, sub: &Submission, height: u64, difficulty: u64) -> SolutionParams {
        SolutionParams {
            nonce: sub.nonce.clone(),
            header: sub.header.clone(),
            aux_digest: sub.aux_digest.clone(),
            height,
            difficulty_hex: difficulty_hex(difficulty),
        }
    }
}
