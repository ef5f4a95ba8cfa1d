//! Current unit of work and the backlog of recent job headers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use trawl_rpc::WorkReply;
use trawl_store::FINGERPRINT_WINDOW;

use crate::upstream::UpstreamSet;
use crate::work::{parse_height, target_to_difficulty};
use crate::ProxyError;

/// Block difficulty and height of one issued job header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderRecord {
    pub difficulty: u64,
    pub height: u64,
}

/// One published job. Never mutated after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTemplate {
    pub header: String,
    pub seed: String,
    pub target: String,
    pub difficulty: u64,
    pub height: u64,
    /// Chain tip this job was built on.
    pub prev_hash: String,
    pub blob: String,
    /// Headers a solution may still reference, including `header`.
    pub backlog: HashMap<String, HeaderRecord>,
}

impl BlockTemplate {
    /// Build the successor of `previous` from a fresh work payload.
    ///
    /// The backlog keeps the new header plus every previous entry with
    /// `height > new_height - max_backlog`.
    pub fn build(
        previous: Option<&BlockTemplate>,
        prev_hash: String,
        work: WorkReply,
        max_backlog: u64,
    ) -> Result<Self, ProxyError> {
        let difficulty = target_to_difficulty(&work.target)?;
        let height = parse_height(&work.height_hex)?;
        let floor = height.saturating_sub(max_backlog);

        let mut backlog: HashMap<String, HeaderRecord> = previous
            .map(|t| {
                t.backlog
                    .iter()
                    .filter(|(_, r)| r.height > floor)
                    .map(|(k, r)| (k.clone(), *r))
                    .collect()
            })
            .unwrap_or_default();
        backlog.insert(work.header.clone(), HeaderRecord { difficulty, height });

        Ok(Self {
            header: work.header,
            seed: work.seed,
            target: work.target,
            difficulty,
            height,
            prev_hash,
            blob: work.blob,
            backlog,
        })
    }

    pub fn lookup(&self, header: &str) -> Option<HeaderRecord> {
        self.backlog.get(header).copied()
    }
}

/// What a refresh did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The chain tip has not moved.
    Unchanged,
    /// A new template was published at this height.
    Published(u64),
    /// Another refresh was already running; it will publish any new job.
    Busy,
}

/// Publishes block templates to any number of concurrent readers.
///
/// Readers take an `Arc` snapshot and never wait on a refresh. At most one
/// refresh runs at a time; callers arriving meanwhile return at once.
pub struct BlockTemplateStore {
    upstreams: Arc<UpstreamSet>,
    max_backlog: u64,
    tx: watch::Sender<Option<Arc<BlockTemplate>>>,
    refresh_lock: Mutex<()>,
}

impl BlockTemplateStore {
    /// `max_backlog` is capped at [`FINGERPRINT_WINDOW`]: an older header
    /// could carry a solution whose fingerprint is already pruned.
    pub fn new(upstreams: Arc<UpstreamSet>, max_backlog: u64) -> Self {
        if max_backlog > FINGERPRINT_WINDOW {
            tracing::warn!(
                max_backlog,
                cap = FINGERPRINT_WINDOW,
                "backlog wider than duplicate detection, capping"
            );
        }
        let (tx, _) = watch::channel(None);
        Self {
            upstreams,
            max_backlog: max_backlog.min(FINGERPRINT_WINDOW),
            tx,
            refresh_lock: Mutex::new(()),
        }
    }

    /// The latest template, if one was ever published.
    pub fn current(&self) -> Option<Arc<BlockTemplate>> {
        self.tx.borrow().clone()
    }

    /// A receiver that is notified every time a new job is published.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<BlockTemplate>>> {
        self.tx.subscribe()
    }

    /// Fetch the chain tip and, if it moved, a new work payload.
    pub async fn refresh(&self) -> Result<RefreshOutcome, ProxyError> {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            tracing::debug!("refresh already in progress");
            return Ok(RefreshOutcome::Busy);
        };
        let upstream = self.upstreams.current();
        let previous = self.current();

        let latest = upstream.latest_block().await?;
        if previous.as_ref().is_some_and(|t| t.prev_hash == latest.hash) {
            return Ok(RefreshOutcome::Unchanged);
        }

        let work = upstream.get_work(self.upstreams.reward_address()).await?;
        let template =
            BlockTemplate::build(previous.as_deref(), latest.hash, work, self.max_backlog)?;
        let height = template.height;
        tracing::info!(
            upstream = upstream.name(),
            height,
            header = %template.header.get(..10).unwrap_or(&template.header),
            difficulty = template.difficulty,
            backlog = template.backlog.len(),
            "new block to mine"
        );
        self.tx.send_replace(Some(Arc::new(template)));
        Ok(RefreshOutcome::Published(height))
    }

    /// Refresh, logging a failure at `warn` instead of returning it.
    pub async fn refresh_or_warn(&self) -> Option<RefreshOutcome> {
        match self.refresh().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(
                    upstream = self.upstreams.current().name(),
                    error = %e,
                    "error while refreshing block template"
                );
                None
            }
        }
    }

    /// Refresh every `interval` until shutdown.
    pub fn spawn_refresher(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("template refresher shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.refresh_or_warn().await;
                    }
                }
            }
        })
    }
}
