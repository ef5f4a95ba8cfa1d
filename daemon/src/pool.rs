//! Wires the ledger, upstreams, job refresher and payout loop together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::task::JoinHandle;
use trawl_payouts::{PayoutProcessor, StartupMode};
use trawl_proxy::{BlockTemplateStore, ShareSubmissionPipeline, UpstreamSet};
use trawl_rpc::{DaemonRpc, HttpDaemon, HttpWallet};
use trawl_store::{Ledger, PaymentStore};
use trawl_store_lmdb::LmdbLedger;
use trawl_types::Timestamp;
use trawl_utils::format_duration;

use crate::config::PoolConfig;
use crate::shutdown::{ShutdownController, TaskKind};

/// Grace period for non-settlement tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running pool instance.
pub struct Pool {
    config: PoolConfig,
    ledger: Arc<LmdbLedger>,
    shutdown: Arc<ShutdownController>,
}

impl Pool {
    /// Open the ledger. Nothing is spawned until [`start`](Self::start).
    pub fn new(config: PoolConfig) -> anyhow::Result<Self> {
        let ledger = LmdbLedger::open(&config.data_dir)
            .with_context(|| format!("opening ledger at {}", config.data_dir.display()))?;
        Ok(Self {
            config,
            ledger: Arc::new(ledger),
            shutdown: Arc::new(ShutdownController::new()),
        })
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the job refresher, upstream checker, stats logger and payout
    /// loop as configured.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.config.proxy.enabled {
            self.start_proxy().await?;
        } else {
            tracing::info!("proxy disabled");
        }

        if self.config.payouts.enabled {
            self.start_payouts()?;
        } else {
            tracing::info!("payouts disabled");
        }
        Ok(())
    }

    async fn start_proxy(&mut self) -> anyhow::Result<()> {
        let proxy = &self.config.proxy;
        let mut daemons: Vec<Arc<dyn DaemonRpc>> = Vec::with_capacity(self.config.upstreams.len());
        for upstream in &self.config.upstreams {
            let daemon = HttpDaemon::new(&upstream.name, &upstream.url, upstream.timeout())
                .with_context(|| format!("building upstream {}", upstream.name))?;
            tracing::info!(name = %upstream.name, url = %upstream.url, "upstream configured");
            daemons.push(Arc::new(daemon));
        }
        let upstreams = Arc::new(UpstreamSet::new(daemons, &proxy.address)?);
        upstreams.check().await;

        let templates = Arc::new(BlockTemplateStore::new(
            Arc::clone(&upstreams),
            proxy.max_backlog,
        ));
        templates.refresh_or_warn().await;

        let pipeline = Arc::new(ShareSubmissionPipeline::new(
            Arc::clone(&templates),
            Arc::clone(&upstreams),
            Arc::clone(&self.ledger) as Arc<dyn Ledger>,
            proxy.difficulty,
            proxy.hashrate_expiration_secs,
        ));

        tracing::info!(
            name = %self.config.name,
            difficulty = proxy.difficulty,
            refresh_secs = proxy.block_refresh_interval_secs,
            upstreams = upstreams.len(),
            "starting job refresher"
        );
        self.shutdown.track(
            "upstream-checker",
            TaskKind::Background,
            Arc::clone(&upstreams)
                .spawn_checker(self.config.upstream_check_interval(), self.shutdown.subscribe()),
        );
        self.shutdown.track(
            "template-refresher",
            TaskKind::Background,
            Arc::clone(&templates)
                .spawn_refresher(proxy.block_refresh_interval(), self.shutdown.subscribe()),
        );
        let stats = spawn_stats_logger(
            pipeline,
            templates,
            Arc::clone(&self.ledger) as Arc<dyn Ledger>,
            proxy.hashrate_expiration_secs,
            self.config.stats_interval(),
            self.shutdown.subscribe(),
        );
        self.shutdown.track("stats-logger", TaskKind::Background, stats);
        Ok(())
    }

    fn start_payouts(&mut self) -> anyhow::Result<()> {
        let mut processor = self.payout_processor()?;
        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            if let Err(e) = processor.start(StartupMode::Settle, shutdown_rx).await {
                tracing::error!(error = %e, "payouts did not start");
            }
        });
        self.shutdown.track("payouts", TaskKind::Settlement, handle);
        Ok(())
    }

    /// Run the payout resolution pass once and return.
    pub async fn resolve_payouts(&self) -> anyhow::Result<()> {
        let mut processor = self.payout_processor()?;
        processor
            .start(StartupMode::Resolve, self.shutdown.subscribe())
            .await
            .context("resolving pending payouts")?;
        Ok(())
    }

    fn payout_processor(&self) -> anyhow::Result<PayoutProcessor> {
        let payouts = &self.config.payouts;
        let daemon = HttpDaemon::new("PayoutsDaemon", &payouts.daemon, payouts.timeout())?;
        let wallet = HttpWallet::new("PayoutsWallet", &payouts.wallet, payouts.timeout())?;
        Ok(PayoutProcessor::new(
            payouts.clone(),
            Arc::clone(&self.ledger) as Arc<dyn Ledger>,
            Arc::new(daemon),
            Arc::new(wallet),
        ))
    }

    /// Signal every task, let the payout run finish, then flush the ledger.
    pub async fn stop(&mut self) {
        tracing::info!("pool stopping");
        self.shutdown.shutdown_and_join(SHUTDOWN_TIMEOUT).await;

        match self.ledger.snapshot() {
            Ok(status) => tracing::info!(%status, "ledger flushed to disk"),
            Err(e) => tracing::warn!("ledger flush failed: {e}"),
        }
        tracing::info!("pool stopped");
    }
}

fn spawn_stats_logger(
    pipeline: Arc<ShareSubmissionPipeline>,
    templates: Arc<BlockTemplateStore>,
    ledger: Arc<dyn Ledger>,
    hashrate_window_secs: u64,
    interval: Duration,
    mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    let height = templates.current().map(|t| t.height);
                    match ledger.recent_shares(Timestamp::now()) {
                        Ok(recent) => tracing::info!(
                            miners = recent.len(),
                            hashrate = estimate_hashrate(recent.values().sum(), hashrate_window_secs),
                            "pool hashrate"
                        ),
                        Err(e) => tracing::warn!(error = %e, "failed to read recent shares"),
                    }
                    tracing::info!(
                        ?height,
                        uptime = %format_duration(started.elapsed()),
                        shares = %pipeline.stats().summary(),
                        "share stats"
                    );
                }
            }
        }
    })
}

/// Hashes per second implied by `difficulty` worth of shares over the window.
fn estimate_hashrate(difficulty: u64, window_secs: u64) -> u64 {
    difficulty.checked_div(window_secs).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashrate_is_difficulty_over_window() {
        assert_eq!(estimate_hashrate(36_000, 3_600), 10);
        assert_eq!(estimate_hashrate(36_000, 0), 0);
    }

    fn offline_config(dir: &std::path::Path) -> PoolConfig {
        let mut config = PoolConfig {
            data_dir: dir.to_path_buf(),
            ..PoolConfig::default()
        };
        config.proxy.enabled = false;
        config
    }

    #[tokio::test]
    async fn starts_and_stops_with_everything_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = Pool::new(offline_config(dir.path())).unwrap();
        pool.start().await.unwrap();
        assert_eq!(pool.shutdown.task_count(), 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn resolve_with_an_empty_ledger_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new(offline_config(dir.path())).unwrap();
        pool.resolve_payouts().await.unwrap();
    }
}
