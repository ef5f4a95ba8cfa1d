//! Ordered daemon endpoints with health-checked failover.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use trawl_rpc::DaemonRpc;

use crate::ProxyError;

/// The configured daemons, in priority order, and which one is in use.
///
/// Reads of the current upstream are a single atomic load.
pub struct UpstreamSet {
    upstreams: Vec<Arc<dyn DaemonRpc>>,
    current: AtomicUsize,
    reward_address: String,
}

impl UpstreamSet {
    pub fn new(
        upstreams: Vec<Arc<dyn DaemonRpc>>,
        reward_address: impl Into<String>,
    ) -> Result<Self, ProxyError> {
        if upstreams.is_empty() {
            return Err(ProxyError::NoUpstreams);
        }
        Ok(Self {
            upstreams,
            current: AtomicUsize::new(0),
            reward_address: reward_address.into(),
        })
    }

    /// The upstream serving template refreshes and verification.
    pub fn current(&self) -> Arc<dyn DaemonRpc> {
        let index = self.current.load(Ordering::Acquire);
        Arc::clone(&self.upstreams[index.min(self.upstreams.len() - 1)])
    }

    pub fn reward_address(&self) -> &str {
        &self.reward_address
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    /// Probe upstreams in order with `get_work` and select the first that
    /// answers. If none answers the previous choice is kept.
    pub async fn check(&self) -> Option<usize> {
        for (index, upstream) in self.upstreams.iter().enumerate() {
            match upstream.get_work(&self.reward_address).await {
                Ok(_) => {
                    let previous = self.current.swap(index, Ordering::AcqRel);
                    if previous != index {
                        tracing::warn!(
                            from = self.upstreams[previous].name(),
                            to = upstream.name(),
                            "switching upstream"
                        );
                    }
                    return Some(index);
                }
                Err(e) => {
                    tracing::debug!(upstream = upstream.name(), error = %e, "upstream check failed");
                }
            }
        }
        tracing::warn!(
            current = self.current().name(),
            "no upstream is healthy, keeping current"
        );
        None
    }

    /// Run [`check`](Self::check) every `interval` until shutdown.
    pub fn spawn_checker(
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
                        tracing::info!("upstream checker shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.check().await;
                    }
                }
            }
        })
    }
}
