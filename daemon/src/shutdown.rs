//! Shutdown coordination for the pool's background tasks.
//!
//! Every task the pool spawns is registered here together with its
//! [`TaskKind`]. On shutdown the payout loop is always allowed to finish the
//! settlement run it is in; the job refresher, upstream checker and stats
//! logger get a bounded grace period and are aborted after it.

use std::sync::Mutex;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// How a task is treated at shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    /// Safe to abort once the grace period runs out.
    Background,
    /// Moves money. Joined without a deadline so a run never stops between a
    /// transfer and its ledger writes.
    Settlement,
}

struct Tracked {
    name: &'static str,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

/// Broadcasts the shutdown signal and joins the tasks it was given.
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<Tracked>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Hand a spawned task over to be joined on shutdown.
    pub fn track(&self, name: &'static str, kind: TaskKind, handle: JoinHandle<()>) {
        self.lock_tasks().push(Tracked { name, kind, handle });
    }

    pub fn task_count(&self) -> usize {
        self.lock_tasks().len()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }

    /// Signal shutdown, wait for settlement tasks, then give background tasks
    /// `grace` to exit. Returns the names of the tasks that had to be aborted.
    pub async fn shutdown_and_join(&self, grace: Duration) -> Vec<&'static str> {
        self.shutdown();
        let (settlement, background): (Vec<Tracked>, Vec<Tracked>) = self
            .lock_tasks()
            .drain(..)
            .partition(|t| t.kind == TaskKind::Settlement);

        for task in settlement {
            if !task.handle.is_finished() {
                tracing::info!(task = task.name, "waiting for payout run to finish");
            }
            if let Err(e) = task.handle.await {
                tracing::error!(task = task.name, error = %e, "settlement task failed");
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = Vec::new();
        for mut task in background {
            match tokio::time::timeout_at(deadline, &mut task.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(task = task.name, error = %e, "task failed"),
                Err(_) => {
                    task.handle.abort();
                    aborted.push(task.name);
                }
            }
        }
        if !aborted.is_empty() {
            tracing::warn!(?aborted, ?grace, "tasks did not stop in time, aborted");
        }
        aborted
    }

    /// Wait for SIGTERM or SIGINT, then trigger shutdown.
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
            _ = terminate => tracing::info!("received SIGTERM, shutting down"),
        }
        self.shutdown();
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<Tracked>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
