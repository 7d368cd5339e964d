//! Background eviction of idle clients.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::limiter::Registry;

/// Handle to a running sweeper task.
///
/// The task stops when [`Sweeper::stop`] is called or the handle is dropped.
pub(crate) struct Sweeper {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a sweeper that evicts clients idle for longer than
    /// `idle_timeout`, checking every `interval`.
    ///
    /// `interval` must be non-zero. Must be called from within a tokio
    /// runtime.
    pub(crate) fn spawn(registry: Arc<Registry>, interval: Duration, idle_timeout: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = registry.sweep(Instant::now(), idle_timeout);
                        if outcome.evicted > 0 {
                            info!(
                                evicted = outcome.evicted,
                                remaining = outcome.remaining,
                                "Evicted idle clients"
                            );
                        } else {
                            debug!(remaining = outcome.remaining, "Sweep found no idle clients");
                        }
                    }
                    // Resolves on an explicit stop and when the handle is dropped
                    _ = &mut shutdown_rx => break,
                }
            }

            debug!("Sweeper stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Stop the sweeper and release its timer.
    pub(crate) fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Whether the task has exited.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
