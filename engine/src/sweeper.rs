//! Background task that periodically expires lapsed reservations.

use crate::engine::AllocationEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Periodic driver for [`AllocationEngine::sweep_expired`].
///
/// Runs one sweep pass per interval tick until a shutdown signal arrives.
/// Ticks missed while a pass is still running are skipped rather than
/// bursted, so a slow pass never causes back-to-back sweeps.
pub struct Sweeper {
    engine: Arc<AllocationEngine>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl Sweeper {
    /// Creates a sweeper over the given engine.
    #[must_use]
    pub fn new(
        engine: Arc<AllocationEngine>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            engine,
            interval,
            shutdown,
        }
    }

    /// Spawn the sweep loop onto the runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so the first
        // real sweep happens one interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.engine.sweep_expired().await {
                        Ok(swept) => {
                            if swept > 0 {
                                debug!(swept, "sweep pass completed");
                            }
                        }
                        Err(error) => {
                            warn!(%error, "sweep pass failed");
                        }
                    }
                }
                _ = self.shutdown.recv() => {
                    info!("expiry sweeper shutting down");
                    break;
                }
            }
        }
    }
}
