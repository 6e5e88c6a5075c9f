//! Periodic maintenance of the shared tables.

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::state::MonitorState;
use crate::clock::Clock;

/// What one housekeeping tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    pub counters_cleared: usize,
    pub windows_reset: usize,
    pub blocks_purged: usize,
}

/// Clears rate counters, idles stale attack windows and purges lapsed blocks.
#[derive(Clone)]
pub struct Housekeeper {
    state: MonitorState,
    clock: Arc<dyn Clock>,
    attack_horizon: Duration,
    period: std::time::Duration,
}

impl Housekeeper {
    pub fn new(
        state: MonitorState,
        clock: Arc<dyn Clock>,
        attack_horizon: Duration,
        period: std::time::Duration,
    ) -> Self {
        Self {
            state,
            clock,
            attack_horizon,
            period,
        }
    }

    /// Run one maintenance pass.
    pub fn tick(&self) -> HousekeepingReport {
        let now = self.clock.now();
        let blocks = &self.state.blocks;
        let report = HousekeepingReport {
            counters_cleared: self.state.limiter.clear(),
            windows_reset: self.state.detector.reset_stale(now, self.attack_horizon),
            blocks_purged: if blocks.is_empty() { 0 } else { blocks.purge_expired(now) },
        };
        debug!(
            counters_cleared = report.counters_cleared,
            windows_reset = report.windows_reset,
            blocks_purged = report.blocks_purged,
            blocks_held = blocks.len(),
            "Housekeeping tick"
        );
        report
    }

    /// Run [`tick`](Self::tick) every period on the tokio runtime.
    ///
    /// The first tick happens one full period after spawning.
    pub fn spawn(self) -> HousekeeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_secs = period.as_secs(), "Housekeeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Housekeeper stopped");
        });

        HousekeeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running housekeeper task.
pub struct HousekeeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HousekeeperHandle {
    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Housekeeper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
