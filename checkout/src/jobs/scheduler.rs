//! Periodic scheduler: pushes the recurring sweep tasks onto the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Enqueuer, TASK_SWEEP_ATTEMPTS, TASK_SWEEP_PAYMENTS, TASK_SWEEP_PENDING};

/// Pushes the sweep tasks on a fixed interval (5 minutes by default).
/// Sweeps dedup on their kind, so overlapping pushes collapse.
#[derive(Debug)]
pub struct Scheduler {
    enqueuer: Arc<Enqueuer>,
    interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler with the default 5 minute interval.
    #[must_use]
    pub fn new(enqueuer: Arc<Enqueuer>) -> Self {
        Self {
            enqueuer,
            interval: Duration::from_secs(300),
        }
    }

    /// Overrides the push interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("scheduler stopped");
                    return;
                }
                _ = tick.tick() => {
                    for kind in [TASK_SWEEP_PAYMENTS, TASK_SWEEP_ATTEMPTS, TASK_SWEEP_PENDING] {
                        if let Err(err) = self.enqueuer.sweep(kind).await {
                            tracing::error!(kind, error = %err, "failed to schedule sweep");
                        }
                    }
                }
            }
        }
    }
}
