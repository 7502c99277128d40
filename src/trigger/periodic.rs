//! Scheduled self-healing passes

use crate::domain::{ClusterTarget, TriggerKind};
use crate::protection::Reconciler;
use std::time::Duration;
use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Re-runs reconciliation for one cluster on a fixed interval
#[derive(Debug, Clone)]
pub struct PeriodicTrigger {
    interval: Duration,
    target: ClusterTarget,
}

impl PeriodicTrigger {
    pub fn new(interval: Duration, target: ClusterTarget) -> Self {
        Self {
            interval,
            target: ClusterTarget {
                trigger: TriggerKind::Scheduled,
                ..target
            },
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run passes until `token` is cancelled; returns the number of passes.
    ///
    /// The first pass runs immediately. Ticks missed while a pass is running
    /// are skipped.
    pub async fn run(&self, reconciler: &Reconciler, token: CancellationToken) -> u64 {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes = 0;

        info!(
            cluster = %self.target.cluster_name,
            interval_secs = self.interval.as_secs(),
            "Periodic reconciliation started"
        );

        loop {
            select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            passes += 1;
            if let Err(e) = reconciler.reconcile(&self.target).await {
                warn!(cluster = %self.target.cluster_name, error = %e, "Scheduled pass failed");
            }
        }

        info!(cluster = %self.target.cluster_name, passes, "Periodic reconciliation stopped");
        passes
    }
}
