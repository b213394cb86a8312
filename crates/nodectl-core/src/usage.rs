// ── Usage reporter ──
//
// Every interval: sample four metrics independently, then overwrite this
// node's usage key with delete-then-set. A failed metric reads as zero.

use std::sync::Arc;
use std::time::Duration;

use nodectl_store::Store;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::metrics::{Metric, MetricsClient};

/// Point-in-time resource usage of this node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub mem: f64,
    pub cpu: f64,
    pub net: NetUsage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetUsage {
    pub inbound: f64,
    pub outbound: f64,
}

/// Periodic producer of [`ResourceSnapshot`]s.
pub struct UsageReporter {
    store: Arc<Store>,
    metrics: MetricsClient,
    key: String,
    interval: Duration,
}

impl UsageReporter {
    pub fn new(store: Arc<Store>, metrics: MetricsClient, key: String, interval: Duration) -> Self {
        Self {
            store,
            metrics,
            key,
            interval,
        }
    }

    /// Fetch all four metrics concurrently. Never fails.
    pub async fn sample(&self) -> ResourceSnapshot {
        let (mem, cpu, inbound, outbound) = tokio::join!(
            self.metric(Metric::Memory),
            self.metric(Metric::Cpu),
            self.metric(Metric::Inbound),
            self.metric(Metric::Outbound),
        );
        ResourceSnapshot {
            mem,
            cpu,
            net: NetUsage { inbound, outbound },
        }
    }

    async fn metric(&self, metric: Metric) -> f64 {
        match self.metrics.fetch(metric).await {
            Ok(value) => value,
            Err(e) => {
                debug!(%metric, error = %e, "metric fetch failed, reporting zero");
                0.0
            }
        }
    }

    /// Run one cycle: sample, then replace the stored snapshot.
    ///
    /// If the delete fails the set is skipped. The two steps are not
    /// atomic; a reader may briefly see the key absent.
    pub async fn report(&self) -> Result<ResourceSnapshot, CoreError> {
        let snapshot = self.sample().await;
        let body = serde_json::to_string(&snapshot)?;

        self.store.delete(&self.key).await?;
        self.store.set(&self.key, &body, None).await?;
        Ok(snapshot)
    }

    /// Report every interval until `cancel` fires. The first report happens
    /// one interval after start.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // consume the immediate first tick
        info!(key = %self.key, every = ?self.interval, "usage reporter started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.report().await {
                        warn!(key = %self.key, error = %e, "usage report failed");
                    }
                }
            }
        }
        debug!("usage reporter stopped");
    }
}
