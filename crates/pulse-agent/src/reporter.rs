//! Periodic reporting of the local store to the server.
//!
//! Gauges are sent as their latest value. Counters are cumulative locally,
//! so each report carries only the increase since the last report the
//! server accepted; a dropped report's increase rolls into the next one.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use pulse_core::{MetricUpdate, Snapshot};
use pulse_state::MemoryStore;

use crate::sender::{SendError, Sender};

pub struct Reporter {
    store: MemoryStore,
    sender: Sender,
    interval: Duration,
    /// Counter totals as of the last accepted report.
    acked: HashMap<String, i64>,
}

impl Reporter {
    pub fn new(store: MemoryStore, sender: Sender, interval: Duration) -> Self {
        Self {
            store,
            sender,
            interval,
            acked: HashMap::new(),
        }
    }

    /// Build the outgoing batch for `snapshot`.
    pub fn build_batch(&self, snapshot: &Snapshot) -> Vec<MetricUpdate> {
        let gauges = snapshot
            .gauges
            .iter()
            .map(|(id, v)| MetricUpdate::gauge(id.clone(), *v));
        let counters = snapshot.counters.iter().filter_map(|(id, total)| {
            let acked = self.acked.get(id).copied().unwrap_or(0);
            let delta = total.saturating_sub(acked);
            (delta != 0).then(|| MetricUpdate::counter(id.clone(), delta))
        });
        gauges.chain(counters).collect()
    }

    /// Send one report. Returns the number of updates delivered.
    pub async fn report(&mut self, shutdown: &watch::Receiver<bool>) -> Result<usize, SendError> {
        let snapshot = self.store.snapshot().await;
        let batch = self.build_batch(&snapshot);
        if batch.is_empty() {
            return Ok(0);
        }

        self.sender.send(&batch, shutdown).await?;
        self.acked.extend(snapshot.counters);
        Ok(batch.len())
    }

    async fn report_logged(&mut self, shutdown: &watch::Receiver<bool>) {
        match self.report(shutdown).await {
            Ok(0) => debug!("nothing to report"),
            Ok(n) => debug!(updates = n, address = self.sender.address(), "report delivered"),
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "report dropped after retries");
            }
            Err(e) => warn!(error = %e, "report rejected"),
        }
    }

    /// Run the report loop until shutdown, then report once more.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            address = self.sender.address(),
            "reporter started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.report_logged(&shutdown).await;
                }
                _ = shutdown.changed() => {
                    info!("reporter shutting down");
                    // Final report before exit.
                    self.report_logged(&shutdown).await;
                    break;
                }
            }
        }
    }
}
