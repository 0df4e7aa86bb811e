//! Periodic sampling of process and host statistics.
//!
//! Each poll writes every gauge in one batch into the agent's local
//! [`MemoryStore`], then bumps the `PollCount` counter. `PollCount` is
//! never reset: it counts polls since the agent started.

use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pulse_core::{MetricChange, MetricUpdate};
use pulse_state::{MemoryStore, MetricStore, StateResult};

/// Counter incremented once per successful poll.
pub const POLL_COUNT: &str = "PollCount";

/// Reads process and host statistics through `sysinfo`.
pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "cannot resolve own pid, process gauges disabled");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }

    /// Take one sample of every gauge.
    ///
    /// CPU utilization is measured between consecutive calls, so the first
    /// sample reports zero.
    pub fn sample(&mut self) -> Vec<MetricUpdate> {
        self.system.refresh_memory();
        self.system.refresh_cpu();

        let mut updates = Vec::with_capacity(8 + self.system.cpus().len());

        if let Some(pid) = self.pid {
            if self.system.refresh_process(pid) {
                if let Some(process) = self.system.process(pid) {
                    updates.push(MetricUpdate::gauge("HeapAlloc", process.memory() as f64));
                    updates.push(MetricUpdate::gauge("Sys", process.virtual_memory() as f64));
                }
            }
        }

        updates.push(MetricUpdate::gauge(
            "TotalMemory",
            self.system.total_memory() as f64,
        ));
        updates.push(MetricUpdate::gauge(
            "FreeMemory",
            self.system.free_memory() as f64,
        ));
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            updates.push(MetricUpdate::gauge(
                format!("CPUutilization{}", i + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }
        updates.push(MetricUpdate::gauge("RandomValue", rand::random::<f64>()));

        // The server rejects non-finite gauges.
        updates.retain(|u| match u.change {
            MetricChange::Gauge(v) => v.is_finite(),
            MetricChange::Counter(_) => true,
        });
        updates
    }
}

/// Polls a [`SystemSampler`] into the local store on an interval.
pub struct Collector {
    store: MemoryStore,
    sampler: SystemSampler,
    interval: Duration,
}

impl Collector {
    pub fn new(store: MemoryStore, interval: Duration) -> Self {
        Self {
            store,
            sampler: SystemSampler::new(),
            interval,
        }
    }

    /// Sample once and record the result. Returns the new poll count.
    pub async fn poll(&mut self) -> StateResult<i64> {
        let gauges = self.sampler.sample();
        self.store.update_batch(&gauges).await?;
        let polls = self.store.update_counter(POLL_COUNT, 1).await?;
        debug!(gauges = gauges.len(), polls, "metrics polled");
        Ok(polls)
    }

    /// Run the poll loop until shutdown signal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "metrics collector started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.poll().await {
                        warn!(error = %e, "metrics poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics collector shutting down");
                    break;
                }
            }
        }
    }
}
