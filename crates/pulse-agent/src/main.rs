//! pulse-agent — samples this host and reports to a Pulse server.
//!
//! # Usage
//!
//! ```text
//! pulse-agent -a metrics.internal:8080 -p 2 -r 10 -k $KEY --crypto-key server.pub.pem
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pulse_agent::{Collector, Reporter, Sender};
use pulse_core::{AgentConfig, AgentOverrides};
use pulse_state::MemoryStore;

const DEFAULT_LOG_FILTER: &str = "info,pulse=debug";

#[derive(Parser, Debug)]
#[command(name = "pulse-agent", about = "Pulse metrics agent")]
struct Cli {
    /// Server address (host:port).
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between reports.
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// Seconds between polls.
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Shared HMAC key for request signatures.
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,

    /// Server RSA public key (PEM) for body encryption.
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// Gzip request bodies.
    #[arg(long, env = "COMPRESS")]
    compress: Option<bool>,

    /// Per-request timeout in seconds.
    #[arg(long = "timeout", env = "REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// TOML config file.
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> AgentOverrides {
        AgentOverrides {
            address: self.address.clone(),
            report_interval: self.report_interval,
            poll_interval: self.poll_interval,
            key: self.key.clone(),
            crypto_key: self.crypto_key.clone(),
            compress: self.compress,
            request_timeout: self.request_timeout,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref(), cli.overrides())?;
    info!(
        address = %config.address,
        poll_secs = config.poll_interval,
        report_secs = config.report_interval,
        compress = config.compress,
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        "pulse agent starting"
    );

    let sender = Sender::from_config(&config).context("loading server public key")?;
    let store = MemoryStore::new();
    let collector = Collector::new(store.clone(), config.poll_interval());
    let reporter = Reporter::new(store, sender, config.report_interval());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector_handle = tokio::spawn(collector.run(shutdown_rx.clone()));
    let reporter_handle = tokio::spawn(reporter.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Wait for background tasks; the reporter flushes one last batch.
    let _ = collector_handle.await;
    let _ = reporter_handle.await;

    info!("pulse agent stopped");
    Ok(())
}
