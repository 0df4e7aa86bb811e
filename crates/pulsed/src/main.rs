//! pulsed — the Pulse metrics server.
//!
//! Assembles the metric store (memory with disk snapshots, or SQL), the
//! request envelope keys and the HTTP API into one process.
//!
//! # Usage
//!
//! ```text
//! pulsed -a 0.0.0.0:8080 -i 300 -f /var/lib/pulse/metrics.json -k $KEY
//! pulsed -d postgres://pulse@db/pulse --crypto-key server.pem -t 10.0.0.0/8
//! ```

mod server;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pulse_core::{ServerConfig, ServerOverrides};

const DEFAULT_LOG_FILTER: &str = "info,pulsed=debug,pulse=debug";

#[derive(Parser, Debug)]
#[command(name = "pulsed", about = "Pulse metrics server")]
struct Cli {
    /// Listen address (host:port).
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between snapshot flushes; 0 writes after every update.
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file for the memory backend.
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Load the snapshot file at startup.
    #[arg(short = 'r', long, env = "RESTORE")]
    restore: Option<bool>,

    /// Database DSN; selects the SQL backend.
    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Shared HMAC key for request and response signatures.
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,

    /// RSA private key (PEM) for encrypted request bodies.
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// Only accept ingest from this CIDR (checked against X-Real-IP).
    #[arg(short = 't', long = "trusted-subnet", env = "TRUSTED_SUBNET")]
    trusted_subnet: Option<String>,

    /// TOML config file.
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ServerOverrides {
        ServerOverrides {
            address: self.address.clone(),
            store_interval: self.store_interval,
            file_storage_path: self.file_storage_path.clone(),
            restore: self.restore,
            database_dsn: self.database_dsn.clone(),
            key: self.key.clone(),
            crypto_key: self.crypto_key.clone(),
            trusted_subnet: self.trusted_subnet.clone(),
        }
    }

    fn load(&self) -> anyhow::Result<ServerConfig> {
        ServerConfig::load(self.config.as_deref(), self.overrides())
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

    let config = Cli::parse().load()?;
    tracing::info!(address = %config.address, "pulse server starting");
    server::run(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // The only test in this binary that touches the process environment.
    #[test]
    fn flag_beats_env_beats_file_beats_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "address = \"127.0.0.1:9100\"\nstore_interval = 7\nfile_storage_path = \"/from/file.json\"\nrestore = false"
        )
        .unwrap();

        // SAFETY: no other test in this binary reads or writes these variables.
        unsafe {
            std::env::set_var("STORE_INTERVAL", "11");
            std::env::set_var("FILE_STORAGE_PATH", "/from/env.json");
        }
        let path = file.path().to_str().unwrap().to_string();
        let parsed = Cli::try_parse_from(["pulsed", "-c", path.as_str(), "-f", "/from/flag.json"]);
        unsafe {
            std::env::remove_var("STORE_INTERVAL");
            std::env::remove_var("FILE_STORAGE_PATH");
        }

        let config = parsed.unwrap().load().unwrap();
        assert_eq!(config.file_storage_path, PathBuf::from("/from/flag.json"));
        assert_eq!(config.store_interval, 11);
        assert_eq!(config.address, "127.0.0.1:9100");
        assert!(!config.restore);
        assert!(config.database_dsn.is_none());
        assert!(config.key.is_none());
    }
}
