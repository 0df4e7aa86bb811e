//! Server and agent configuration.
//!
//! Values come from, highest precedence first: command-line flags,
//! environment variables, a TOML config file, built-in defaults. The
//! binaries parse flags and environment with clap into an overrides
//! struct; this module owns the file format, the defaults, and validation.
//!
//! | Server key | Default |
//! |---|---|
//! | `address` | `localhost:8080` |
//! | `store_interval` (seconds, 0 = write-through) | `300` |
//! | `file_storage_path` | `/tmp/metrics-db.json` |
//! | `restore` | `true` |
//! | `database_dsn` | unset (memory backend) |
//! | `key` (HMAC secret) | unset |
//! | `crypto_key` (RSA private key PEM) | unset |
//! | `trusted_subnet` (CIDR) | unset |
//!
//! | Agent key | Default |
//! |---|---|
//! | `address` | `localhost:8080` |
//! | `report_interval` (seconds) | `10` |
//! | `poll_interval` (seconds) | `2` |
//! | `key` | unset |
//! | `crypto_key` (RSA public key PEM) | unset |
//! | `compress` | `true` |
//! | `request_timeout` (seconds) | `5` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::net::Subnet;

const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Treat empty strings (e.g. `KEY=` in the environment) as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
}

// ── Server ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub address: String,
    pub store_interval: u64,
    pub file_storage_path: PathBuf,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            store_interval: 300,
            file_storage_path: PathBuf::from("/tmp/metrics-db.json"),
            restore: true,
            database_dsn: None,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
        }
    }
}

/// Flag/environment values for the server. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    pub address: Option<String>,
    pub store_interval: Option<u64>,
    pub file_storage_path: Option<PathBuf>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<String>,
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        read_toml(path)
    }

    /// Resolve the final config: file (or defaults), then overrides, then validation.
    pub fn load(file: Option<&Path>, overrides: ServerOverrides) -> anyhow::Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, o: ServerOverrides) {
        if let Some(v) = non_empty(o.address) {
            self.address = v;
        }
        if let Some(v) = o.store_interval {
            self.store_interval = v;
        }
        if let Some(v) = o.file_storage_path {
            self.file_storage_path = v;
        }
        if let Some(v) = o.restore {
            self.restore = v;
        }
        if let Some(v) = non_empty(o.database_dsn) {
            self.database_dsn = Some(v);
        }
        if let Some(v) = non_empty(o.key) {
            self.key = Some(v);
        }
        if let Some(v) = o.crypto_key {
            self.crypto_key = Some(v);
        }
        if let Some(v) = non_empty(o.trusted_subnet) {
            self.trusted_subnet = Some(v);
        }
        self.database_dsn = non_empty(self.database_dsn.take());
        self.key = non_empty(self.key.take());
        self.trusted_subnet = non_empty(self.trusted_subnet.take());
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.address.trim().is_empty() {
            bail!("server address must not be empty");
        }
        if self.database_dsn.is_none() && self.file_storage_path.as_os_str().is_empty() {
            bail!("file_storage_path must be set when no database is configured");
        }
        self.subnet()?;
        Ok(())
    }

    /// Interval between background snapshot flushes; zero means write-through.
    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval)
    }

    pub fn subnet(&self) -> anyhow::Result<Option<Subnet>> {
        self.trusted_subnet
            .as_deref()
            .map(|s| s.parse::<Subnet>().context("trusted_subnet"))
            .transpose()
    }
}

// ── Agent ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub address: String,
    pub report_interval: u64,
    pub poll_interval: u64,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub compress: bool,
    pub request_timeout: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            report_interval: 10,
            poll_interval: 2,
            key: None,
            crypto_key: None,
            compress: true,
            request_timeout: 5,
        }
    }
}

/// Flag/environment values for the agent. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    pub address: Option<String>,
    pub report_interval: Option<u64>,
    pub poll_interval: Option<u64>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub compress: Option<bool>,
    pub request_timeout: Option<u64>,
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        read_toml(path)
    }

    pub fn load(file: Option<&Path>, overrides: AgentOverrides) -> anyhow::Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, o: AgentOverrides) {
        if let Some(v) = non_empty(o.address) {
            self.address = v;
        }
        if let Some(v) = o.report_interval {
            self.report_interval = v;
        }
        if let Some(v) = o.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = non_empty(o.key) {
            self.key = Some(v);
        }
        if let Some(v) = o.crypto_key {
            self.crypto_key = Some(v);
        }
        if let Some(v) = o.compress {
            self.compress = v;
        }
        if let Some(v) = o.request_timeout {
            self.request_timeout = v;
        }
        self.key = non_empty(self.key.take());
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.address.trim().is_empty() {
            bail!("server address must not be empty");
        }
        if self.poll_interval == 0 {
            bail!("poll_interval must be positive");
        }
        if self.report_interval == 0 {
            bail!("report_interval must be positive");
        }
        if self.report_interval < self.poll_interval {
            bail!(
                "report_interval ({}s) must not be shorter than poll_interval ({}s)",
                self.report_interval,
                self.poll_interval
            );
        }
        if self.request_timeout == 0 {
            bail!("request_timeout must be positive");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn server_defaults() {
        let config = ServerConfig::load(None, ServerOverrides::default()).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.store_interval(), Duration::from_secs(300));
        assert!(config.restore);
        assert!(config.database_dsn.is_none());
    }

    #[test]
    fn server_file_then_overrides() {
        let file = write_config(
            r#"
address = "0.0.0.0:9000"
store_interval = 0
restore = false
key = "from-file"
"#,
        );
        let overrides = ServerOverrides {
            key: Some("from-flag".to_string()),
            ..Default::default()
        };
        let config = ServerConfig::load(Some(file.path()), overrides).unwrap();

        // File beats default.
        assert_eq!(config.address, "0.0.0.0:9000");
        assert_eq!(config.store_interval, 0);
        assert!(!config.restore);
        // Override beats file.
        assert_eq!(config.key.as_deref(), Some("from-flag"));
    }

    #[test]
    fn empty_strings_are_unset() {
        let overrides = ServerOverrides {
            database_dsn: Some(String::new()),
            key: Some("  ".to_string()),
            ..Default::default()
        };
        let config = ServerConfig::load(None, overrides).unwrap();
        assert!(config.database_dsn.is_none());
        assert!(config.key.is_none());
    }

    #[test]
    fn server_rejects_bad_subnet() {
        let overrides = ServerOverrides {
            trusted_subnet: Some("not-a-cidr".to_string()),
            ..Default::default()
        };
        assert!(ServerConfig::load(None, overrides).is_err());
    }

    #[test]
    fn server_rejects_unknown_file_keys() {
        let file = write_config("adress = \"typo\"\n");
        assert!(ServerConfig::load(Some(file.path()), ServerOverrides::default()).is_err());
    }

    #[test]
    fn agent_defaults_and_intervals() {
        let config = AgentConfig::load(None, AgentOverrides::default()).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.report_interval(), Duration::from_secs(10));
        assert!(config.compress);
    }

    #[test]
    fn agent_rejects_report_faster_than_poll() {
        let overrides = AgentOverrides {
            poll_interval: Some(10),
            report_interval: Some(2),
            ..Default::default()
        };
        assert!(AgentConfig::load(None, overrides).is_err());
    }

    #[test]
    fn agent_rejects_zero_poll() {
        let overrides = AgentOverrides {
            poll_interval: Some(0),
            ..Default::default()
        };
        assert!(AgentConfig::load(None, overrides).is_err());
    }
}
