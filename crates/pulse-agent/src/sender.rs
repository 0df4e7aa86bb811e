//! Ships sealed batches to the server's `/updates/` endpoint.
//!
//! One HTTP/1 connection per attempt, bounded by a per-request timeout.
//! Transport failures and 5xx responses are retried on a fixed backoff
//! schedule; 4xx responses are final.

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

use pulse_core::{encode_batch, AgentConfig, MetricUpdate};
use pulse_envelope::{
    Encryptor, EnvelopeError, Sealed, Sealer, Signer, ENCRYPTED_HEADER, ENCRYPTION_SCHEME,
    SIGNATURE_HEADER,
};

/// Delays before the second, third and fourth attempts.
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

const UPDATES_PATH: &str = "/updates/";
const REAL_IP_HEADER: &str = "X-Real-IP";

#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server rejected batch ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("server error ({status}): {body}")]
    Server { status: StatusCode, body: String },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("encoding batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("building request: {0}")]
    Request(#[from] http::Error),
}

impl SendError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Transport(_) | SendError::Server { .. })
    }
}

fn transport(e: impl std::fmt::Display) -> SendError {
    SendError::Transport(e.to_string())
}

/// HTTP client for metric batches.
#[derive(Debug, Clone)]
pub struct Sender {
    address: String,
    sealer: Sealer,
    timeout: Duration,
    backoff: Vec<Duration>,
}

impl Sender {
    pub fn new(address: impl Into<String>, sealer: Sealer) -> Self {
        Self {
            address: address.into(),
            sealer,
            timeout: Duration::from_secs(5),
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }

    /// Build a sender from agent configuration, loading the public key if set.
    pub fn from_config(config: &AgentConfig) -> Result<Self, EnvelopeError> {
        let encryptor = config
            .crypto_key
            .as_deref()
            .map(Encryptor::from_pem_file)
            .transpose()?;
        let sealer = Sealer::new()
            .with_compression(config.compress)
            .with_signer(config.key.as_deref().map(Signer::new))
            .with_encryptor(encryptor);
        Ok(Self::new(config.address.clone(), sealer).with_timeout(config.request_timeout()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a batch, retrying retryable failures.
    ///
    /// Once `shutdown` is set no further retries are scheduled.
    pub async fn send(
        &self,
        batch: &[MetricUpdate],
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), SendError> {
        let payload = encode_batch(batch)?;
        let sealed = self.sealer.seal(&payload)?;

        let mut attempt = 0;
        loop {
            let err = match self.post(&sealed).await {
                Ok(()) => {
                    debug!(updates = batch.len(), attempt, "batch delivered");
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            let Some(delay) = self.backoff.get(attempt).copied() else {
                return Err(err);
            };
            if *shutdown.borrow() {
                return Err(err);
            }
            warn!(
                error = %err,
                attempt = attempt + 1,
                retry_in_ms = delay.as_millis() as u64,
                "report failed, retrying"
            );

            let mut shutdown = shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Err(err),
            }
            attempt += 1;
        }
    }

    /// One POST attempt, bounded by the request timeout.
    async fn post(&self, sealed: &Sealed) -> Result<(), SendError> {
        match tokio::time::timeout(self.timeout, self.post_inner(sealed)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Transport(format!(
                "request timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    async fn post_inner(&self, sealed: &Sealed) -> Result<(), SendError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(transport)?;
        let local_ip: Option<IpAddr> = stream.local_addr().ok().map(|a| a.ip());

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(transport)?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(UPDATES_PATH)
            .header(HOST, self.address.as_str())
            .header(USER_AGENT, concat!("pulse-agent/", env!("CARGO_PKG_VERSION")))
            .header(CONTENT_TYPE, "application/json");
        if sealed.gzip {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }
        if let Some(signature) = &sealed.signature {
            builder = builder.header(SIGNATURE_HEADER, signature.as_str());
        }
        if sealed.encrypted {
            builder = builder.header(ENCRYPTED_HEADER, ENCRYPTION_SCHEME);
        }
        if let Some(ip) = local_ip {
            builder = builder.header(REAL_IP_HEADER, ip.to_string());
        }
        let request = builder.body(Full::new(Bytes::from(sealed.body.clone())))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(transport)?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(transport)?
            .to_bytes();

        if status.is_success() {
            return Ok(());
        }
        let body = String::from_utf8_lossy(&body).trim().to_string();
        if status.is_client_error() {
            Err(SendError::Rejected { status, body })
        } else {
            Err(SendError::Server { status, body })
        }
    }
}
