//! HMAC-SHA256 body signatures, hex-encoded on the wire.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{EnvelopeError, EnvelopeResult};

type HmacSha256 = Hmac<Sha256>;

/// Shared-secret signer used by both the agent and the server.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> EnvelopeResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| EnvelopeError::Key(e.to_string()))
    }

    /// Hex-encoded HMAC-SHA256 of `body`.
    pub fn sign(&self, body: &[u8]) -> EnvelopeResult<String> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a hex signature against `body` in constant time.
    pub fn verify(&self, body: &[u8], signature: &str) -> EnvelopeResult<()> {
        let expected = hex::decode(signature.trim()).map_err(|_| EnvelopeError::Signature)?;
        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| EnvelopeError::Signature)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("key", &"<redacted>").finish()
    }
}
