//! Chunked RSA-OAEP (SHA-256) body encryption.
//!
//! Plaintext is split into blocks of `k - 2*32 - 2` bytes, where `k` is the
//! key size in bytes, and each block encrypts to exactly `k` bytes. The
//! ciphertext is framed as:
//!
//! ```text
//! [u32 BE block count][block 0: k bytes][block 1: k bytes]...
//! ```
//!
//! The decryptor checks the total length against its own key size before
//! touching any block, so a sender/receiver key-size mismatch surfaces as a
//! framing error.

use std::fmt;
use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::debug;

use crate::error::{EnvelopeError, EnvelopeResult};

const HASH_LEN: usize = 32;
const COUNT_LEN: usize = 4;

/// Largest plaintext block for a key of `key_bytes` bytes.
pub fn chunk_size(key_bytes: usize) -> Option<usize> {
    key_bytes.checked_sub(2 * HASH_LEN + 2).filter(|n| *n > 0)
}

fn usable_chunk_size(key_bytes: usize) -> EnvelopeResult<usize> {
    chunk_size(key_bytes).ok_or_else(|| {
        EnvelopeError::Key(format!("{}-bit key is too small for OAEP-SHA256", key_bytes * 8))
    })
}

fn read_pem(path: &Path) -> EnvelopeResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| EnvelopeError::Key(format!("reading {}: {e}", path.display())))
}

// ── Encryptor ──────────────────────────────────────────────────────

/// Public-key side, held by the agent.
#[derive(Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
    chunk: usize,
}

impl Encryptor {
    pub fn new(key: RsaPublicKey) -> EnvelopeResult<Self> {
        let chunk = usable_chunk_size(key.size())?;
        Ok(Self { key, chunk })
    }

    /// Parse an SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`) PEM.
    pub fn from_pem(pem: &str) -> EnvelopeResult<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| EnvelopeError::Key(e.to_string()))?;
        Self::new(key)
    }

    pub fn from_pem_file(path: &Path) -> EnvelopeResult<Self> {
        let encryptor = Self::from_pem(&read_pem(path)?)?;
        debug!(path = %path.display(), bits = encryptor.key.size() * 8, "public key loaded");
        Ok(encryptor)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> EnvelopeResult<Vec<u8>> {
        let k = self.key.size();
        let count = plaintext.len().div_ceil(self.chunk);
        let count_prefix = u32::try_from(count)
            .map_err(|_| EnvelopeError::Encrypt(format!("{count} blocks exceed the frame limit")))?;

        let mut out = Vec::with_capacity(COUNT_LEN + count * k);
        out.extend_from_slice(&count_prefix.to_be_bytes());

        let mut rng = rand::thread_rng();
        for block in plaintext.chunks(self.chunk) {
            let sealed = self
                .key
                .encrypt(&mut rng, Oaep::new::<Sha256>(), block)
                .map_err(|e| EnvelopeError::Encrypt(e.to_string()))?;
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("bits", &(self.key.size() * 8))
            .field("chunk", &self.chunk)
            .finish()
    }
}

// ── Decryptor ──────────────────────────────────────────────────────

/// Private-key side, held by the server.
#[derive(Clone)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn new(key: RsaPrivateKey) -> EnvelopeResult<Self> {
        usable_chunk_size(key.size())?;
        Ok(Self { key })
    }

    /// Parse a PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> EnvelopeResult<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| EnvelopeError::Key(e.to_string()))?;
        Self::new(key)
    }

    pub fn from_pem_file(path: &Path) -> EnvelopeResult<Self> {
        let decryptor = Self::from_pem(&read_pem(path)?)?;
        debug!(path = %path.display(), bits = decryptor.key.size() * 8, "private key loaded");
        Ok(decryptor)
    }

    /// Matching public half, for building an [`Encryptor`].
    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> EnvelopeResult<Vec<u8>> {
        let k = self.key.size();
        let (prefix, blocks) = ciphertext
            .split_first_chunk::<COUNT_LEN>()
            .ok_or_else(|| EnvelopeError::Framing("missing block count".to_string()))?;
        let count = u32::from_be_bytes(*prefix) as usize;

        let expected = count
            .checked_mul(k)
            .ok_or_else(|| EnvelopeError::Framing(format!("block count {count} overflows")))?;
        if blocks.len() != expected {
            return Err(EnvelopeError::Framing(format!(
                "{count} blocks of {k} bytes need {expected} bytes, got {}",
                blocks.len()
            )));
        }

        let mut out = Vec::with_capacity(count * chunk_size(k).unwrap_or(0));
        for block in blocks.chunks_exact(k) {
            let plain = self
                .key
                .decrypt(Oaep::new::<Sha256>(), block)
                .map_err(|e| EnvelopeError::Decrypt(e.to_string()))?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }
}

impl fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decryptor")
            .field("bits", &(self.key.size() * 8))
            .finish()
    }
}
