//! Sealing and opening request bodies.
//!
//! The sender applies, in order: gzip, HMAC signature over the (compressed)
//! body, chunked RSA encryption over the signed body. The receiver undoes
//! them in reverse: decrypt, verify, gunzip.

use std::borrow::Cow;
use std::sync::Arc;

use crate::cipher::{Decryptor, Encryptor};
use crate::error::{EnvelopeError, EnvelopeResult};
use crate::gzip;
use crate::signature::Signer;

/// Header carrying the hex HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Header marking an RSA-encrypted body; its value is [`ENCRYPTION_SCHEME`].
pub const ENCRYPTED_HEADER: &str = "X-Encrypted";

pub const ENCRYPTION_SCHEME: &str = "rsa-oaep";

/// Upper bound on a decompressed request body.
pub const DEFAULT_MAX_BODY: usize = 8 * 1024 * 1024;

/// A body ready for the wire plus the side-channel values to send with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sealed {
    pub body: Vec<u8>,
    /// Send `Content-Encoding: gzip`.
    pub gzip: bool,
    /// Value for [`SIGNATURE_HEADER`].
    pub signature: Option<String>,
    /// Send [`ENCRYPTED_HEADER`].
    pub encrypted: bool,
}

/// Side-channel values read off an incoming request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Incoming<'a> {
    pub gzip: bool,
    pub signature: Option<&'a str>,
    pub encrypted: bool,
}

// ── Sealer ─────────────────────────────────────────────────────────

/// Sending side of the envelope.
#[derive(Debug, Clone, Default)]
pub struct Sealer {
    compress: bool,
    signer: Option<Signer>,
    encryptor: Option<Arc<Encryptor>>,
}

impl Sealer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_encryptor(mut self, encryptor: Option<Encryptor>) -> Self {
        self.encryptor = encryptor.map(Arc::new);
        self
    }

    pub fn seal(&self, payload: &[u8]) -> EnvelopeResult<Sealed> {
        let body = if self.compress {
            gzip::compress(payload)?
        } else {
            payload.to_vec()
        };

        let signature = match &self.signer {
            Some(signer) => Some(signer.sign(&body)?),
            None => None,
        };

        let (body, encrypted) = match &self.encryptor {
            Some(enc) => (enc.encrypt(&body)?, true),
            None => (body, false),
        };

        Ok(Sealed {
            body,
            gzip: self.compress,
            signature,
            encrypted,
        })
    }
}

// ── Opener ─────────────────────────────────────────────────────────

/// Receiving side of the envelope.
#[derive(Debug, Clone)]
pub struct Opener {
    signer: Option<Signer>,
    decryptor: Option<Arc<Decryptor>>,
    max_body: usize,
}

impl Default for Opener {
    fn default() -> Self {
        Self {
            signer: None,
            decryptor: None,
            max_body: DEFAULT_MAX_BODY,
        }
    }
}

impl Opener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_decryptor(mut self, decryptor: Option<Decryptor>) -> Self {
        self.decryptor = decryptor.map(Arc::new);
        self
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    pub fn max_body(&self) -> usize {
        self.max_body
    }

    /// The shared-secret signer, also used to sign responses.
    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    /// Undo the sender's layers.
    ///
    /// With a private key configured, non-empty bodies must be encrypted.
    /// With a shared key configured, non-empty bodies must be signed.
    pub fn open(&self, body: &[u8], incoming: Incoming<'_>) -> EnvelopeResult<Vec<u8>> {
        if body.is_empty() {
            return Ok(Vec::new());
        }

        let body: Cow<'_, [u8]> = match (&self.decryptor, incoming.encrypted) {
            (Some(dec), true) => Cow::Owned(dec.decrypt(body)?),
            (None, true) => return Err(EnvelopeError::NoDecryptionKey),
            (Some(_), false) => return Err(EnvelopeError::NotEncrypted),
            (None, false) => Cow::Borrowed(body),
        };

        if let Some(signer) = &self.signer {
            let signature = incoming.signature.ok_or(EnvelopeError::MissingSignature)?;
            signer.verify(&body, signature)?;
        }

        if incoming.gzip {
            gzip::decompress(&body, self.max_body)
        } else if body.len() > self.max_body {
            Err(EnvelopeError::TooLarge(self.max_body))
        } else {
            Ok(body.into_owned())
        }
    }
}
