//! Error types for the wire envelope.

use thiserror::Error;

/// Result type alias for envelope operations.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Errors raised while sealing or opening an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("compression failed: {0}")]
    Compress(String),

    #[error("malformed gzip body: {0}")]
    Decompress(String),

    #[error("decompressed body exceeds {0} bytes")]
    TooLarge(usize),

    #[error("signature mismatch")]
    Signature,

    #[error("request body is not signed")]
    MissingSignature,

    #[error("invalid key: {0}")]
    Key(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("malformed ciphertext: {0}")]
    Framing(String),

    #[error("body is encrypted but no private key is configured")]
    NoDecryptionKey,

    #[error("body must be encrypted")]
    NotEncrypted,
}

impl EnvelopeError {
    /// Signature and encryption failures are logged as security events.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            EnvelopeError::Signature
                | EnvelopeError::MissingSignature
                | EnvelopeError::Decrypt(_)
                | EnvelopeError::Framing(_)
                | EnvelopeError::NoDecryptionKey
                | EnvelopeError::NotEncrypted
        )
    }
}
