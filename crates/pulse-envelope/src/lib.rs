//! pulse-envelope — the wire wrapper around metric batches.
//!
//! # Layers
//!
//! ```text
//! sender:   JSON ─► gzip ─► HMAC-SHA256 ─► RSA-OAEP (chunked) ─► HTTP body
//! receiver: HTTP body ─► decrypt ─► verify ─► gunzip ─► JSON
//! ```
//!
//! Each layer is optional and configured independently on both sides.
//! Side-channel values travel in headers: `Content-Encoding: gzip`,
//! [`SIGNATURE_HEADER`] and [`ENCRYPTED_HEADER`].

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod gzip;
pub mod signature;

pub use cipher::{Decryptor, Encryptor};
pub use envelope::{
    Incoming, Opener, Sealed, Sealer, DEFAULT_MAX_BODY, ENCRYPTED_HEADER, ENCRYPTION_SCHEME,
    SIGNATURE_HEADER,
};
pub use error::{EnvelopeError, EnvelopeResult};
pub use signature::Signer;
