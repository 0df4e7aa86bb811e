//! gzip body compression.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{EnvelopeError, EnvelopeResult};

pub fn compress(data: &[u8]) -> EnvelopeResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| EnvelopeError::Compress(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| EnvelopeError::Compress(e.to_string()))
}

/// Inflate a gzip body, refusing output larger than `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> EnvelopeResult<Vec<u8>> {
    let decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| EnvelopeError::Decompress(e.to_string()))?;
    if out.len() > limit {
        return Err(EnvelopeError::TooLarge(limit));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflate_restores_input() {
        let body = br#"[{"id":"PollCount","type":"counter","delta":1}]"#;
        let packed = compress(body).unwrap();
        assert_eq!(decompress(&packed, 1024).unwrap(), body);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decompress(b"definitely not gzip", 1024).unwrap_err();
        assert!(matches!(err, EnvelopeError::Decompress(_)));
    }

    #[test]
    fn unbounded_limit_inflates() {
        let data = b"pulse".repeat(100);
        assert_eq!(decompress(&compress(&data).unwrap(), usize::MAX).unwrap(), data);
    }

    #[test]
    fn output_limit_enforced() {
        let packed = compress(&vec![b'a'; 4096]).unwrap();
        assert!(matches!(
            decompress(&packed, 1000),
            Err(EnvelopeError::TooLarge(1000))
        ));
    }
}
