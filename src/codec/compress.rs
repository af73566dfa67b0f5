//! C3 — Compression Codec.
//!
//! Deflate at three levels, built on the existing `flate2` dependency
//! (`ewf.rs` only ever reads via `ZlibDecoder` — this adds the write
//! side). §4.2 also requires that decode tolerate *truncated*
//! compressed streams produced by bug-compatible EnCase writers: on a
//! decode error we hand the raw bytes back up rather than failing the
//! read; that policy lives in `codec::chunk` (which also needs the raw
//! bytes to fall back to), this module just reports the error.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{EwfError, Result};
use crate::media::CompressionLevel;

fn compression_for(level: CompressionLevel) -> Compression {
    match level {
        CompressionLevel::None => Compression::none(),
        CompressionLevel::Fast => Compression::fast(),
        CompressionLevel::Best => Compression::best(),
    }
}

pub fn deflate(payload: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), compression_for(level));
    encoder
        .write_all(payload)
        .map_err(|e| EwfError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| EwfError::Compression(e.to_string()))
}

/// Returns `Err` on a genuinely malformed or truncated stream; the caller
/// (`codec::chunk::decode_chunk`) is responsible for the corrupt-chunk
/// fallback policy.
pub fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut data = Vec::new();
    decoder
        .read_to_end(&mut data)
        .map_err(|e| EwfError::Compression(e.to_string()))?;
    Ok(data)
}

/// Bounded-growth estimate for a deflate of `raw_len` bytes, using zlib's
/// own `compressBound` formula so callers can pre-size buffers without
/// actually compressing first.
pub fn compressed_size_bound(raw_len: usize) -> usize {
    raw_len + (raw_len >> 12) + (raw_len >> 14) + (raw_len >> 25) + 13
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_at_every_level() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(100);
        for level in [
            CompressionLevel::None,
            CompressionLevel::Fast,
            CompressionLevel::Best,
        ] {
            let compressed = deflate(&payload, level).unwrap();
            let restored = inflate(&compressed).unwrap();
            assert_eq!(restored, payload);
        }
    }

    #[test]
    fn truncated_stream_is_an_error_not_a_panic() {
        let payload = vec![0xAB; 4096];
        let compressed = deflate(&payload, CompressionLevel::Best).unwrap();
        let truncated = &compressed[..compressed.len() / 2];
        assert!(inflate(truncated).is_err());
    }

    #[test]
    fn bound_is_never_smaller_than_actual_output() {
        let payload: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
        let compressed = deflate(&payload, CompressionLevel::Best).unwrap();
        assert!(compressed.len() <= compressed_size_bound(payload.len()));
    }
}
