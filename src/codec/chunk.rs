//! C6 — Chunk Codec (per-chunk layer), §4.3.
//!
//! Turns a raw `chunk-size` payload into the bytes actually written to a
//! segment's `sectors` section, and back. Built on top of
//! `codec::compress` and `checksum::adler32`; the pattern-fill detector
//! is new (`ewf.rs` is read-only and never needed one) using the
//! 8-byte-pattern idea from spec §4.2.

use crate::checksum::adler32;
use crate::codec::compress;
use crate::media::CompressionOptions;
use crate::table::ChunkFlags;

const PATTERN_LEN: usize = 8;
const CHECKSUM_LEN: usize = 4;

pub struct EncodedChunk {
    pub bytes: Vec<u8>,
    pub flags: ChunkFlags,
}

/// Detect a payload that is wholly a repeated N-byte pattern (N <= 8).
/// A constant-byte payload is the degenerate 1-byte-pattern case, which
/// covers §4.2's "empty-block detection" without needing a distinct flag
/// — spec §3's chunk-descriptor flag set has no separate "empty" bit.
fn detect_pattern(payload: &[u8], opts: &CompressionOptions) -> Option<[u8; PATTERN_LEN]> {
    if payload.is_empty() {
        return None;
    }

    if opts.use_empty_block_compression {
        let first = payload[0];
        if payload.iter().all(|&b| b == first) {
            return Some([first; PATTERN_LEN]);
        }
    }

    if opts.use_pattern_fill_compression && payload.len() >= PATTERN_LEN {
        let mut pattern = [0u8; PATTERN_LEN];
        pattern.copy_from_slice(&payload[0..PATTERN_LEN]);
        let matches = payload.chunks(PATTERN_LEN).all(|window| {
            window
                .iter()
                .zip(pattern.iter())
                .all(|(a, b)| a == b)
        });
        if matches {
            return Some(pattern);
        }
    }

    None
}

fn store_raw(payload: &[u8]) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&adler32(payload).to_le_bytes());
    EncodedChunk {
        bytes,
        flags: ChunkFlags::HAS_CHECKSUM,
    }
}

/// Encode one chunk payload per §4.3's four-step policy.
///
/// A table entry's only on-disk signal is the single `compressed` bit
/// (§4.4's base-offset packing), so a pattern-fill chunk can't be told
/// apart from an ordinary deflate-compressed one once reloaded from a
/// fresh `open` — it has to actually be a valid deflate stream, not a
/// raw 8-byte marker. We deflate the full repeated payload (which costs
/// almost nothing, since it's maximally compressible) and set both
/// `PATTERN_FILL` (informational, for the descriptor the writer just
/// produced) and `COMPRESSED` (the bit that makes it decode correctly
/// after a reopen).
pub fn encode_chunk(payload: &[u8], opts: &CompressionOptions) -> EncodedChunk {
    use crate::media::CompressionLevel;

    let compression_off = matches!(opts.level, CompressionLevel::None);
    let detection_disabled = !opts.use_empty_block_compression && !opts.use_pattern_fill_compression;

    // Step 1: compression off AND empty-block detection disabled.
    if compression_off && detection_disabled {
        return store_raw(payload);
    }

    // Step 2: empty/pattern detection.
    if detect_pattern(payload, opts).is_some() {
        if let Ok(compressed) = compress::deflate(payload, CompressionLevel::Best) {
            return EncodedChunk {
                bytes: compressed,
                flags: ChunkFlags::PATTERN_FILL | ChunkFlags::COMPRESSED,
            };
        }
    }

    if compression_off {
        return store_raw(payload);
    }

    // Step 3: deflate-compress, falling back to raw storage if it didn't
    // actually save space (accounting for the 4-byte checksum overhead
    // that raw storage carries and compressed storage doesn't).
    let compressed = match compress::deflate(payload, opts.level) {
        Ok(bytes) => bytes,
        Err(_) => return store_raw(payload),
    };

    if compressed.len() >= payload.len() + CHECKSUM_LEN {
        return store_raw(payload);
    }

    EncodedChunk {
        bytes: compressed,
        flags: ChunkFlags::COMPRESSED,
    }
}

/// Outcome of decoding one stored chunk.
pub struct DecodedChunk {
    pub data: Vec<u8>,
    /// Set when a compressed stream failed to inflate — §4.2's
    /// bug-compatible-truncation tolerance: the raw stored bytes are
    /// returned (possibly short of `expected_len`) rather than failing.
    pub corrupt: bool,
    /// Set when a raw-stored chunk's Adler-32 trailer didn't match.
    pub checksum_failed: bool,
}

/// Decode one stored chunk. `expected_len` is the logical length this
/// chunk should produce (`chunk_size`, or the short last chunk).
pub fn decode_chunk(stored: &[u8], flags: ChunkFlags, expected_len: usize) -> DecodedChunk {
    if flags.contains(ChunkFlags::COMPRESSED) {
        return match compress::inflate(stored) {
            Ok(data) => DecodedChunk {
                data,
                corrupt: false,
                checksum_failed: false,
            },
            Err(_) => DecodedChunk {
                data: stored.to_vec(),
                corrupt: true,
                checksum_failed: false,
            },
        };
    }

    // Raw-stored chunk: payload followed by a 4-byte Adler-32 trailer.
    let split = stored.len().saturating_sub(CHECKSUM_LEN);
    let (payload, trailer) = stored.split_at(split);
    let checksum_failed = if trailer.len() == CHECKSUM_LEN {
        let stored_checksum = u32::from_le_bytes(trailer.try_into().unwrap());
        adler32(payload) != stored_checksum
    } else {
        true
    };

    DecodedChunk {
        data: payload.to_vec(),
        corrupt: false,
        checksum_failed,
    }
}
