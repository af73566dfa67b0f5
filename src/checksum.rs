//! Adler-32 (used on every section header and every raw-stored chunk) plus
//! the `Digest` capability the `hash`/`digest` sections build on.
//!
//! Adler-32 is small enough (the reference C implementation is a dozen
//! lines) that vendoring a crate for it would be silly; MD5/SHA-1 are a
//! different story — spec scope explicitly treats them as external
//! collaborators, so only the trait is shipped here, never an
//! implementation.

const MOD_ADLER: u32 = 65521;

/// Streaming Adler-32, matching the checksum trailer format used on
/// section descriptors, `table`/`table2` entries, and raw-stored chunks.
#[derive(Debug, Clone, Copy)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Adler32 {
    pub fn new() -> Self {
        Adler32 { a: 1, b: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        // Classic byte-at-a-time reduction; fine at chunk granularity
        // (typically 32 KiB) without needing a NMAX-windowed variant.
        for &byte in data {
            self.a = (self.a + byte as u32) % MOD_ADLER;
            self.b = (self.b + self.a) % MOD_ADLER;
        }
    }

    pub fn finish(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// One-shot convenience wrapper around [`Adler32`].
pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = Adler32::new();
    hasher.update(data);
    hasher.finish()
}

/// Capability interface for a streaming message digest (MD5, SHA-1, …).
/// The engine calls this while assembling the `hash`/`digest` sections but
/// never ships a concrete algorithm — callers supply one.
pub trait Digest: Send {
    /// Human-readable digest name as it appears in the hash-values map
    /// (e.g. `"MD5"`, `"SHA1"`).
    fn name(&self) -> &'static str;
    fn update(&mut self, data: &[u8]);
    /// Hex-encoded digest of everything fed so far. Consuming `self`
    /// mirrors the one-shot finalize step most digest crates expose.
    fn finish_hex(self: Box<Self>) -> String;
}

/// A `Digest` that discards its input. Used where a caller wants the
/// hash-value machinery wired up (e.g. for tests) without depending on an
/// actual MD5/SHA-1 implementation.
#[derive(Default)]
pub struct NullDigest {
    name: &'static str,
}

impl NullDigest {
    pub fn new(name: &'static str) -> Self {
        NullDigest { name }
    }
}

impl Digest for NullDigest {
    fn name(&self) -> &'static str {
        self.name
    }

    fn update(&mut self, _data: &[u8]) {}

    fn finish_hex(self: Box<Self>) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adler32_matches_known_vector() {
        // "Wikipedia" -> 0x11E60398 per the RFC 1950 worked example.
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn adler32_empty_is_one() {
        assert_eq!(adler32(b""), 1);
    }

    #[test]
    fn adler32_streaming_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut streaming = Adler32::new();
        for chunk in data.chunks(7) {
            streaming.update(chunk);
        }
        assert_eq!(streaming.finish(), adler32(data));
    }
}
