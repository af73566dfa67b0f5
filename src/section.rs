//! C4 — Section descriptor framing (§6).
//!
//! Every section in a segment file starts with a fixed 76-byte header:
//! a 16-byte ASCII type, an 8-byte absolute `next` offset, an 8-byte
//! `size`, 40 bytes of padding, and a 4-byte Adler-32 over the preceding
//! 72 bytes. This generalizes `EwfSectionDescriptor` (`ewf.rs`), which
//! only ever reads the type/next/size fields (and reads its checksum
//! from the wrong offset, `offset + 104`, presumably aliasing an
//! unrelated field) — here the checksum is verified per spec §6's
//! framing and the descriptor can also be serialized for the write path.

use crate::checksum::adler32;
use crate::error::{ChecksumKind, EwfError, Result};
use crate::io_pool::{IoPool, PoolEntry};

pub const SECTION_HEADER_SIZE: u64 = 76;
const TYPE_LEN: usize = 16;
const PAD_LEN: usize = 40;

/// Recognized section type strings (§6).
pub mod kind {
    pub const HEADER: &str = "header";
    pub const HEADER2: &str = "header2";
    pub const VOLUME: &str = "volume";
    pub const DISK: &str = "disk";
    pub const DATA: &str = "data";
    pub const TABLE: &str = "table";
    pub const TABLE2: &str = "table2";
    pub const SECTORS: &str = "sectors";
    pub const NEXT: &str = "next";
    pub const DONE: &str = "done";
    pub const DIGEST: &str = "digest";
    pub const HASH: &str = "hash";
    pub const SESSION: &str = "session";
    pub const ERROR2: &str = "error2";
    pub const LTREE: &str = "ltree";
    pub const XHEADER: &str = "xheader";
    pub const XHASH: &str = "xhash";
    pub const LTYPE: &str = "ltype";
}

/// A parsed section header (§3 "Section"): `{ type, next, size }`.
/// `{ segment_index, offset }` pairs identify where it lives, per the
/// redesign note in spec §9 ("never as direct pointers").
#[derive(Debug, Clone)]
pub struct SectionDescriptor {
    pub section_type: String,
    pub next_offset: u64,
    pub size: u64,
}

impl SectionDescriptor {
    /// Read and verify the descriptor at `offset` within the segment
    /// identified by `entry`.
    pub fn read(pool: &IoPool, entry: PoolEntry, offset: u64) -> Result<Self> {
        let mut header = [0u8; SECTION_HEADER_SIZE as usize];
        pool.read_exact(entry, offset, &mut header)?;

        let checksum_region = &header[0..72];
        let stored_checksum = u32::from_le_bytes(header[72..76].try_into().unwrap());
        let computed = adler32(checksum_region);
        if computed != stored_checksum {
            return Err(EwfError::BadChecksum {
                kind: ChecksumKind::Section,
                at: offset,
            });
        }

        let mut section_type = String::from_utf8_lossy(&header[0..TYPE_LEN]).into_owned();
        section_type.retain(|c| c != '\0');

        let next_offset = u64::from_le_bytes(header[16..24].try_into().unwrap());
        let size = u64::from_le_bytes(header[24..32].try_into().unwrap());

        Ok(SectionDescriptor {
            section_type,
            next_offset,
            size,
        })
    }

    /// Serialize the 76-byte header (with checksum) for the write path.
    /// `total_size` is the section size *including* this header.
    pub fn encode(section_type: &str, next_offset: u64, total_size: u64) -> [u8; SECTION_HEADER_SIZE as usize] {
        let mut header = [0u8; SECTION_HEADER_SIZE as usize];
        let type_bytes = section_type.as_bytes();
        let n = type_bytes.len().min(TYPE_LEN);
        header[0..n].copy_from_slice(&type_bytes[0..n]);
        header[16..24].copy_from_slice(&next_offset.to_le_bytes());
        header[24..32].copy_from_slice(&total_size.to_le_bytes());
        // bytes 32..72 stay zero (the 40-byte padding).
        let checksum = adler32(&header[0..72]);
        header[72..76].copy_from_slice(&checksum.to_le_bytes());
        header
    }

    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(SECTION_HEADER_SIZE)
    }
}

const _: () = assert!(PAD_LEN == 40);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AccessFlags, SegmentPath, StdFsProvider};
    use std::sync::Arc;

    #[test]
    fn encode_then_read_round_trips() {
        let header = SectionDescriptor::encode("table", 1234, 200);

        let mut path = std::env::temp_dir();
        path.push(format!("ewf_chunked_section_test_{}", std::process::id()));
        std::fs::write(&path, header).unwrap();

        let provider: Arc<dyn crate::provider::BlockIoProvider> = Arc::new(StdFsProvider);
        let pool = IoPool::new(
            provider,
            vec![SegmentPath {
                path: path.clone(),
                flags: AccessFlags::READ,
            }],
            1,
        );

        let parsed = SectionDescriptor::read(&pool, PoolEntry(0), 0).unwrap();
        assert_eq!(parsed.section_type, "table");
        assert_eq!(parsed.next_offset, 1234);
        assert_eq!(parsed.size, 200);
        assert_eq!(parsed.payload_size(), 200 - SECTION_HEADER_SIZE);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupted_header_fails_checksum() {
        let mut header = SectionDescriptor::encode("sectors", 0, 76);
        header[0] = b'X'; // corrupt the type field without touching the checksum

        let mut path = std::env::temp_dir();
        path.push(format!("ewf_chunked_section_bad_{}", std::process::id()));
        std::fs::write(&path, header).unwrap();

        let provider: Arc<dyn crate::provider::BlockIoProvider> = Arc::new(StdFsProvider);
        let pool = IoPool::new(
            provider,
            vec![SegmentPath {
                path: path.clone(),
                flags: AccessFlags::READ,
            }],
            1,
        );

        let err = SectionDescriptor::read(&pool, PoolEntry(0), 0).unwrap_err();
        assert!(matches!(
            err,
            EwfError::BadChecksum {
                kind: ChecksumKind::Section,
                ..
            }
        ));

        let _ = std::fs::remove_file(&path);
    }
}
