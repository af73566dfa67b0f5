//! C9 — Segment File (write side), §4.6.
//!
//! The read side has no write equivalent of its own; this follows §4.6's
//! section ordering directly: file header, `header`(`2`), `volume`, then
//! one or more `sectors`/`table`/`table2` blocks, then the optional
//! `digest`/`hash`, `session`/`error2`, and finally `next` (non-last
//! segment) or `done` (last segment). Because writing is strictly
//! sequential and forward-only, each section's `next` offset is always
//! just "my own start plus my own size" — there is no backpatching.

use crate::codec::compress;
use crate::error::Result;
use crate::io_pool::{IoPool, PoolEntry};
use crate::media::{CompressionLevel, FormatVariant, MediaParameters};
use crate::metadata::{serialize_header_values, HashValues, HeaderValues, SectorRange};
use crate::section::{kind, SectionDescriptor, SECTION_HEADER_SIZE};
use crate::segment::glob::SignatureFamily;
use crate::segment::reader::{encode_sector_ranges, encode_volume_payload, VolumeGeometry, FILE_HEADER_SIZE};
use crate::table::{ChunkDescriptor, ChunkFlags, TableEntry};

fn file_header_bytes(family: SignatureFamily, segment_number: u16) -> [u8; FILE_HEADER_SIZE as usize] {
    let sig = match family {
        SignatureFamily::Ewf => crate::segment::glob::SIG_EWF,
        SignatureFamily::Ex01 => crate::segment::glob::SIG_EX01,
        SignatureFamily::Lef => crate::segment::glob::SIG_LEF,
    };
    let mut header = [0u8; FILE_HEADER_SIZE as usize];
    header[0..8].copy_from_slice(&sig);
    header[8] = 1; // fields_start
    header[9..11].copy_from_slice(&segment_number.to_le_bytes());
    // header[11..13] (fields_end) stays zero.
    header
}

/// Sequential writer for one segment file. Holds the in-flight
/// `sectors`/`table` block in memory until [`SegmentWriter::flush_table_block`]
/// closes it — chunk offsets inside that block are computed up front since
/// the block's start position in the file is already known once it opens.
pub struct SegmentWriter {
    segment_index: usize,
    pool: IoPool,
    entry: PoolEntry,
    cursor: u64,
    pending_sectors: Vec<u8>,
    pending_entries: Vec<(TableEntry, u64, ChunkFlags)>,
    sectors_payload_start: Option<u64>,
}

impl SegmentWriter {
    pub fn open(
        pool: IoPool,
        entry: PoolEntry,
        segment_index: usize,
        family: SignatureFamily,
        segment_number: u16,
    ) -> Result<Self> {
        let header = file_header_bytes(family, segment_number);
        pool.write_all(entry, 0, &header)?;
        Ok(SegmentWriter {
            segment_index,
            pool,
            entry,
            cursor: FILE_HEADER_SIZE,
            pending_sectors: Vec::new(),
            pending_entries: Vec::new(),
            sectors_payload_start: None,
        })
    }

    /// Resume writing into an already-existing segment file at `cursor`
    /// (the offset of its last well-formed section's end), skipping the
    /// file-header write since it's already on disk.
    pub fn open_at(pool: IoPool, entry: PoolEntry, segment_index: usize, cursor: u64) -> Self {
        SegmentWriter {
            segment_index,
            pool,
            entry,
            cursor,
            pending_sectors: Vec::new(),
            pending_entries: Vec::new(),
            sectors_payload_start: None,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.cursor
    }

    /// True once at least one chunk has been appended to the in-flight
    /// block. A segment must always take its first chunk regardless of
    /// size (§4.6: chunks are never split across segments), so the roll
    /// pre-check only applies once a block is non-empty.
    pub fn has_pending_chunks(&self) -> bool {
        !self.pending_entries.is_empty()
    }

    /// Size in bytes of one `table`/`table2` payload for `entry_count`
    /// entries: `base_offset(8) + count(4) + pad(4) + checksum(4)` plus
    /// 4 bytes per entry plus a 4-byte entries checksum.
    fn table_block_payload_len(entry_count: usize) -> u64 {
        24 + entry_count as u64 * 4
    }

    /// Projects the total size this segment would reach if
    /// `additional_bytes` were appended to the in-flight `sectors` block
    /// and the block were closed out right after (`sectors` + `table` +
    /// `table2` sections, each with their own header). Used to implement
    /// §4.6's "segment is full" check before a chunk is committed, so
    /// §4.9's "segment full mid-chunk never happens: pre-checked; chunk
    /// deferred to next segment" holds.
    pub fn projected_size(&self, additional_bytes: usize) -> u64 {
        let sectors_payload = self.pending_sectors.len() as u64 + additional_bytes as u64;
        let entry_count = self.pending_entries.len() + 1;
        let table_len = Self::table_block_payload_len(entry_count);
        self.cursor
            + SECTION_HEADER_SIZE
            + sectors_payload
            + SECTION_HEADER_SIZE
            + table_len
            + SECTION_HEADER_SIZE
            + table_len
    }

    fn write_section(&mut self, section_type: &str, payload: &[u8]) -> Result<()> {
        let start = self.cursor;
        let total_size = SECTION_HEADER_SIZE + payload.len() as u64;
        let next_offset = start + total_size;
        let header = SectionDescriptor::encode(section_type, next_offset, total_size);
        self.pool.write_all(self.entry, start, &header)?;
        if !payload.is_empty() {
            self.pool
                .write_all(self.entry, start + SECTION_HEADER_SIZE, payload)?;
        }
        self.cursor = next_offset;
        Ok(())
    }

    /// `next`/`done` carry no payload and point their `next` offset back at
    /// their own start, the on-disk convention for "this is the last
    /// section in this file".
    fn write_terminal_section(&mut self, section_type: &str) -> Result<()> {
        let start = self.cursor;
        let header = SectionDescriptor::encode(section_type, start, SECTION_HEADER_SIZE);
        self.pool.write_all(self.entry, start, &header)?;
        self.cursor = start + SECTION_HEADER_SIZE;
        Ok(())
    }

    pub fn write_header(&mut self, values: &HeaderValues, format: FormatVariant) -> Result<()> {
        let text = serialize_header_values(values);
        let compressed = compress::deflate(&text, CompressionLevel::Best)?;
        self.write_section(kind::HEADER, &compressed)?;
        if format.has_header2() {
            self.write_section(kind::HEADER2, &compressed)?;
        }
        Ok(())
    }

    pub fn write_volume(&mut self, media: &MediaParameters) -> Result<()> {
        let geometry = VolumeGeometry {
            chunk_count: media.number_of_chunks() as u32,
            sectors_per_chunk: media.sectors_per_chunk,
            bytes_per_sector: media.bytes_per_sector,
            sector_count: media.number_of_sectors,
            media_type: Some(media.media_type),
            media_flags: media.media_flags,
            compression_level: 1,
            error_granularity: media.error_granularity,
        };
        let payload = encode_volume_payload(&geometry);
        let section_type = if matches!(media.format, FormatVariant::Ewf) {
            kind::DISK
        } else {
            kind::VOLUME
        };
        self.write_section(section_type, &payload)
    }

    /// Append one already-encoded chunk to the in-flight `sectors` block.
    /// Returns the descriptor that will describe this chunk once the block
    /// is flushed (its `file_offset`/`stored_size` are already final).
    pub fn add_chunk(&mut self, bytes: &[u8], flags: ChunkFlags) -> ChunkDescriptor {
        if self.sectors_payload_start.is_none() {
            self.sectors_payload_start = Some(self.cursor + SECTION_HEADER_SIZE);
        }
        let payload_start = self.sectors_payload_start.unwrap();
        let offset = payload_start + self.pending_sectors.len() as u64;
        let stored_size = bytes.len() as u64;
        self.pending_sectors.extend_from_slice(bytes);
        let entry = TableEntry {
            offset,
            compressed: flags.contains(ChunkFlags::COMPRESSED),
        };
        self.pending_entries.push((entry, stored_size, flags));

        ChunkDescriptor {
            segment_index: self.segment_index,
            file_offset: offset,
            stored_size,
            flags,
        }
    }

    /// Close the in-flight `sectors` block and emit `table` + `table2`.
    /// A no-op if no chunks were added since the last flush.
    pub fn flush_table_block(&mut self) -> Result<Vec<ChunkDescriptor>> {
        if self.pending_sectors.is_empty() {
            return Ok(Vec::new());
        }

        let base_offset = self.sectors_payload_start.unwrap();
        let sectors = std::mem::take(&mut self.pending_sectors);
        self.write_section(kind::SECTORS, &sectors)?;

        let entries: Vec<TableEntry> = self.pending_entries.iter().map(|(e, ..)| *e).collect();
        let table_payload = crate::table::encode_table_payload(base_offset, &entries);
        self.write_section(kind::TABLE, &table_payload)?;
        self.write_section(kind::TABLE2, &table_payload)?;

        let descriptors = self
            .pending_entries
            .drain(..)
            .map(|(entry, stored_size, flags)| ChunkDescriptor {
                segment_index: self.segment_index,
                file_offset: entry.offset,
                stored_size,
                flags,
            })
            .collect();
        self.sectors_payload_start = None;
        Ok(descriptors)
    }

    pub fn write_hash(&mut self, values: &HashValues, format: FormatVariant) -> Result<()> {
        if !format.has_digest_hash() {
            return Ok(());
        }
        let text = serialize_header_values(values);
        let compressed = compress::deflate(&text, CompressionLevel::Best)?;
        self.write_section(kind::HASH, &compressed)?;
        self.write_section(kind::XHASH, &compressed)
    }

    pub fn write_sessions(&mut self, sessions: &[SectorRange]) -> Result<()> {
        if sessions.is_empty() {
            return Ok(());
        }
        let payload = encode_sector_ranges(sessions);
        self.write_section(kind::SESSION, &payload)
    }

    pub fn write_errors(&mut self, errors: &[SectorRange]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        let payload = encode_sector_ranges(errors);
        self.write_section(kind::ERROR2, &payload)
    }

    /// Call on every segment except the last.
    pub fn write_next_marker(&mut self) -> Result<()> {
        self.write_terminal_section(kind::NEXT)
    }

    /// Call on the final segment only.
    pub fn write_done_marker(&mut self) -> Result<()> {
        self.write_terminal_section(kind::DONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaFlags, MediaType};
    use crate::provider::{AccessFlags, SegmentPath, StdFsProvider};
    use std::sync::Arc;

    fn temp_pool(name: &str) -> (IoPool, PoolEntry, std::path::PathBuf) {
        let mut path = std::env::temp_dir();
        path.push(format!("ewf_chunked_writer_test_{}_{}", std::process::id(), name));
        std::fs::write(&path, []).unwrap();
        let provider: Arc<dyn crate::provider::BlockIoProvider> = Arc::new(StdFsProvider);
        let pool = IoPool::new(
            provider,
            vec![SegmentPath {
                path: path.clone(),
                flags: AccessFlags::READ | AccessFlags::WRITE,
            }],
            1,
        );
        (pool, PoolEntry(0), path)
    }

    #[test]
    fn writes_a_readable_segment() {
        let (pool, entry, path) = temp_pool("basic");

        let mut writer =
            SegmentWriter::open(pool.clone(), entry, 0, SignatureFamily::Ewf, 1).unwrap();

        let mut header_values = HeaderValues::new();
        header_values.insert("case_number", "1");
        writer.write_header(&header_values, FormatVariant::Encase5).unwrap();

        let media = MediaParameters {
            bytes_per_sector: 512,
            sectors_per_chunk: 64,
            number_of_sectors: 128,
            media_size: 128 * 512,
            media_type: MediaType::Fixed,
            media_flags: MediaFlags::PHYSICAL,
            format: FormatVariant::Encase5,
            error_granularity: 64,
        };
        writer.write_volume(&media).unwrap();

        let chunk_payload = vec![0x42u8; 32768];
        let descriptor = writer.add_chunk(&chunk_payload, ChunkFlags::HAS_CHECKSUM);
        assert_eq!(descriptor.segment_index, 0);
        let flushed = writer.flush_table_block().unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].file_offset, descriptor.file_offset);

        writer.write_done_marker().unwrap();

        let parsed = crate::segment::reader::parse_segment(&pool, entry).unwrap();
        assert!(parsed.has_done);
        assert_eq!(parsed.header_values.unwrap().get("case_number"), Some("1"));
        assert!(parsed.volume.is_some());
        assert_eq!(parsed.table_blocks.len(), 1);
        let table = parsed.table_blocks[0].table.as_ref().unwrap().as_ref().unwrap();
        assert_eq!(table.entries.len(), 1);
        assert!(!table.entries[0].compressed);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn non_last_segment_gets_next_marker_not_done() {
        let (pool, entry, path) = temp_pool("next_marker");
        let mut writer =
            SegmentWriter::open(pool.clone(), entry, 0, SignatureFamily::Ewf, 1).unwrap();
        writer.write_next_marker().unwrap();

        let parsed = crate::segment::reader::parse_segment(&pool, entry).unwrap();
        assert!(parsed.has_next);
        assert!(!parsed.has_done);

        let _ = std::fs::remove_file(&path);
    }
}
