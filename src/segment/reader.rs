//! C8 — Segment File (read side), §4.8/§4.9.
//!
//! Parses one segment file into its ordered section list and the
//! sub-structures the Handle needs (header values, volume geometry,
//! table/table2 raw entries, sector-range lists). Generalizes the
//! `EWF::parse_segment` loop (`ewf.rs`) from "stop at the first
//! thing that looks wrong" to §4.9's documented recovery policy: a
//! corrupt section descriptor is skipped (using its still-readable
//! `next`/`size` fields to keep walking) and the segment is marked
//! tainted rather than aborting the whole open.

use crate::checksum::adler32;
use crate::error::{EwfError, Result};
use crate::io_pool::{IoPool, PoolEntry};
use crate::media::{MediaFlags, MediaType};
use crate::metadata::{parse_header_values, HashValues, HeaderValues, SectorRange};
use crate::section::{kind, SectionDescriptor, SECTION_HEADER_SIZE};
use crate::table::ParsedTable;
use flate2::read::ZlibDecoder;
use std::io::Read;

pub const FILE_HEADER_SIZE: u64 = 13;

/// Geometry fields carried by the `volume`/`disk` section — segment-local
/// view of part of [`crate::media::MediaParameters`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeGeometry {
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
    pub media_type: Option<MediaType>,
    pub media_flags: MediaFlags,
    pub compression_level: u8,
    pub error_granularity: u32,
}

/// One `sectors` + `table`(`+table2`) block within a segment. A segment
/// normally has exactly one of these, but a resumed write appends a
/// second block rather than rolling to a new segment file, so the reader
/// collects all of them instead of keeping only the last.
#[derive(Debug)]
pub struct TableBlock {
    pub table: Option<Result<ParsedTable>>,
    pub table2: Option<Result<ParsedTable>>,
    /// Absolute end offset of this block's `sectors` payload — needed to
    /// derive the last entry's `stored_size` (table entries carry only an
    /// offset, not a length).
    pub end_of_sectors: u64,
}

#[derive(Debug, Default)]
pub struct SegmentSections {
    pub descriptors: Vec<SectionDescriptor>,
    pub header_values: Option<HeaderValues>,
    pub volume: Option<VolumeGeometry>,
    pub table_blocks: Vec<TableBlock>,
    pub hash_values: Option<HashValues>,
    pub acquisition_errors: Vec<SectorRange>,
    pub sessions: Vec<SectorRange>,
    pub tainted: bool,
    pub has_done: bool,
    pub has_next: bool,
}

fn read_file_header(pool: &IoPool, entry: PoolEntry) -> Result<()> {
    use crate::segment::glob::identify_signature;

    let mut header = [0u8; FILE_HEADER_SIZE as usize];
    pool.read_exact(entry, 0, &mut header)?;

    let mut sig = [0u8; 8];
    sig.copy_from_slice(&header[0..8]);
    if identify_signature(&sig).is_none() {
        return Err(EwfError::SignatureMismatch {
            path: pool.path_of(entry),
        });
    }

    let fields_start = header[8];
    let fields_end = &header[11..13];
    if fields_start != 1 || fields_end != [0u8, 0u8] {
        return Err(EwfError::SignatureMismatch {
            path: pool.path_of(entry),
        });
    }

    Ok(())
}

fn decompress_section(pool: &IoPool, entry: PoolEntry, data_offset: u64, size: u64) -> Result<Vec<u8>> {
    let mut compressed = vec![0u8; size as usize];
    pool.read_exact(entry, data_offset, &mut compressed)?;
    let mut decoder = ZlibDecoder::new(&compressed[..]);
    let mut data = Vec::new();
    decoder
        .read_to_end(&mut data)
        .map_err(|e| EwfError::Compression(e.to_string()))?;
    Ok(data)
}

fn parse_volume_payload(payload: &[u8]) -> VolumeGeometry {
    let mut geometry = VolumeGeometry::default();
    if payload.len() < 20 {
        return geometry;
    }
    let media_type_byte = payload[0];
    geometry.media_type = match media_type_byte {
        0 => Some(MediaType::Removable),
        1 => Some(MediaType::Fixed),
        2 => Some(MediaType::Optical),
        3 => Some(MediaType::SingleFile),
        4 => Some(MediaType::Memory),
        _ => None,
    };
    geometry.chunk_count = u32::from_le_bytes(payload[4..8].try_into().unwrap());
    geometry.sectors_per_chunk = u32::from_le_bytes(payload[8..12].try_into().unwrap());
    geometry.bytes_per_sector = u32::from_le_bytes(payload[12..16].try_into().unwrap());
    geometry.sector_count = u32::from_le_bytes(payload[16..20].try_into().unwrap()) as u64;
    if payload.len() > 20 {
        geometry.media_flags = MediaFlags::from_bits_truncate(payload[20]);
    }
    if payload.len() > 32 {
        geometry.compression_level = payload[32];
    }
    if payload.len() >= 40 {
        geometry.error_granularity = u32::from_le_bytes(payload[36..40].try_into().unwrap());
    }
    geometry
}

pub fn encode_volume_payload(geometry: &VolumeGeometry) -> Vec<u8> {
    let mut payload = vec![0u8; 40];
    payload[0] = match geometry.media_type {
        Some(MediaType::Removable) => 0,
        Some(MediaType::Fixed) => 1,
        Some(MediaType::Optical) => 2,
        Some(MediaType::SingleFile) => 3,
        Some(MediaType::Memory) => 4,
        None => 1,
    };
    payload[4..8].copy_from_slice(&geometry.chunk_count.to_le_bytes());
    payload[8..12].copy_from_slice(&geometry.sectors_per_chunk.to_le_bytes());
    payload[12..16].copy_from_slice(&geometry.bytes_per_sector.to_le_bytes());
    payload[16..20].copy_from_slice(&(geometry.sector_count as u32).to_le_bytes());
    payload[20] = geometry.media_flags.bits();
    payload[32] = geometry.compression_level;
    payload[36..40].copy_from_slice(&geometry.error_granularity.to_le_bytes());
    payload
}

/// `entry_count(4) || pad(4) || { first_sector(4), number_of_sectors(4) }*
/// || checksum(4)`. Shared wire shape for `session`/`error2` (§3's
/// "Sector range" lists); this internal layout is not part of what §1
/// scopes out (that's header/hash *metadata blob* parsing), since sector
/// ranges are core data-model state.
pub fn encode_sector_ranges(ranges: &[SectorRange]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + ranges.len() * 8);
    body.extend_from_slice(&(ranges.len() as u32).to_le_bytes());
    body.extend_from_slice(&[0u8; 4]);
    for r in ranges {
        body.extend_from_slice(&(r.first_sector as u32).to_le_bytes());
        body.extend_from_slice(&(r.number_of_sectors as u32).to_le_bytes());
    }
    let checksum = adler32(&body);
    body.extend_from_slice(&checksum.to_le_bytes());
    body
}

pub fn decode_sector_ranges(payload: &[u8]) -> Result<Vec<SectorRange>> {
    if payload.len() < 8 {
        return Ok(Vec::new());
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let body_end = 8 + count * 8;
    if payload.len() < body_end + 4 {
        return Err(EwfError::Truncated {
            path: Default::default(),
            offset: 0,
        });
    }
    let body = &payload[0..body_end];
    let stored_checksum = u32::from_le_bytes(payload[body_end..body_end + 4].try_into().unwrap());
    if adler32(body) != stored_checksum {
        return Err(EwfError::BadChecksum {
            kind: crate::error::ChecksumKind::Section,
            at: 0,
        });
    }
    let mut ranges = Vec::with_capacity(count);
    for i in 0..count {
        let start = 8 + i * 8;
        let first_sector = u32::from_le_bytes(payload[start..start + 4].try_into().unwrap()) as u64;
        let number_of_sectors =
            u32::from_le_bytes(payload[start + 4..start + 8].try_into().unwrap()) as u64;
        ranges.push(SectorRange {
            first_sector,
            number_of_sectors,
        });
    }
    Ok(ranges)
}

/// Parse every section of one segment file, in order, starting right
/// after the 13-byte file header.
pub fn parse_segment(pool: &IoPool, entry: PoolEntry) -> Result<SegmentSections> {
    read_file_header(pool, entry)?;

    let mut out = SegmentSections::default();
    let mut current_offset = FILE_HEADER_SIZE;
    let file_size = pool.size(entry)?;
    let mut pending_end_of_sectors: Option<u64> = None;

    loop {
        if current_offset + SECTION_HEADER_SIZE > file_size {
            return Err(EwfError::Truncated {
                path: pool.path_of(entry),
                offset: current_offset,
            });
        }

        let descriptor = match SectionDescriptor::read(pool, entry, current_offset) {
            Ok(d) => d,
            Err(EwfError::BadChecksum { .. }) => {
                out.tainted = true;
                break;
            }
            Err(e) => return Err(e),
        };

        let section_type = descriptor.section_type.clone();
        let next_offset = descriptor.next_offset;
        let size = descriptor.size;
        let payload_offset = current_offset + SECTION_HEADER_SIZE;
        let payload_size = descriptor.payload_size();
        out.descriptors.push(descriptor);

        match section_type.as_str() {
            kind::HEADER | kind::HEADER2 | kind::XHEADER => {
                let data = decompress_section(pool, entry, payload_offset, payload_size)?;
                let parsed = parse_header_values(&data);
                match &mut out.header_values {
                    Some(existing) => {
                        for (k, v) in parsed.iter() {
                            existing.insert(k, v);
                        }
                    }
                    None => out.header_values = Some(parsed),
                }
            }
            kind::VOLUME | kind::DISK => {
                let mut payload = vec![0u8; payload_size as usize];
                pool.read_exact(entry, payload_offset, &mut payload)?;
                out.volume = Some(parse_volume_payload(&payload));
            }
            kind::TABLE => {
                let mut payload = vec![0u8; payload_size as usize];
                pool.read_exact(entry, payload_offset, &mut payload)?;
                out.table_blocks.push(TableBlock {
                    table: Some(crate::table::decode_table_payload(&payload, payload_offset)),
                    table2: None,
                    end_of_sectors: pending_end_of_sectors.take().unwrap_or(payload_offset),
                });
            }
            kind::TABLE2 => {
                let mut payload = vec![0u8; payload_size as usize];
                pool.read_exact(entry, payload_offset, &mut payload)?;
                let parsed = crate::table::decode_table_payload(&payload, payload_offset);
                match out.table_blocks.last_mut() {
                    Some(block) => block.table2 = Some(parsed),
                    None => out.table_blocks.push(TableBlock {
                        table: None,
                        table2: Some(parsed),
                        end_of_sectors: pending_end_of_sectors.take().unwrap_or(payload_offset),
                    }),
                }
            }
            kind::SECTORS => {
                pending_end_of_sectors = Some(current_offset + size);
            }
            kind::HASH | kind::XHASH => {
                let data = decompress_section(pool, entry, payload_offset, payload_size)?;
                let parsed = parse_header_values(&data);
                match &mut out.hash_values {
                    Some(existing) => {
                        for (k, v) in parsed.iter() {
                            existing.insert(k, v);
                        }
                    }
                    None => out.hash_values = Some(parsed),
                }
            }
            kind::ERROR2 => {
                let mut payload = vec![0u8; payload_size as usize];
                pool.read_exact(entry, payload_offset, &mut payload)?;
                out.acquisition_errors = decode_sector_ranges(&payload).unwrap_or_default();
            }
            kind::SESSION => {
                let mut payload = vec![0u8; payload_size as usize];
                pool.read_exact(entry, payload_offset, &mut payload)?;
                out.sessions = decode_sector_ranges(&payload).unwrap_or_default();
            }
            kind::NEXT => {
                out.has_next = true;
                break;
            }
            kind::DONE => {
                out.has_done = true;
                break;
            }
            _ => {}
        }

        if next_offset == current_offset {
            // Self-referential next offset outside of `next`/`done` — treat
            // as the end of the section chain rather than looping forever.
            break;
        }
        current_offset = next_offset;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaFlags, MediaType};
    use crate::provider::{AccessFlags, SegmentPath, StdFsProvider};
    use crate::segment::glob::SignatureFamily;
    use crate::segment::writer::SegmentWriter;
    use std::sync::Arc;

    fn temp_pool(name: &str) -> (IoPool, PoolEntry, std::path::PathBuf) {
        let mut path = std::env::temp_dir();
        path.push(format!("ewf_chunked_reader_test_{}_{}", std::process::id(), name));
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
    fn sector_ranges_round_trip() {
        let ranges = vec![
            SectorRange {
                first_sector: 0,
                number_of_sectors: 64,
            },
            SectorRange {
                first_sector: 128,
                number_of_sectors: 32,
            },
        ];
        let encoded = encode_sector_ranges(&ranges);
        let decoded = decode_sector_ranges(&encoded).unwrap();
        assert_eq!(decoded, ranges);
    }

    #[test]
    fn sector_ranges_checksum_mismatch_is_rejected() {
        let ranges = vec![SectorRange {
            first_sector: 0,
            number_of_sectors: 1,
        }];
        let mut encoded = encode_sector_ranges(&ranges);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(decode_sector_ranges(&encoded).is_err());
    }

    #[test]
    fn volume_payload_round_trips_geometry() {
        let geometry = VolumeGeometry {
            chunk_count: 4,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            sector_count: 256,
            media_type: Some(MediaType::Fixed),
            media_flags: MediaFlags::PHYSICAL,
            compression_level: 2,
            error_granularity: 64,
        };
        let payload = encode_volume_payload(&geometry);
        let parsed = parse_volume_payload(&payload);
        assert_eq!(parsed.chunk_count, geometry.chunk_count);
        assert_eq!(parsed.sectors_per_chunk, geometry.sectors_per_chunk);
        assert_eq!(parsed.bytes_per_sector, geometry.bytes_per_sector);
        assert_eq!(parsed.sector_count, geometry.sector_count);
        assert_eq!(parsed.media_type, geometry.media_type);
        assert_eq!(parsed.error_granularity, geometry.error_granularity);
    }

    #[test]
    fn corrupt_section_checksum_taints_segment_instead_of_failing_open() {
        let (pool, entry, path) = temp_pool("tainted");
        let mut writer = SegmentWriter::open(pool.clone(), entry, 0, SignatureFamily::Ewf, 1).unwrap();
        writer.write_done_marker().unwrap();

        // Flip a byte inside the `done` section's header, past the type
        // field, to break its Adler-32 without breaking the file header.
        let mut byte = [0u8; 1];
        pool.read_exact(entry, FILE_HEADER_SIZE + 20, &mut byte).unwrap();
        byte[0] ^= 0xFF;
        pool.write_all(entry, FILE_HEADER_SIZE + 20, &byte).unwrap();

        let parsed = parse_segment(&pool, entry).unwrap();
        assert!(parsed.tainted);
        assert!(!parsed.has_done);

        let _ = std::fs::remove_file(&path);
    }
}
