//! C10 — Handle: the public byte-stream API, §4.7/§4.9/§5.
//!
//! Owns the pool, chunk table, cache, codec options, write state, media
//! parameters and metadata maps. The `EWF` struct (`ewf.rs`) is the
//! closest analogue — a read-only façade over `Read`/`Seek` — this
//! generalizes it to the full state machine (`Empty`/`OpenRead`/
//! `OpenWrite`/`OpenReadWrite`) and adds the write path, which didn't
//! exist before.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::cache::ChunkCache;
use crate::checksum::Digest;
use crate::codec::chunk::{decode_chunk, encode_chunk};
use crate::error::{EwfError, Result};
use crate::io_pool::{IoPool, PoolEntry};
use crate::media::{CompressionOptions, FormatVariant, MediaParameters};
use crate::metadata::{HashValues, HeaderValues, SectorRange};
use crate::provider::{AccessFlags, BlockIoProvider, SegmentPath};
use crate::segment::glob::{enumerate_segments, segment_extension, SignatureFamily};
use crate::segment::reader::{parse_segment, SegmentSections};
use crate::segment::writer::SegmentWriter;
use crate::table::{ChunkDescriptor, ChunkTable, TableEntry};

const DEFAULT_CACHE_CAPACITY: usize = 16;
const DEFAULT_SEGMENT_BUDGET: u64 = 1024 * 1024 * 1024; // 1 GiB, overridable via WriteOptions.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Empty,
    OpenRead,
    OpenWrite,
    OpenReadWrite,
}

/// Parameters for `Handle::create`/`Handle::resume` (§4.7's `Open(write)`).
/// An explicit option struct in place of the source's global mutable
/// acquisition-options state (spec §9).
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub media: MediaParameters,
    pub compression: CompressionOptions,
    pub segment_size_budget: u64,
    pub family: SignatureFamily,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            media: MediaParameters {
                bytes_per_sector: 512,
                sectors_per_chunk: 64,
                number_of_sectors: 0,
                media_size: 0,
                media_type: crate::media::MediaType::Fixed,
                media_flags: crate::media::MediaFlags::PHYSICAL,
                format: FormatVariant::Encase5,
                error_granularity: 64,
            },
            compression: CompressionOptions::default(),
            segment_size_budget: DEFAULT_SEGMENT_BUDGET,
            family: SignatureFamily::Ewf,
        }
    }
}

struct WriteState {
    writer: SegmentWriter,
    segment_number: u16,
    base_path: PathBuf,
    chunk_index: usize,
}

struct Shared {
    table: ChunkTable,
    write: Option<WriteState>,
}

/// The Handle (C10). Read operations take `&self` so a Handle can be
/// shared (typically via `Arc<Handle>`) across concurrent reader threads,
/// per §5's scheduling model; the mutable bits (table, writer state,
/// cursor, checksum-errors list) are behind interior-mutable locks.
pub struct Handle {
    provider: Arc<dyn BlockIoProvider>,
    state: HandleState,
    pool: Option<IoPool>,
    shared: RwLock<Shared>,
    cache: ChunkCache,
    media: Option<MediaParameters>,
    compression: CompressionOptions,
    format: FormatVariant,
    family: SignatureFamily,
    segment_budget: u64,
    header_values: RwLock<HeaderValues>,
    hash_values: RwLock<HashValues>,
    acquisition_errors: RwLock<Vec<SectorRange>>,
    checksum_errors: Mutex<Vec<SectorRange>>,
    sessions: RwLock<Vec<SectorRange>>,
    cursor: AtomicU64,
    write_buffer: Mutex<Vec<u8>>,
    /// Streaming digests (MD5, SHA-1, …) run over the logical image as
    /// it's written, per C2 — the engine drives them, but never supplies
    /// an algorithm itself.
    digests: Mutex<Vec<Box<dyn Digest>>>,
}

impl Handle {
    fn empty(provider: Arc<dyn BlockIoProvider>) -> Self {
        Handle {
            provider,
            state: HandleState::Empty,
            pool: None,
            shared: RwLock::new(Shared {
                table: ChunkTable::new(),
                write: None,
            }),
            cache: ChunkCache::new(DEFAULT_CACHE_CAPACITY),
            media: None,
            compression: CompressionOptions::default(),
            format: FormatVariant::Encase5,
            family: SignatureFamily::Ewf,
            segment_budget: DEFAULT_SEGMENT_BUDGET,
            header_values: RwLock::new(HeaderValues::new()),
            hash_values: RwLock::new(HashValues::new()),
            acquisition_errors: RwLock::new(Vec::new()),
            checksum_errors: Mutex::new(Vec::new()),
            sessions: RwLock::new(Vec::new()),
            cursor: AtomicU64::new(0),
            write_buffer: Mutex::new(Vec::new()),
            digests: Mutex::new(Vec::new()),
        }
    }

    /// Register a streaming digest to run over the logical image as it's
    /// written (e.g. an MD5 or SHA-1 implementation the caller supplies).
    /// Must be added before the first chunk is written, since it cannot
    /// see bytes written before it was registered.
    pub fn add_digest(&self, digest: Box<dyn Digest>) -> Result<()> {
        self.ensure_writable()?;
        self.ensure_not_immutable()?;
        self.digests.lock().push(digest);
        Ok(())
    }

    // ---- Open(read) ----------------------------------------------------

    /// `Open(READ)`: enumerate every segment from `first_path`, parse each,
    /// and merge their chunk tables/metadata.
    pub fn open_read(provider: Arc<dyn BlockIoProvider>, first_path: &Path) -> Result<Self> {
        let mut handle = Handle::empty(provider.clone());
        let paths = enumerate_segments(provider.as_ref(), first_path)?;
        info!("opening {} segment(s) starting at {}", paths.len(), first_path.display());

        let segment_paths: Vec<SegmentPath> = paths
            .iter()
            .map(|p| SegmentPath {
                path: p.clone(),
                flags: AccessFlags::READ,
            })
            .collect();
        let pool = IoPool::new(provider, segment_paths, paths.len().min(32).max(1));

        let mut table = ChunkTable::new();
        let mut header_values = HeaderValues::new();
        let mut hash_values = HashValues::new();
        let mut acquisition_errors = Vec::new();
        let mut sessions = Vec::new();
        let mut media: Option<MediaParameters> = None;

        for (segment_index, path) in paths.iter().enumerate() {
            let entry = PoolEntry(segment_index);
            let sections = parse_segment(&pool, entry)?;
            if sections.tainted {
                warn!("segment {} ({}) has a corrupt section descriptor; marking tainted", segment_index, path.display());
            }

            if let Some(h) = sections.header_values {
                for (k, v) in h.iter() {
                    header_values.insert(k, v);
                }
            }
            if let Some(h) = sections.hash_values {
                for (k, v) in h.iter() {
                    hash_values.insert(k, v);
                }
            }
            acquisition_errors.extend(sections.acquisition_errors);
            sessions.extend(sections.sessions);

            if media.is_none() {
                if let Some(geometry) = sections.volume {
                    media = Some(MediaParameters {
                        bytes_per_sector: geometry.bytes_per_sector,
                        sectors_per_chunk: geometry.sectors_per_chunk,
                        number_of_sectors: geometry.sector_count,
                        media_size: geometry.sector_count * geometry.bytes_per_sector as u64,
                        media_type: geometry.media_type.unwrap_or(crate::media::MediaType::Fixed),
                        media_flags: geometry.media_flags,
                        format: FormatVariant::Encase5,
                        error_granularity: geometry.error_granularity,
                    });
                }
            }

            for block in sections.table_blocks {
                let (entries, tainted) = crate::table::resolve_table_fallback(block.table, block.table2);
                if tainted {
                    warn!(
                        "segment {} has a table block with no verifiable copy; chunks read as tainted",
                        segment_index
                    );
                }
                append_descriptors(&mut table, segment_index, &entries, block.end_of_sectors, tainted);
            }

            if sections.has_done {
                break;
            }
        }

        let media = media.ok_or_else(|| EwfError::Internal("no volume/disk section found".into()))?;

        handle.pool = Some(pool);
        handle.media = Some(media);
        handle.state = HandleState::OpenRead;
        handle.shared = RwLock::new(Shared { table, write: None });
        handle.header_values = RwLock::new(header_values);
        handle.hash_values = RwLock::new(hash_values);
        handle.acquisition_errors = RwLock::new(acquisition_errors);
        handle.sessions = RwLock::new(sessions);
        Ok(handle)
    }

    // ---- Open(write) / Open(write|resume) ------------------------------

    /// `Open(WRITE)`: fix media parameters, write the first segment's
    /// `header`/`volume` sections, and start accepting chunks.
    pub fn create(provider: Arc<dyn BlockIoProvider>, base_path: &Path, options: WriteOptions) -> Result<Self> {
        let mut handle = Handle::empty(provider.clone());
        handle.media = Some(options.media);
        handle.compression = options.compression;
        handle.format = options.media.format;
        handle.family = options.family;
        handle.segment_budget = options.segment_size_budget;

        let first_ext = segment_extension(family_letter(options.family), 1)?;
        let first_path = base_path.with_extension(first_ext);
        let pool = IoPool::new(
            provider,
            vec![SegmentPath {
                path: first_path.clone(),
                flags: AccessFlags::READ | AccessFlags::WRITE,
            }],
            4,
        );

        let mut writer = SegmentWriter::open(pool.clone(), PoolEntry(0), 0, options.family, 1)?;
        writer.write_header(&handle.header_values.read(), handle.format)?;
        writer.write_volume(&handle.media.unwrap())?;

        handle.pool = Some(pool);
        handle.state = HandleState::OpenWrite;
        handle.shared = RwLock::new(Shared {
            table: ChunkTable::new(),
            write: Some(WriteState {
                writer,
                segment_number: 1,
                base_path: base_path.to_path_buf(),
                chunk_index: 0,
            }),
        });
        info!(
            "opened {} for writing (segment budget {} bytes)",
            first_path.display(),
            options.segment_size_budget
        );
        Ok(handle)
    }

    /// `Open(WRITE|RESUME)`: re-open an in-progress container, truncating
    /// whatever trailing bytes follow the last well-formed section, and
    /// resume appending chunks into the same last segment.
    pub fn resume(provider: Arc<dyn BlockIoProvider>, first_path: &Path, options: WriteOptions) -> Result<Self> {
        let paths = enumerate_segments(provider.as_ref(), first_path)?;
        let base_path = first_path.with_extension("");

        let segment_paths: Vec<SegmentPath> = paths
            .iter()
            .map(|p| SegmentPath {
                path: p.clone(),
                flags: AccessFlags::READ | AccessFlags::WRITE,
            })
            .collect();
        let pool = IoPool::new(provider.clone(), segment_paths, paths.len().max(1));

        let mut table = ChunkTable::new();
        let mut last_sections: Option<SegmentSections> = None;
        for (segment_index, _) in paths.iter().enumerate() {
            let entry = PoolEntry(segment_index);
            let sections = parse_segment(&pool, entry)?;
            if segment_index + 1 == paths.len() {
                last_sections = Some(sections);
            } else {
                for block in sections.table_blocks {
                    let (entries, tainted) =
                        crate::table::resolve_table_fallback(block.table, block.table2);
                    append_descriptors(&mut table, segment_index, &entries, block.end_of_sectors, tainted);
                }
            }
        }

        let last_index = paths.len() - 1;
        let sections = last_sections.expect("at least one segment");
        let mut truncate_at = crate::segment::reader::FILE_HEADER_SIZE;
        for d in &sections.descriptors {
            truncate_at = truncate_at.max(d.next_offset);
        }
        for block in sections.table_blocks {
            let (entries, tainted) = crate::table::resolve_table_fallback(block.table, block.table2);
            append_descriptors(&mut table, last_index, &entries, block.end_of_sectors, tainted);
        }

        debug!("resume: truncating segment {} at offset {}", last_index, truncate_at);
        pool.truncate(PoolEntry(last_index), truncate_at)?;

        let writer = SegmentWriter::open_at(
            pool.clone(),
            PoolEntry(last_index),
            last_index,
            truncate_at,
        );

        let mut handle = Handle::empty(provider);
        handle.media = Some(options.media);
        handle.compression = options.compression;
        handle.format = options.media.format;
        handle.family = options.family;
        handle.segment_budget = options.segment_size_budget;
        let chunk_index = table.len();
        handle.pool = Some(pool);
        handle.state = HandleState::OpenWrite;
        handle.shared = RwLock::new(Shared {
            table,
            write: Some(WriteState {
                writer,
                segment_number: (last_index + 1) as u16,
                base_path,
                chunk_index,
            }),
        });
        Ok(handle)
    }

    // ---- Close ----------------------------------------------------------

    pub fn close(&mut self) -> Result<()> {
        if self.state == HandleState::Empty {
            return Ok(());
        }

        if matches!(self.state, HandleState::OpenWrite | HandleState::OpenReadWrite) {
            self.flush_pending_chunk()?;

            for digest in self.digests.lock().drain(..) {
                let name = digest.name().to_string();
                let hex = digest.finish_hex();
                self.hash_values.write().insert(name, hex);
            }

            let mut shared = self.shared.write();
            if let Some(write) = shared.write.as_mut() {
                write.writer.flush_table_block()?;
                write.writer.write_hash(&self.hash_values.read(), self.format)?;
                write
                    .writer
                    .write_sessions(&self.sessions.read())?;
                write
                    .writer
                    .write_errors(&self.acquisition_errors.read())?;
                write.writer.write_done_marker()?;
            }
            shared.write = None;
            info!("closed write handle");
        } else {
            info!("closed read handle");
        }

        self.state = HandleState::Empty;
        self.pool = None;
        Ok(())
    }

    // ---- Read path --------------------------------------------------------

    fn ensure_readable(&self) -> Result<()> {
        match self.state {
            HandleState::OpenRead | HandleState::OpenReadWrite => Ok(()),
            HandleState::Empty => Err(EwfError::NotOpen),
            HandleState::OpenWrite => Ok(()), // a writer may still read back what it just wrote
        }
    }

    fn chunk_logical_len(&self, chunk_index: usize, media: &MediaParameters) -> usize {
        let last = (media.number_of_chunks().saturating_sub(1)) as usize;
        if chunk_index == last {
            media.last_chunk_size() as usize
        } else {
            media.chunk_size() as usize
        }
    }

    /// Decode chunk `chunk_index` through the cache. Checksum-failure
    /// reporting lives inside the decode closure, so it only fires on a
    /// true cache miss (§8 property 5: "on first read") rather than on
    /// every hit.
    fn fetch_chunk(&self, chunk_index: usize) -> Result<Arc<Vec<u8>>> {
        let media = self.media.ok_or(EwfError::NotOpen)?;
        let descriptor = {
            let shared = self.shared.read();
            *shared
                .table
                .get(chunk_index)
                .ok_or(EwfError::OutOfRange {
                    offset: chunk_index as u64,
                    size: 1,
                })?
        };
        let expected_len = self.chunk_logical_len(chunk_index, &media);
        let pool = self.pool.clone().ok_or(EwfError::NotOpen)?;
        let wipe_on_error = self.compression.wipe_chunk_on_error;
        let sectors_per_chunk = media.sectors_per_chunk as u64;
        let checksum_errors = &self.checksum_errors;

        self.cache.get_or_decode(chunk_index, || {
            let mut stored = vec![0u8; descriptor.stored_size as usize];
            pool.read_exact(PoolEntry(descriptor.segment_index), descriptor.file_offset, &mut stored)?;
            let decoded = decode_chunk(&stored, descriptor.flags, expected_len);
            if decoded.checksum_failed {
                let first_sector = chunk_index as u64 * sectors_per_chunk;
                checksum_errors.lock().push(SectorRange {
                    first_sector,
                    number_of_sectors: sectors_per_chunk,
                });
            }
            if decoded.checksum_failed && wipe_on_error {
                Ok(vec![0u8; expected_len])
            } else {
                Ok(decoded.data)
            }
        })
    }

    /// `ReadAtOffset(buf, size, offset)`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.ensure_readable()?;
        let media = self.media.ok_or(EwfError::NotOpen)?;
        if offset >= media.media_size {
            return Ok(0);
        }
        let chunk_size = media.chunk_size();
        let to_read = buf.len().min((media.media_size - offset) as usize);
        let mut written = 0usize;
        while written < to_read {
            let abs = offset + written as u64;
            let chunk_index = (abs / chunk_size) as usize;
            let intra = (abs % chunk_size) as usize;
            let data = self.fetch_chunk(chunk_index)?;
            if intra >= data.len() {
                break;
            }
            let take = (data.len() - intra).min(to_read - written);
            buf[written..written + take].copy_from_slice(&data[intra..intra + take]);
            written += take;
        }
        Ok(written)
    }

    /// `Read(buf, size)`: reads from, and advances, the internal cursor.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let offset = self.cursor.load(Ordering::SeqCst);
        let n = self.read_at(offset, buf)?;
        self.cursor.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }

    pub fn seek(&self, offset: i64, whence: SeekWhence) -> Result<u64> {
        let media = self.media.ok_or(EwfError::NotOpen)?;
        let base = match whence {
            SeekWhence::Set => 0i64,
            SeekWhence::Cur => self.cursor.load(Ordering::SeqCst) as i64,
            SeekWhence::End => media.media_size as i64,
        };
        let target = base
            .checked_add(offset)
            .ok_or_else(|| EwfError::InvalidArgument("seek overflow".into()))?;
        if target < 0 {
            return Err(EwfError::InvalidArgument("seek before start of stream".into()));
        }
        self.cursor.store(target as u64, Ordering::SeqCst);
        Ok(target as u64)
    }

    pub fn offset(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    // ---- Write path -------------------------------------------------------

    fn ensure_writable(&self) -> Result<()> {
        match self.state {
            HandleState::OpenWrite | HandleState::OpenReadWrite => Ok(()),
            HandleState::OpenRead => Err(EwfError::ReadOnly),
            HandleState::Empty => Err(EwfError::NotOpen),
        }
    }

    /// `Write(buf, size)`: chunks must be assembled and appended in
    /// strictly increasing order (§4.7); this buffers `buf` and flushes
    /// whole chunks as they fill.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.ensure_writable()?;
        let media = self.media.ok_or(EwfError::NotOpen)?;
        let chunk_size = media.chunk_size() as usize;

        let mut offset = 0usize;
        while offset < buf.len() {
            let space = {
                let mut pending = self.write_buffer.lock();
                let space = chunk_size - pending.len();
                let take = space.min(buf.len() - offset);
                pending.extend_from_slice(&buf[offset..offset + take]);
                take
            };
            offset += space;

            let full = self.write_buffer.lock().len() >= chunk_size;
            if full {
                self.flush_pending_chunk()?;
            }
        }
        Ok(offset)
    }

    fn flush_pending_chunk(&self) -> Result<()> {
        let payload = {
            let mut pending = self.write_buffer.lock();
            if pending.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *pending)
        };

        for digest in self.digests.lock().iter_mut() {
            digest.update(&payload);
        }

        let encoded = encode_chunk(&payload, &self.compression);
        let mut shared = self.shared.write();
        let write_state = shared
            .write
            .as_mut()
            .ok_or(EwfError::Internal("write on a handle with no write state".into()))?;

        // §4.6's "segment is full" pre-check: never commit a chunk that
        // would push this segment's projected size past the budget.
        // A segment always takes its first chunk regardless of size
        // (chunks are never split), so the check only applies once the
        // in-flight block is non-empty.
        if write_state.writer.has_pending_chunks()
            && write_state.writer.projected_size(encoded.bytes.len()) >= self.segment_budget
        {
            self.roll_write_state(write_state)?;
        }

        let descriptor = write_state.writer.add_chunk(&encoded.bytes, encoded.flags);
        write_state.chunk_index += 1;
        shared.table.push(descriptor);
        debug!(
            "flushed chunk {} ({} bytes stored)",
            write_state.chunk_index - 1,
            encoded.bytes.len()
        );

        Ok(())
    }

    /// Close out the in-flight `sectors`/`table` block, emit `next`, and
    /// open the following segment file. Called with `write_state` already
    /// borrowed out of `self.shared`'s write lock, so this never takes
    /// the lock itself.
    fn roll_write_state(&self, write_state: &mut WriteState) -> Result<()> {
        write_state.writer.flush_table_block()?;
        write_state.writer.write_next_marker()?;

        let next_number = write_state.segment_number + 1;
        let ext = segment_extension(family_letter(self.family), next_number as u32)?;
        let next_path = write_state.base_path.with_extension(ext);
        let pool = self.pool.clone().ok_or(EwfError::NotOpen)?;
        let entry = pool.push(SegmentPath {
            path: next_path.clone(),
            flags: AccessFlags::READ | AccessFlags::WRITE,
        });

        let segment_index = entry.0;
        let mut writer = SegmentWriter::open(pool, entry, segment_index, self.family, next_number)?;
        writer.write_header(&self.header_values.read(), self.format)?;
        writer.write_volume(&self.media.unwrap())?;

        info!("rolled to segment {} ({})", next_number, next_path.display());
        write_state.writer = writer;
        write_state.segment_number = next_number;
        Ok(())
    }

    // ---- Metadata -----------------------------------------------------------

    pub fn media_parameters(&self) -> Option<MediaParameters> {
        self.media
    }

    pub fn header_values(&self) -> HeaderValues {
        self.header_values.read().clone()
    }

    pub fn set_header_values(&self, values: HeaderValues) -> Result<()> {
        self.ensure_not_immutable()?;
        *self.header_values.write() = values;
        Ok(())
    }

    pub fn hash_values(&self) -> HashValues {
        self.hash_values.read().clone()
    }

    pub fn set_hash_values(&self, values: HashValues) {
        *self.hash_values.write() = values;
    }

    pub fn acquisition_errors(&self) -> Vec<SectorRange> {
        self.acquisition_errors.read().clone()
    }

    pub fn checksum_errors(&self) -> Vec<SectorRange> {
        self.checksum_errors.lock().clone()
    }

    pub fn sessions(&self) -> Vec<SectorRange> {
        self.sessions.read().clone()
    }

    fn ensure_not_immutable(&self) -> Result<()> {
        let shared = self.shared.read();
        if let Some(write) = &shared.write {
            if write.chunk_index > 0 {
                return Err(EwfError::Immutable);
            }
        }
        Ok(())
    }
}

fn family_letter(family: SignatureFamily) -> char {
    match family {
        SignatureFamily::Ewf => 'E',
        SignatureFamily::Ex01 => 'E',
        SignatureFamily::Lef => 'L',
    }
}

fn append_descriptors(
    table: &mut ChunkTable,
    segment_index: usize,
    entries: &[TableEntry],
    end_of_sectors: u64,
    tainted: bool,
) {
    use crate::table::ChunkFlags;

    for (i, entry) in entries.iter().enumerate() {
        let stored_size = if i + 1 < entries.len() {
            entries[i + 1].offset - entry.offset
        } else {
            end_of_sectors.saturating_sub(entry.offset)
        };
        let mut flags = if entry.compressed {
            ChunkFlags::COMPRESSED
        } else {
            ChunkFlags::HAS_CHECKSUM
        };
        if tainted {
            flags |= ChunkFlags::TAINTED;
        }
        table.push(ChunkDescriptor {
            segment_index,
            file_offset: entry.offset,
            stored_size,
            flags,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaFlags, MediaType};
    use crate::provider::StdFsProvider;

    fn temp_base(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ewf_chunked_handle_test_{}_{}", std::process::id(), name));
        p.set_extension("E01");
        p
    }

    fn write_options(media_size: u64) -> WriteOptions {
        write_options_with_chunk(media_size, 2) // 1 KiB chunks, small for fast tests
    }

    fn write_options_with_chunk(media_size: u64, sectors_per_chunk: u32) -> WriteOptions {
        WriteOptions {
            media: MediaParameters {
                bytes_per_sector: 512,
                sectors_per_chunk,
                number_of_sectors: (media_size + 511) / 512,
                media_size,
                media_type: MediaType::Fixed,
                media_flags: MediaFlags::PHYSICAL,
                format: FormatVariant::Encase5,
                error_granularity: 2,
            },
            compression: CompressionOptions::default(),
            segment_size_budget: 1024 * 1024,
            family: SignatureFamily::Ewf,
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let _ = env_logger::try_init();
        let base = temp_base("roundtrip");
        let provider: Arc<dyn BlockIoProvider> = Arc::new(StdFsProvider);

        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let opts = write_options(payload.len() as u64);

        let mut handle = Handle::create(provider.clone(), &base, opts).unwrap();
        handle.write(&payload).unwrap();
        handle.close().unwrap();

        let first_path = base.with_extension("E01");
        let reader = Handle::open_read(provider, &first_path).unwrap();
        let mut out = vec![0u8; payload.len()];
        let n = reader.read_at(0, &mut out).unwrap();
        assert_eq!(n, payload.len());
        assert_eq!(out, payload);

        let _ = std::fs::remove_file(&first_path);
    }

    #[test]
    fn seek_and_sequential_read_agree_with_read_at() {
        let base = temp_base("seek");
        let provider: Arc<dyn BlockIoProvider> = Arc::new(StdFsProvider);

        let payload: Vec<u8> = (0..8192u32).map(|i| (i * 7 % 256) as u8).collect();
        let opts = write_options(payload.len() as u64);
        let mut handle = Handle::create(provider.clone(), &base, opts).unwrap();
        handle.write(&payload).unwrap();
        handle.close().unwrap();

        let first_path = base.with_extension("E01");
        let reader = Handle::open_read(provider, &first_path).unwrap();

        reader.seek(100, SeekWhence::Set).unwrap();
        let mut via_seek = vec![0u8; 50];
        reader.read(&mut via_seek).unwrap();

        let mut via_offset = vec![0u8; 50];
        reader.read_at(100, &mut via_offset).unwrap();

        assert_eq!(via_seek, via_offset);
        assert_eq!(&via_seek[..], &payload[100..150]);

        let _ = std::fs::remove_file(&first_path);
    }

    #[test]
    fn header_values_round_trip() {
        let base = temp_base("headers");
        let provider: Arc<dyn BlockIoProvider> = Arc::new(StdFsProvider);

        let opts = write_options(1024);
        let mut handle = Handle::create(provider.clone(), &base, opts).unwrap();
        let mut values = HeaderValues::new();
        values.insert("case_number", "C-1");
        values.insert("evidence_number", "E-7");
        handle.set_header_values(values.clone()).unwrap();
        handle.write(&vec![0xAAu8; 1024]).unwrap();
        handle.close().unwrap();

        let first_path = base.with_extension("E01");
        let reader = Handle::open_read(provider, &first_path).unwrap();
        let round_tripped = reader.header_values();
        assert_eq!(round_tripped.get("case_number"), Some("C-1"));
        assert_eq!(round_tripped.get("evidence_number"), Some("E-7"));

        let _ = std::fs::remove_file(&first_path);
    }

    #[test]
    fn pattern_fill_payload_survives_reopen() {
        let base = temp_base("pattern_fill");
        let provider: Arc<dyn BlockIoProvider> = Arc::new(StdFsProvider);

        let payload = vec![0xAAu8; 4096];
        let opts = write_options(payload.len() as u64);
        let mut handle = Handle::create(provider.clone(), &base, opts).unwrap();
        handle.write(&payload).unwrap();
        handle.close().unwrap();

        let first_path = base.with_extension("E01");
        let reader = Handle::open_read(provider, &first_path).unwrap();
        let mut out = vec![0u8; payload.len()];
        reader.read_at(0, &mut out).unwrap();
        assert_eq!(out, payload);

        let _ = std::fs::remove_file(&first_path);
    }

    #[test]
    fn registered_digest_finalizes_into_hash_values_on_close() {
        use crate::checksum::NullDigest;

        let base = temp_base("digest");
        let provider: Arc<dyn BlockIoProvider> = Arc::new(StdFsProvider);
        let opts = write_options(512);
        let mut handle = Handle::create(provider.clone(), &base, opts).unwrap();
        handle.add_digest(Box::new(NullDigest::new("MD5"))).unwrap();
        handle.write(&vec![0u8; 512]).unwrap();
        handle.close().unwrap();

        let first_path = base.with_extension("E01");
        let reader = Handle::open_read(provider, &first_path).unwrap();
        assert!(reader.hash_values().get("MD5").is_some());

        let _ = std::fs::remove_file(&first_path);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]
        // §8 testable property 1: round-trip over any byte sequence, at
        // varying chunk sizes.
        #[test]
        fn round_trip_over_any_payload_and_chunk_size(
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..6000),
            sectors_per_chunk in 1u32..9,
        ) {
            static COUNTER: AtomicU64 = AtomicU64::new(0);
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let mut base = std::env::temp_dir();
            base.push(format!("ewf_chunked_handle_proptest_{}_{}", std::process::id(), n));
            base.set_extension("E01");

            let provider: Arc<dyn BlockIoProvider> = Arc::new(StdFsProvider);
            let opts = write_options_with_chunk(payload.len() as u64, sectors_per_chunk);
            let mut handle = Handle::create(provider.clone(), &base, opts).unwrap();
            handle.write(&payload).unwrap();
            handle.close().unwrap();

            let first_path = base.with_extension("E01");
            let reader = Handle::open_read(provider, &first_path).unwrap();
            let mut out = vec![0u8; payload.len()];
            reader.read_at(0, &mut out).unwrap();
            proptest::prop_assert_eq!(out, payload);

            let _ = std::fs::remove_file(&first_path);
        }
    }

    #[test]
    fn write_on_read_only_handle_is_rejected() {
        let base = temp_base("readonly");
        let provider: Arc<dyn BlockIoProvider> = Arc::new(StdFsProvider);
        let opts = write_options(512);
        let mut handle = Handle::create(provider.clone(), &base, opts).unwrap();
        handle.write(&vec![0u8; 512]).unwrap();
        handle.close().unwrap();

        let first_path = base.with_extension("E01");
        let reader = Handle::open_read(provider, &first_path).unwrap();
        let err = reader.write(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, EwfError::ReadOnly));

        let _ = std::fs::remove_file(&first_path);
    }
}
