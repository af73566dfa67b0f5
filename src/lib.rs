//! `ewf_chunked` — a chunked storage engine for the EWF/Expert Witness
//! Compression Format family (EWF, Ex01, L01/LEF, SMART).
//!
//! A [`Handle`] is the public entry point: `Handle::open_read` opens an
//! existing segment-file set for positioned/sequential reading,
//! `Handle::create` starts a new acquisition, and `Handle::resume`
//! re-opens a write-in-progress container after a crash. Everything
//! below the Handle — the Block I/O Pool, Chunk Table, Chunk Cache,
//! codecs, and segment reader/writer — is reachable for callers that
//! want to work at a lower level (e.g. to inspect chunk descriptors
//! directly), but `Handle` is the only entry point most callers need.

pub mod cache;
pub mod checksum;
pub mod codec;
pub mod error;
pub mod handle;
pub mod io_pool;
pub mod media;
pub mod metadata;
pub mod provider;
pub mod section;
pub mod segment;
pub mod table;

pub use checksum::{Adler32, Digest, NullDigest};
pub use error::{ChecksumKind, EwfError, IoOp, Result};
pub use handle::{Handle, SeekWhence, WriteOptions};
pub use media::{CompressionLevel, CompressionOptions, FormatVariant, MediaFlags, MediaParameters, MediaType};
pub use metadata::{HashValues, HeaderValues, SectorRange};
pub use provider::{AccessFlags, BlockIoProvider, ProviderFile, SegmentPath, StdFsProvider};
pub use segment::glob::SignatureFamily;
pub use table::{ChunkDescriptor, ChunkFlags};
