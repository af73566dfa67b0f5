//! Closed set of error kinds returned by the chunked storage engine.
//!
//! Mirrors the kinds enumerated in the format's error-handling design:
//! every fallible entry point returns `EwfError`, and the only kinds that
//! are ever recovered from internally are `BadChecksum { kind: Chunk, .. }`
//! (reported through the checksum-errors list, data still returned) and
//! `BadChecksum { kind: Table, .. }` (falls back to `table2`).

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Which checksum verification failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Section,
    Table,
    Chunk,
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChecksumKind::Section => "section",
            ChecksumKind::Table => "table",
            ChecksumKind::Chunk => "chunk",
        };
        f.write_str(s)
    }
}

/// The file I/O operation that failed, for `EwfError::Io` context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Read,
    Write,
    Seek,
    Size,
    Close,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IoOp::Open => "open",
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Seek => "seek",
            IoOp::Size => "size",
            IoOp::Close => "close",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EwfError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("handle is not open")]
    NotOpen,

    #[error("handle is already open")]
    AlreadyOpen,

    #[error("handle is read-only")]
    ReadOnly,

    #[error("media parameters are immutable after the first chunk is written")]
    Immutable,

    #[error("I/O error during {op} on {path}: {source}")]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("signature mismatch: {path} is not an EWF-family segment file")]
    SignatureMismatch { path: PathBuf },

    #[error("truncated segment: unexpected end of file in {path} at offset {offset}")]
    Truncated { path: PathBuf, offset: u64 },

    #[error("bad {kind} checksum at {at}")]
    BadChecksum { kind: ChecksumKind, at: u64 },

    #[error("unsupported format variant: {variant}")]
    UnsupportedFormat { variant: String },

    #[error("out of range: offset {offset} size {size} exceeds media bounds")]
    OutOfRange { offset: u64, size: u64 },

    #[error("compression failure: {0}")]
    Compression(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EwfError>;

impl EwfError {
    pub fn io(op: IoOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        EwfError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
