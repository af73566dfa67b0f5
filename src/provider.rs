//! Block I/O provider — the capability boundary the core consumes instead
//! of calling `std::fs` directly.
//!
//! The reference implementation lets callers swap the file backend via a
//! table of function pointers and stashes it (plus the active codepage) in
//! process-global state. We drop the global entirely: every [`crate::io_pool::IoPool`]
//! is parameterized by an explicit provider instance, so two pools in the
//! same process can use different backends and nothing here is a singleton.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{EwfError, IoOp, Result};

bitflags::bitflags! {
    /// Mirrors the access flags in the on-disk/API contract (`READ = 1`,
    /// `WRITE = 2`, `RESUME = 16`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        const RESUME = 0b0001_0000;
    }
}

/// A single open file as seen by the provider. Deliberately shaped like
/// `Read + Write + Seek` rather than a positioned `pread`/`pwrite` pair so
/// that [`crate::io_pool::IoPool`] can elide redundant seeks itself, the
/// way the source's file layer tracks a cached offset per handle.
pub trait ProviderFile: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;
    fn size(&mut self) -> io::Result<u64>;
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

/// Capability interface for opening/checking files. Analogous to the
/// source's `{open, open_wide, close, read, write, seek, size, exists}`
/// function-pointer table, minus `close` (dropping the `ProviderFile`
/// closes it) and minus the wide/narrow split (paths are UTF-8 only; a
/// provider is free to convert at its own boundary).
pub trait BlockIoProvider: Send + Sync {
    fn open(&self, path: &Path, flags: AccessFlags) -> Result<Box<dyn ProviderFile>>;
    fn exists(&self, path: &Path) -> bool;
}

/// Default provider: a thin wrapper over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFsProvider;

impl BlockIoProvider for StdFsProvider {
    fn open(&self, path: &Path, flags: AccessFlags) -> Result<Box<dyn ProviderFile>> {
        let mut options = OpenOptions::new();
        options.read(true);
        if flags.contains(AccessFlags::WRITE) {
            options.write(true);
            options.create(true);
        }
        let file = options
            .open(path)
            .map_err(|e| EwfError::io(IoOp::Open, path, e))?;
        Ok(Box::new(StdProviderFile { file }))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

struct StdProviderFile {
    file: File,
}

impl ProviderFile for StdProviderFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn size(&mut self) -> io::Result<u64> {
        self.file.metadata().map(|m| m.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

/// A path plus the flags it was opened with — what the Segment File Set
/// hands the Block I/O Pool for each discovered segment.
#[derive(Debug, Clone)]
pub struct SegmentPath {
    pub path: PathBuf,
    pub flags: AccessFlags,
}
