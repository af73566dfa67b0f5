//! C1 — Block I/O Pool.
//!
//! A bounded set of open segment-file handles. Grounded on
//! `libcfile_file.c`'s `current_offset` tracking (`original_source/`):
//! that function skips the real `lseek` when the kernel-side offset
//! already matches the requested one, which is exactly what
//! [`IoPool::read`]/[`IoPool::write`] do here before delegating to the
//! provider. Eviction is strict LRU among idle entries — an entry with a
//! read/write in flight is pinned and never evicted, matching the
//! `FileIoPool` idiom (see `other_examples` AD1-tools handle.rs)
//! generalized with proper locking instead of a single global `Vec<File>`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{EwfError, IoOp, Result};
use crate::provider::{AccessFlags, BlockIoProvider, ProviderFile, SegmentPath};

/// Opaque handle into the pool. Chunk descriptors and segment readers
/// store this, never a file handle directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolEntry(pub usize);

struct Slot {
    path: PathBuf,
    flags: AccessFlags,
    file: Option<Box<dyn ProviderFile>>,
    last_offset: Option<u64>,
    in_flight: bool,
}

struct Inner {
    provider: Arc<dyn BlockIoProvider>,
    slots: Vec<Slot>,
    capacity: usize,
    /// LRU among *open* idle slots, most-recently-used at the back.
    lru: VecDeque<usize>,
}

/// The Block I/O Pool (C1). Cloning shares the same underlying slots —
/// clone to hand a second reference to, e.g., a cache worker.
#[derive(Clone)]
pub struct IoPool {
    inner: Arc<Mutex<Inner>>,
}

impl IoPool {
    /// `capacity` bounds how many *open* file descriptors the pool keeps
    /// resident; segments beyond that are opened on demand and the LRU
    /// idle entry is closed first.
    pub fn new(provider: Arc<dyn BlockIoProvider>, segments: Vec<SegmentPath>, capacity: usize) -> Self {
        let slots = segments
            .into_iter()
            .map(|s| Slot {
                path: s.path,
                flags: s.flags,
                file: None,
                last_offset: None,
                in_flight: false,
            })
            .collect();

        IoPool {
            inner: Arc::new(Mutex::new(Inner {
                provider,
                slots,
                capacity: capacity.max(1),
                lru: VecDeque::new(),
            })),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn path_of(&self, entry: PoolEntry) -> PathBuf {
        self.inner.lock().slots[entry.0].path.clone()
    }

    /// Append a newly-created segment (used when rolling to the next
    /// segment on write) and return its entry.
    pub fn push(&self, segment: SegmentPath) -> PoolEntry {
        let mut inner = self.inner.lock();
        inner.slots.push(Slot {
            path: segment.path,
            flags: segment.flags,
            file: None,
            last_offset: None,
            in_flight: false,
        });
        PoolEntry(inner.slots.len() - 1)
    }

    fn ensure_open(inner: &mut Inner, entry: PoolEntry) -> Result<()> {
        if inner.slots[entry.0].file.is_some() {
            // Touch LRU.
            inner.lru.retain(|&e| e != entry.0);
            inner.lru.push_back(entry.0);
            return Ok(());
        }

        // Evict LRU idle entries until we're under capacity.
        let open_count = inner.slots.iter().filter(|s| s.file.is_some()).count();
        if open_count >= inner.capacity {
            let mut i = 0;
            while i < inner.lru.len() {
                let candidate = inner.lru[i];
                if !inner.slots[candidate].in_flight && inner.slots[candidate].file.is_some() {
                    inner.slots[candidate].file = None;
                    inner.slots[candidate].last_offset = None;
                    inner.lru.remove(i);
                    break;
                }
                i += 1;
            }
        }

        let slot = &mut inner.slots[entry.0];
        let file = inner.provider.open(&slot.path, slot.flags)?;
        slot.file = Some(file);
        slot.last_offset = None;
        inner.lru.push_back(entry.0);
        Ok(())
    }

    /// Positioned read. Seeks only if the cached offset doesn't already
    /// match `offset`.
    pub fn read(&self, entry: PoolEntry, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&mut inner, entry)?;
        inner.slots[entry.0].in_flight = true;
        let path = inner.slots[entry.0].path.clone();

        let result = (|| -> Result<usize> {
            let slot = &mut inner.slots[entry.0];
            let file = slot.file.as_mut().unwrap();
            if slot.last_offset != Some(offset) {
                file.seek(std::io::SeekFrom::Start(offset))
                    .map_err(|e| EwfError::io(IoOp::Seek, &path, e))?;
            }
            let n = file
                .read(buf)
                .map_err(|e| EwfError::io(IoOp::Read, &path, e))?;
            slot.last_offset = Some(offset + n as u64);
            Ok(n)
        })();

        inner.slots[entry.0].in_flight = false;
        result
    }

    pub fn read_exact(&self, entry: PoolEntry, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut total = 0usize;
        while total < buf.len() {
            let n = self.read(entry, offset + total as u64, &mut buf[total..])?;
            if n == 0 {
                let path = self.path_of(entry);
                return Err(EwfError::Truncated {
                    path,
                    offset: offset + total as u64,
                });
            }
            total += n;
        }
        Ok(())
    }

    /// Positioned write, same seek-elision discipline as `read`.
    pub fn write(&self, entry: PoolEntry, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&mut inner, entry)?;
        inner.slots[entry.0].in_flight = true;
        let path = inner.slots[entry.0].path.clone();

        let result = (|| -> Result<usize> {
            let slot = &mut inner.slots[entry.0];
            let file = slot.file.as_mut().unwrap();
            if slot.last_offset != Some(offset) {
                file.seek(std::io::SeekFrom::Start(offset))
                    .map_err(|e| EwfError::io(IoOp::Seek, &path, e))?;
            }
            let n = file
                .write(buf)
                .map_err(|e| EwfError::io(IoOp::Write, &path, e))?;
            slot.last_offset = Some(offset + n as u64);
            Ok(n)
        })();

        inner.slots[entry.0].in_flight = false;
        result
    }

    pub fn write_all(&self, entry: PoolEntry, offset: u64, buf: &[u8]) -> Result<()> {
        let mut total = 0usize;
        while total < buf.len() {
            let n = self.write(entry, offset + total as u64, &buf[total..])?;
            if n == 0 {
                return Err(EwfError::Internal(
                    "provider write returned 0 bytes".into(),
                ));
            }
            total += n;
        }
        Ok(())
    }

    pub fn truncate(&self, entry: PoolEntry, len: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&mut inner, entry)?;
        let path = inner.slots[entry.0].path.clone();
        let slot = &mut inner.slots[entry.0];
        let file = slot.file.as_mut().unwrap();
        file.set_len(len)
            .map_err(|e| EwfError::io(IoOp::Write, &path, e))?;
        slot.last_offset = None;
        Ok(())
    }

    pub fn size(&self, entry: PoolEntry) -> Result<u64> {
        let mut inner = self.inner.lock();
        Self::ensure_open(&mut inner, entry)?;
        let path = inner.slots[entry.0].path.clone();
        let slot = &mut inner.slots[entry.0];
        let file = slot.file.as_mut().unwrap();
        file.size().map_err(|e| EwfError::io(IoOp::Size, &path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StdFsProvider;
    use std::io::Write as _;

    fn tempfile_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ewf_chunked_test_{}_{}", std::process::id(), name));
        p
    }

    #[test]
    fn read_write_round_trip_across_eviction() {
        let provider: Arc<dyn BlockIoProvider> = Arc::new(StdFsProvider);
        let mut paths = Vec::new();
        for i in 0..4 {
            let p = tempfile_path(&format!("pool{}", i));
            std::fs::File::create(&p).unwrap().write_all(&[0u8; 16]).unwrap();
            paths.push(SegmentPath {
                path: p,
                flags: AccessFlags::READ | AccessFlags::WRITE,
            });
        }
        let pool = IoPool::new(provider, paths.clone(), 2);

        for (i, _) in paths.iter().enumerate() {
            pool.write_all(PoolEntry(i), 0, &[i as u8; 16]).unwrap();
        }
        for (i, _) in paths.iter().enumerate() {
            let mut buf = [0u8; 16];
            pool.read_exact(PoolEntry(i), 0, &mut buf).unwrap();
            assert_eq!(buf, [i as u8; 16]);
        }

        for p in &paths {
            let _ = std::fs::remove_file(&p.path);
        }
    }

    #[test]
    fn positioned_read_elides_redundant_seek() {
        let provider: Arc<dyn BlockIoProvider> = Arc::new(StdFsProvider);
        let p = tempfile_path("seek_elision");
        std::fs::write(&p, b"0123456789").unwrap();
        let pool = IoPool::new(
            provider,
            vec![SegmentPath {
                path: p.clone(),
                flags: AccessFlags::READ,
            }],
            1,
        );

        let mut buf = [0u8; 4];
        pool.read_exact(PoolEntry(0), 0, &mut buf).unwrap();
        assert_eq!(&buf, b"0123");
        // Sequential read continuing from cached offset.
        pool.read_exact(PoolEntry(0), 4, &mut buf).unwrap();
        assert_eq!(&buf, b"4567");

        let _ = std::fs::remove_file(&p);
    }
}
