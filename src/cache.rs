//! C7 — Chunk Cache.
//!
//! A small LRU of decoded chunks that guarantees at most one concurrent
//! decode per key: a miss claims the key as "pending" under the lock,
//! releases the lock while it decodes, then republishes the result and
//! wakes any other caller that was waiting on the same key. The existing
//! `ChunkCache` (`ewf.rs`) holds exactly one entry and has no concurrency
//! story at all (`&mut self` throughout) — this generalizes it to
//! §4.5/§5's contract: entries are immutable once cached, and a `Write`
//! invalidates the entry for that index.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

struct Inner {
    entries: HashMap<usize, Arc<Vec<u8>>>,
    lru: VecDeque<usize>,
    pending: HashSet<usize>,
}

pub struct ChunkCache {
    capacity: usize,
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        ChunkCache {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru: VecDeque::new(),
                pending: HashSet::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Fetch chunk `key`, decoding via `decode` on a true miss. Concurrent
    /// callers for the same missing key block on the gate and all
    /// receive the winner's result (or its error) without redundant
    /// decode work.
    pub fn get_or_decode<F>(&self, key: usize, decode: F) -> Result<Arc<Vec<u8>>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.entries.get(&key) {
                let value = value.clone();
                Self::touch(&mut inner, key);
                return Ok(value);
            }
            if inner.pending.contains(&key) {
                self.condvar.wait(&mut inner);
                continue;
            }
            inner.pending.insert(key);
            break;
        }
        drop(inner);

        let result = decode();

        let mut inner = self.inner.lock();
        inner.pending.remove(&key);
        match result {
            Ok(data) => {
                let arc = Arc::new(data);
                Self::insert(&mut inner, self.capacity, key, arc.clone());
                self.condvar.notify_all();
                Ok(arc)
            }
            Err(e) => {
                self.condvar.notify_all();
                Err(e)
            }
        }
    }

    /// Write invalidates the cached entry for `key` (§4.5).
    pub fn invalidate(&self, key: usize) {
        let mut inner = self.inner.lock();
        inner.entries.remove(&key);
        inner.lru.retain(|&k| k != key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch(inner: &mut Inner, key: usize) {
        inner.lru.retain(|&k| k != key);
        inner.lru.push_back(key);
    }

    fn insert(inner: &mut Inner, capacity: usize, key: usize, value: Arc<Vec<u8>>) {
        if inner.entries.contains_key(&key) {
            inner.lru.retain(|&k| k != key);
        } else if inner.entries.len() >= capacity {
            if let Some(evict) = inner.lru.pop_front() {
                inner.entries.remove(&evict);
            }
        }
        inner.entries.insert(key, value);
        inner.lru.push_back(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn caches_and_evicts_lru() {
        let cache = ChunkCache::new(2);
        for i in 0..3 {
            cache
                .get_or_decode(i, || Ok(vec![i as u8]))
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn invalidate_forces_redecode() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ChunkCache::new(8);
        let decode = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        };
        cache.get_or_decode(0, decode).unwrap();
        cache.invalidate(0);
        cache.get_or_decode(0, decode).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_misses_on_same_key_decode_once() {
        let cache = Arc::new(ChunkCache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_decode(42, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(20));
                            Ok(vec![9, 9, 9])
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results {
            assert_eq!(**r, vec![9, 9, 9]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
