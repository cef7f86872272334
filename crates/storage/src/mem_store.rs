//! Bounded in-memory chunk cache.
//!
//! Approximate LRU: every entry carries the access tick at which it was
//! last touched, and eviction removes the entry with the lowest tick.
//! Pending placeholders are never evicted — evicting one would strand the
//! waiters blocked on its fetch signal — so eviction skips to the next
//! candidate, temporarily exceeding capacity if every entry is pending.

use chunkmesh_types::{Chunk, Key};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::trace;

struct Entry {
    chunk: Arc<Chunk>,
    access: u64,
}

struct Inner {
    entries: HashMap<Key, Entry>,
    tick: u64,
}

/// In-memory chunk cache bounded by entry count.
pub struct MemStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemStore {
    /// Create a cache holding at most `capacity` chunks. Zero means
    /// unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Insert or overwrite, evicting one stale entry when over capacity.
    pub fn put(&self, chunk: Arc<Chunk>) {
        let key = chunk.key();
        let mut inner = self.inner.lock().expect("mem store lock poisoned");
        inner.tick += 1;
        let access = inner.tick;
        inner.entries.insert(key, Entry { chunk, access });

        if self.capacity > 0 && inner.entries.len() > self.capacity {
            self.evict_one(&mut inner, &key);
        }
    }

    /// Look up a live chunk reference, bumping its recency.
    pub fn get(&self, key: &Key) -> Option<Arc<Chunk>> {
        let mut inner = self.inner.lock().expect("mem store lock poisoned");
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(key)?;
        entry.access = tick;
        Some(entry.chunk.clone())
    }

    /// Return the chunk under `key`, inserting `make()` if absent.
    ///
    /// The boolean reports whether this call inserted. The decision is
    /// made under the store lock, which is what makes "only the first
    /// misser installs the placeholder" hold for concurrent callers.
    pub fn get_or_insert_with(
        &self,
        key: &Key,
        make: impl FnOnce() -> Arc<Chunk>,
    ) -> (Arc<Chunk>, bool) {
        let mut inner = self.inner.lock().expect("mem store lock poisoned");
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.access = tick;
            return (entry.chunk.clone(), false);
        }
        let chunk = make();
        inner.entries.insert(
            *key,
            Entry {
                chunk: chunk.clone(),
                access: tick,
            },
        );
        if self.capacity > 0 && inner.entries.len() > self.capacity {
            self.evict_one(&mut inner, key);
        }
        (chunk, true)
    }

    /// Drop the entry under `key` if it is still a pending placeholder.
    /// Used when a fetch is abandoned so a later get starts fresh.
    pub fn remove_if_pending(&self, key: &Key) -> Option<Arc<Chunk>> {
        let mut inner = self.inner.lock().expect("mem store lock poisoned");
        if inner.entries.get(key)?.chunk.is_pending() {
            return inner.entries.remove(key).map(|e| e.chunk);
        }
        None
    }

    /// Number of cached chunks (pending placeholders included).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("mem store lock poisoned").entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict the least-recently-used non-pending entry, sparing `keep`.
    fn evict_one(&self, inner: &mut Inner, keep: &Key) {
        let victim = inner
            .entries
            .iter()
            .filter(|(key, entry)| *key != keep && !entry.chunk.is_pending())
            .min_by_key(|(_, entry)| entry.access)
            .map(|(key, _)| *key);
        match victim {
            Some(key) => {
                inner.entries.remove(&key);
                trace!(?key, "evicted chunk from memory");
            }
            None => {
                // Everything else is pending; let the cache run over
                // capacity rather than strand a waiter.
                trace!(len = inner.entries.len(), "no evictable entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn key(byte: u8) -> Key {
        Key::from_hash_bytes(&[byte; 32])
    }

    fn resident(byte: u8) -> Arc<Chunk> {
        Chunk::resident(key(byte), Bytes::from(vec![byte; 16]))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = MemStore::new(10);
        let chunk = resident(1);
        store.put(chunk.clone());
        let got = store.get(&key(1)).unwrap();
        assert!(Arc::ptr_eq(&chunk, &got));
        assert!(store.get(&key(2)).is_none());
    }

    #[test]
    fn test_capacity_zero_is_unbounded() {
        let store = MemStore::new(0);
        for byte in 0..100 {
            store.put(resident(byte));
        }
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let store = MemStore::new(2);
        store.put(resident(1));
        store.put(resident(2));
        // Touch 1 so 2 is the LRU entry.
        store.get(&key(1)).unwrap();
        store.put(resident(3));
        assert_eq!(store.len(), 2);
        assert!(store.get(&key(1)).is_some());
        assert!(store.get(&key(2)).is_none());
        assert!(store.get(&key(3)).is_some());
    }

    #[test]
    fn test_pending_chunks_survive_eviction() {
        let store = MemStore::new(2);
        store.put(Chunk::pending(key(1)));
        store.put(Chunk::pending(key(2)));
        store.put(resident(3));
        // Both placeholders must survive; the cache runs over capacity
        // or sheds the resident chunk, never a pending one.
        assert!(store.get(&key(1)).is_some());
        assert!(store.get(&key(2)).is_some());
    }

    #[test]
    fn test_eviction_skips_pending_picks_resident() {
        let store = MemStore::new(2);
        store.put(Chunk::pending(key(1)));
        store.put(resident(2));
        store.put(resident(3));
        assert_eq!(store.len(), 2);
        assert!(store.get(&key(1)).is_some());
        assert!(store.get(&key(2)).is_none());
        assert!(store.get(&key(3)).is_some());
    }

    #[test]
    fn test_get_or_insert_with_inserts_once() {
        let store = MemStore::new(10);
        let (first, created) = store.get_or_insert_with(&key(5), || Chunk::pending(key(5)));
        assert!(created);
        let (second, created) = store.get_or_insert_with(&key(5), || Chunk::pending(key(5)));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_remove_if_pending() {
        let store = MemStore::new(10);
        store.put(Chunk::pending(key(1)));
        store.put(resident(2));
        assert!(store.remove_if_pending(&key(1)).is_some());
        assert!(store.remove_if_pending(&key(2)).is_none());
        assert!(store.get(&key(1)).is_none());
        assert!(store.get(&key(2)).is_some());
    }
}
