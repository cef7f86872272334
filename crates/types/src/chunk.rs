//! The chunk value object and its pipeline state.
//!
//! A chunk is a content-addressed unit of storage: a key, a logical size,
//! and the raw bytes (`sdata`). The first 8 bytes of the raw bytes encode
//! the logical size little-endian for chunker-produced chunks.
//!
//! Beyond the value triple, a chunk carries transient state used while it
//! moves through the store pipeline:
//!
//! - a one-shot durability signal that fires exactly once when the durable
//!   write completes (success or failure);
//! - an optional pending-fetch signal, present iff the chunk was created
//!   as a placeholder for a request not yet satisfied;
//! - an optional external completion counter, decremented by the store
//!   once it has finished its duty for the chunk.
//!
//! A chunk is in exactly one of three states, and transitions only
//! forward: *pending* (no data, fetch signal armed) → *resident* (data
//! set, durability unfired) → *durable* (durability fired).

use crate::{Completion, Hasher, Key, Signal};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// Length of the little-endian logical-size prefix on chunk bytes.
pub const SIZE_PREFIX_BYTES: usize = 8;

/// Parse the logical size from the first 8 bytes of chunk data.
///
/// Data shorter than the prefix reports its own length; such chunks never
/// come out of the chunker but the store does not reject them.
pub fn logical_size(data: &[u8]) -> u64 {
    if data.len() >= SIZE_PREFIX_BYTES {
        u64::from_le_bytes(data[..SIZE_PREFIX_BYTES].try_into().expect("8-byte slice"))
    } else {
        data.len() as u64
    }
}

/// A content-addressed chunk.
pub struct Chunk {
    key: OnceLock<Key>,
    size: AtomicU64,
    data: RwLock<Option<Bytes>>,
    stored: Mutex<Arc<Signal>>,
    store_failed: AtomicBool,
    fetch: Option<Arc<Signal>>,
    completion: Mutex<Option<Arc<Completion>>>,
}

impl Chunk {
    /// Create a resident chunk. A zero `key` is treated as omitted; the
    /// store computes it on put.
    pub fn resident(key: Key, data: Bytes) -> Arc<Self> {
        let chunk = Self::bare(None);
        if !key.is_zero() {
            let _ = chunk.key.set(key);
        }
        chunk.size.store(logical_size(&data), Ordering::Relaxed);
        *chunk.data.write().expect("chunk data lock poisoned") = Some(data);
        Arc::new(chunk)
    }

    /// Create a resident chunk with the key left for the store to compute.
    pub fn unkeyed(data: Bytes) -> Arc<Self> {
        Self::resident(Key::ZERO, data)
    }

    /// Create a pending placeholder for an inbound request.
    pub fn pending(key: Key) -> Arc<Self> {
        let chunk = Self::bare(Some(Arc::new(Signal::new())));
        let _ = chunk.key.set(key);
        Arc::new(chunk)
    }

    fn bare(fetch: Option<Arc<Signal>>) -> Self {
        Self {
            key: OnceLock::new(),
            size: AtomicU64::new(0),
            data: RwLock::new(None),
            stored: Mutex::new(Arc::new(Signal::new())),
            store_failed: AtomicBool::new(false),
            fetch,
            completion: Mutex::new(None),
        }
    }

    /// The chunk's key, or [`Key::ZERO`] if not yet assigned.
    pub fn key(&self) -> Key {
        self.key.get().copied().unwrap_or(Key::ZERO)
    }

    /// Fill in the key from the data if the caller omitted it.
    /// Returns the (now definite) key.
    pub fn ensure_key(&self, hasher: &Hasher) -> Key {
        if let Some(key) = self.key.get() {
            return *key;
        }
        if let Some(data) = self.data() {
            let _ = self.key.set(hasher.hash(&data));
        }
        self.key()
    }

    /// The raw chunk bytes, if resident.
    pub fn data(&self) -> Option<Bytes> {
        self.data.read().expect("chunk data lock poisoned").clone()
    }

    /// Whether this chunk is still a pending placeholder (no data).
    pub fn is_pending(&self) -> bool {
        self.data.read().expect("chunk data lock poisoned").is_none()
    }

    /// Fulfill the chunk with delivered bytes, waking fetch waiters.
    ///
    /// The pending → resident transition. The logical size is parsed from
    /// the size prefix.
    pub fn set_data(&self, data: Bytes) {
        self.size.store(logical_size(&data), Ordering::Relaxed);
        *self.data.write().expect("chunk data lock poisoned") = Some(data);
        if let Some(fetch) = &self.fetch {
            fetch.fire();
        }
    }

    /// The logical payload size.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Override the logical payload size (read-through promotion parses it
    /// from the size prefix).
    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Relaxed);
    }

    /// The pending-fetch signal, present iff the chunk was created as a
    /// placeholder.
    pub fn fetch_signal(&self) -> Option<&Arc<Signal>> {
        self.fetch.as_ref()
    }

    /// Wake fetch waiters without supplying data. They observe the chunk
    /// still pending and report the miss.
    pub fn abandon_fetch(&self) {
        if let Some(fetch) = &self.fetch {
            fetch.fire();
        }
    }

    /// Install a fresh durability signal and return it.
    ///
    /// Called by the store at the start of every put so re-puts get their
    /// own signal; the background writer fires the instance it was handed.
    pub fn arm_stored(&self) -> Arc<Signal> {
        let fresh = Arc::new(Signal::new());
        *self.stored.lock().expect("chunk stored lock poisoned") = fresh.clone();
        self.store_failed.store(false, Ordering::Release);
        fresh
    }

    /// Snapshot of the current durability signal.
    pub fn stored_signal(&self) -> Arc<Signal> {
        self.stored.lock().expect("chunk stored lock poisoned").clone()
    }

    /// Block until the durable write for the most recent put completes.
    ///
    /// Errors do not surface here; a failed write still fires the signal
    /// and is observed on the next get.
    pub fn wait_stored(&self) {
        self.stored_signal().wait();
    }

    /// Record that the durable write failed.
    pub fn mark_store_failed(&self) {
        self.store_failed.store(true, Ordering::Release);
    }

    /// Whether the most recent durable write failed.
    pub fn store_failed(&self) -> bool {
        self.store_failed.load(Ordering::Acquire)
    }

    /// Attach an external completion counter. The store increments it when
    /// it takes on a durable write for this chunk and decrements it after
    /// the write has completed and the durability signal has fired.
    pub fn set_completion(&self, completion: Arc<Completion>) {
        *self.completion.lock().expect("chunk completion lock poisoned") = Some(completion);
    }

    /// The attached completion counter, if any.
    pub fn completion(&self) -> Option<Arc<Completion>> {
        self.completion
            .lock()
            .expect("chunk completion lock poisoned")
            .clone()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("key", &self.key())
            .field("size", &self.size())
            .field("pending", &self.is_pending())
            .finish()
    }
}
