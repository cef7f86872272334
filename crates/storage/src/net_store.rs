//! Network-backed chunk store.
//!
//! Wraps the local store with a peer-fetch fallback. A miss installs a
//! pending placeholder into the memory tier and invokes the fetch closure
//! supplied by the delivery dispatcher; the caller then blocks on the
//! placeholder until the chunk arrives, the deadline passes, or the
//! caller cancels.
//!
//! At most one concurrent fetch per key: the placeholder is installed
//! under the memory-tier lock, so only the first misser triggers the
//! fetch. Late missers attach to the same placeholder. Cancellation
//! detaches the waiter only — an in-flight request is left to complete
//! so other waiters (and the store itself) still benefit.

use crate::{ChunkStore, LocalStore, StoreError};
use chunkmesh_types::{CancelToken, Chunk, Key, WaitOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Fetch trigger provided by the delivery dispatcher.
pub type FetchFn = Box<dyn Fn(&Key) -> Result<(), StoreError> + Send + Sync>;

/// Default deadline for a network get.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Local store with remote fetch fallback.
pub struct NetStore {
    local: Arc<LocalStore>,
    fetch_fn: FetchFn,
    timeout: Duration,
}

impl NetStore {
    /// Wrap `local`, fetching misses through `fetch_fn`.
    pub fn new(local: Arc<LocalStore>, fetch_fn: FetchFn, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            local,
            fetch_fn,
            timeout,
        })
    }

    /// Get with the default deadline.
    pub fn get(&self, key: &Key) -> Result<Arc<Chunk>, StoreError> {
        self.get_with(key, self.timeout, None)
    }

    /// Get with an explicit deadline and optional cancellation.
    pub fn get_with(
        &self,
        key: &Key,
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<Arc<Chunk>, StoreError> {
        let (chunk, created) = self.local.get_or_create_request(key)?;
        if !chunk.is_pending() {
            return Ok(chunk);
        }

        if created {
            trace!(?key, "requesting chunk from peers");
            if let Err(e) = (self.fetch_fn)(key) {
                self.local.mem().remove_if_pending(key);
                return Err(e);
            }
        }

        let fetch = chunk
            .fetch_signal()
            .expect("pending chunk must carry a fetch signal");
        match fetch.wait_cancellable(timeout, cancel) {
            WaitOutcome::Fired => {
                if chunk.is_pending() {
                    // Woken by an abandoned fetch: every candidate was
                    // tried and none had the chunk.
                    debug!(?key, "chunk not found after peer search");
                    Err(StoreError::NotFound)
                } else {
                    Ok(chunk)
                }
            }
            WaitOutcome::TimedOut => Err(StoreError::Timeout),
            WaitOutcome::Cancelled => Err(StoreError::Cancelled),
        }
    }

    /// Store a chunk, fulfilling any pending placeholder for its key.
    ///
    /// When a placeholder exists its identity is adopted: the delivered
    /// bytes land on the placeholder instance and its waiters wake. The
    /// normal local put then runs on that instance.
    pub fn put(&self, chunk: &Arc<Chunk>) -> Result<(), StoreError> {
        match chunk.data() {
            Some(data) => {
                let key = if chunk.key().is_zero() {
                    self.local.hasher().hash(&data)
                } else {
                    chunk.key()
                };
                self.local.deliver(key, data);
                Ok(())
            }
            None => Err(StoreError::InvalidChunk("cannot put a chunk without data".into())),
        }
    }

    /// The wrapped local store.
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }
}

impl ChunkStore for NetStore {
    fn put(&self, chunk: &Arc<Chunk>) -> Result<(), StoreError> {
        NetStore::put(self, chunk)
    }

    fn get(&self, key: &Key) -> Result<Arc<Chunk>, StoreError> {
        NetStore::get(self, key)
    }
}
