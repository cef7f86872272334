//! Two-tier local chunk store.
//!
//! Composes the in-memory cache over the durable store with read-through
//! promotion and write-through, asynchronously durable puts:
//!
//! ```text
//! put ──► MemStore (synchronous) ──► writer thread ──► DbStore
//! get ──► MemStore ──miss──► DbStore ──hit──► promote into MemStore
//! ```
//!
//! A put never blocks on durability. The chunk's stored signal fires once
//! the durable write completes, success or failure; write errors are
//! logged here and observed by callers on a later get. Pending
//! placeholders live only in the memory tier.
//!
//! Lock order is MemStore before DbStore, never the reverse.

use crate::{ChunkStore, DbStore, MemStore, StoreConfig, StoreError};
use bytes::Bytes;
use chunkmesh_types::{logical_size, Chunk, Hasher, Key, Signal};
use crossbeam::channel::{unbounded, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{error, trace};

struct WriteJob {
    chunk: Arc<Chunk>,
    stored: Arc<Signal>,
}

/// Memory cache over a durable store.
pub struct LocalStore {
    hasher: Hasher,
    mem: MemStore,
    db: Arc<DbStore>,
    writer_tx: Mutex<Option<Sender<WriteJob>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl LocalStore {
    /// Open the store described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Arc<Self>, StoreError> {
        let db = Arc::new(DbStore::open(&config.db_store_path, config.db_capacity)?);
        let (writer_tx, writer_rx) = unbounded::<WriteJob>();

        let writer_db = db.clone();
        let writer = std::thread::Builder::new()
            .name("chunk-writer".into())
            .spawn(move || {
                for job in writer_rx {
                    Self::commit(&writer_db, &job);
                }
            })
            .map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Arc::new(Self {
            hasher: Hasher::new(config.hash),
            mem: MemStore::new(config.mem_capacity),
            db,
            writer_tx: Mutex::new(Some(writer_tx)),
            writer: Mutex::new(Some(writer)),
        }))
    }

    /// Store a chunk: memory synchronously, disk in the background.
    ///
    /// Computes the key when the caller omitted it. Pending placeholders
    /// stay in the memory tier and are not forwarded to disk. If the
    /// caller attached a completion counter, it is incremented here and
    /// decremented by the writer after the durable write completes.
    pub fn put(&self, chunk: &Arc<Chunk>) {
        chunk.ensure_key(&self.hasher);
        let stored = chunk.arm_stored();
        self.mem.put(chunk.clone());

        if chunk.is_pending() {
            return;
        }
        if let Some(completion) = chunk.completion() {
            completion.add(1);
        }

        let job = WriteJob {
            chunk: chunk.clone(),
            stored,
        };
        let undelivered = {
            let tx = self.writer_tx.lock().expect("writer sender lock poisoned");
            match tx.as_ref() {
                Some(tx) => tx.send(job).err().map(|e| e.0),
                None => Some(job),
            }
        };
        // Store already closing: commit inline so the signal and counter
        // contracts still hold.
        if let Some(job) = undelivered {
            Self::commit(&self.db, &job);
        }
    }

    /// Look up a chunk, reading through to disk and promoting hits.
    ///
    /// A memory hit is returned as-is, pending placeholders included; the
    /// network-facing store is the layer that interprets pending chunks.
    pub fn get(&self, key: &Key) -> Result<Arc<Chunk>, StoreError> {
        if let Some(chunk) = self.mem.get(key) {
            return Ok(chunk);
        }
        let chunk = self.db.get(key)?;
        if let Some(data) = chunk.data() {
            chunk.set_size(logical_size(&data));
        }
        self.mem.put(chunk.clone());
        trace!(?key, "promoted chunk from db");
        Ok(chunk)
    }

    /// Look up a chunk or install a pending placeholder for it.
    ///
    /// The boolean reports whether this call created the placeholder —
    /// the at-most-one-concurrent-fetch-per-key decision point.
    pub fn get_or_create_request(&self, key: &Key) -> Result<(Arc<Chunk>, bool), StoreError> {
        match self.get(key) {
            Ok(chunk) => Ok((chunk, false)),
            Err(StoreError::NotFound) => {
                Ok(self.mem.get_or_insert_with(key, || Chunk::pending(*key)))
            }
            Err(e) => Err(e),
        }
    }

    /// Fulfill a delivery: adopt the pending placeholder for `key` if one
    /// exists (write its data, wake its waiters), then store normally.
    /// Returns the chunk instance that was stored.
    pub fn deliver(&self, key: Key, data: Bytes) -> Arc<Chunk> {
        if let Some(existing) = self.mem.get(&key) {
            if existing.is_pending() {
                existing.set_data(data);
                self.put(&existing);
                return existing;
            }
        }
        let chunk = Chunk::resident(key, data);
        self.put(&chunk);
        chunk
    }

    /// The memory tier.
    pub fn mem(&self) -> &MemStore {
        &self.mem
    }

    /// The durable tier.
    pub fn db(&self) -> &Arc<DbStore> {
        &self.db
    }

    /// The key hasher.
    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    /// Drain the background writer and flush the durable tier.
    pub fn close(&self) {
        let tx = self.writer_tx.lock().expect("writer sender lock poisoned").take();
        drop(tx);
        if let Some(writer) = self.writer.lock().expect("writer handle lock poisoned").take() {
            let _ = writer.join();
        }
        self.db.close();
    }

    fn commit(db: &DbStore, job: &WriteJob) {
        if let Err(e) = db.put(&job.chunk) {
            job.chunk.mark_store_failed();
            error!(key = ?job.chunk.key(), error = %e, "durable chunk write failed");
        }
        job.stored.fire();
        if let Some(completion) = job.chunk.completion() {
            completion.done();
        }
    }
}

impl ChunkStore for LocalStore {
    fn put(&self, chunk: &Arc<Chunk>) -> Result<(), StoreError> {
        LocalStore::put(self, chunk);
        Ok(())
    }

    fn get(&self, key: &Key) -> Result<Arc<Chunk>, StoreError> {
        LocalStore::get(self, key)
    }
}
