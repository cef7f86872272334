//! Durable chunk store on RocksDB.
//!
//! Two column families: `chunks` maps key → raw chunk bytes, `meta` maps
//! key → last-access tick (big-endian u64). The recency index is rebuilt
//! from `meta` at open and kept in memory; when an insert would exceed
//! the configured capacity the least-recently-accessed entry is removed.
//! Access ticks bump on both get and put.
//!
//! All operations are synchronous blocking I/O. The asynchronous-
//! durability contract (fire the chunk's stored signal after the write)
//! is the composing [`LocalStore`](crate::LocalStore)'s job, not ours.

use crate::StoreError;
use bytes::Bytes;
use chunkmesh_types::{Chunk, Key, SIZE_PREFIX_BYTES};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

const CHUNKS_CF: &str = "chunks";
const META_CF: &str = "meta";

struct DbIndex {
    access: HashMap<Key, u64>,
    tick: u64,
}

/// Capacity-bounded durable chunk store.
pub struct DbStore {
    db: DB,
    capacity: u64,
    index: Mutex<DbIndex>,
}

impl DbStore {
    /// Open or create the chunk database at `path`.
    ///
    /// `capacity` bounds the logical entry count; zero means unbounded.
    pub fn open(path: &Path, capacity: u64) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CHUNKS_CF, Options::default()),
            ColumnFamilyDescriptor::new(META_CF, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let index = Self::rebuild_index(&db)?;
        debug!(path = %path.display(), entries = index.access.len(), "opened chunk db");

        Ok(Self {
            db,
            capacity,
            index: Mutex::new(index),
        })
    }

    /// Rebuild the in-memory recency index from the `meta` column family.
    fn rebuild_index(db: &DB) -> Result<DbIndex, StoreError> {
        let meta_cf = db.cf_handle(META_CF).expect("meta column family must exist");
        let mut access = HashMap::new();
        let mut tick = 0u64;
        for item in db.iterator_cf(meta_cf, IteratorMode::Start) {
            let (key_bytes, tick_bytes) = item.map_err(|e| StoreError::Io(e.to_string()))?;
            let key = Key::try_from_slice(&key_bytes)
                .map_err(|e| StoreError::Corrupt(format!("bad meta key: {e}")))?;
            let at = u64::from_be_bytes(
                tick_bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("bad meta tick".into()))?,
            );
            tick = tick.max(at);
            access.insert(key, at);
        }
        Ok(DbIndex { access, tick })
    }

    /// Write a chunk durably.
    ///
    /// Idempotent: re-putting an existing key only refreshes its recency.
    /// When the insert would exceed capacity, the least-recently-accessed
    /// entry is evicted first.
    pub fn put(&self, chunk: &Arc<Chunk>) -> Result<(), StoreError> {
        let key = chunk.key();
        let data = chunk
            .data()
            .ok_or_else(|| StoreError::InvalidChunk("no data to persist".into()))?;

        let meta_cf = self.db.cf_handle(META_CF).expect("meta column family must exist");
        let chunks_cf = self
            .db
            .cf_handle(CHUNKS_CF)
            .expect("chunks column family must exist");

        let mut index = self.index.lock().expect("db index lock poisoned");
        index.tick += 1;
        let tick = index.tick;

        if index.access.contains_key(&key) {
            self.db
                .put_cf(meta_cf, key.as_bytes(), tick.to_be_bytes())
                .map_err(|e| StoreError::Io(e.to_string()))?;
            index.access.insert(key, tick);
            trace!(?key, "refreshed existing chunk");
            return Ok(());
        }

        let mut batch = WriteBatch::default();

        if self.capacity > 0 && index.access.len() as u64 >= self.capacity {
            if let Some(victim) = index
                .access
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(key, _)| *key)
            {
                batch.delete_cf(chunks_cf, victim.as_bytes());
                batch.delete_cf(meta_cf, victim.as_bytes());
                index.access.remove(&victim);
                trace!(key = ?victim, "evicted chunk from db");
            }
        }

        batch.put_cf(chunks_cf, key.as_bytes(), &data);
        batch.put_cf(meta_cf, key.as_bytes(), tick.to_be_bytes());
        self.db
            .write(batch)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        index.access.insert(key, tick);
        Ok(())
    }

    /// Read a chunk by key, bumping its recency.
    ///
    /// Distinguishes [`StoreError::NotFound`] from [`StoreError::Corrupt`]
    /// (stored bytes too short to carry a size prefix) and
    /// [`StoreError::Io`].
    pub fn get(&self, key: &Key) -> Result<Arc<Chunk>, StoreError> {
        let chunks_cf = self
            .db
            .cf_handle(CHUNKS_CF)
            .expect("chunks column family must exist");
        let value = self
            .db
            .get_cf(chunks_cf, key.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?
            .ok_or(StoreError::NotFound)?;

        if value.len() < SIZE_PREFIX_BYTES {
            return Err(StoreError::Corrupt(format!(
                "stored chunk is {} bytes, below the size prefix",
                value.len()
            )));
        }

        self.bump(key);
        Ok(Chunk::resident(*key, Bytes::from(value)))
    }

    /// Logical entry count.
    pub fn size(&self) -> u64 {
        self.index.lock().expect("db index lock poisoned").access.len() as u64
    }

    /// Flush memtables to disk. The database itself closes on drop.
    pub fn close(&self) {
        if let Err(e) = self.db.flush() {
            warn!(error = %e, "chunk db flush failed on close");
        }
    }

    fn bump(&self, key: &Key) {
        let meta_cf = self.db.cf_handle(META_CF).expect("meta column family must exist");
        let mut index = self.index.lock().expect("db index lock poisoned");
        if !index.access.contains_key(key) {
            return;
        }
        index.tick += 1;
        let tick = index.tick;
        // Recency metadata only; a failed bump costs eviction accuracy,
        // not data.
        if let Err(e) = self.db.put_cf(meta_cf, key.as_bytes(), tick.to_be_bytes()) {
            warn!(?key, error = %e, "failed to persist access tick");
        }
        index.access.insert(*key, tick);
    }
}
