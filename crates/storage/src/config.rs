//! Store configuration.

use chunkmesh_types::HashAlgo;
use std::path::{Path, PathBuf};

/// Default maximum number of chunks on disk before eviction.
pub const DEFAULT_DB_CAPACITY: u64 = 5_000_000;

/// Default maximum number of chunks held in memory.
pub const DEFAULT_MEM_CAPACITY: usize = 500;

/// Configuration for a node's local chunk store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Filesystem directory for the durable chunk database.
    pub db_store_path: PathBuf,
    /// Max chunk count on disk before eviction. Zero means unbounded.
    pub db_capacity: u64,
    /// Max chunk count in memory. Zero means unbounded.
    pub mem_capacity: usize,
    /// Hash algorithm for key derivation.
    pub hash: HashAlgo,
}

impl StoreConfig {
    /// Defaults rooted at `<datadir>/chunks`.
    pub fn new(datadir: &Path) -> Self {
        Self {
            db_store_path: datadir.join("chunks"),
            db_capacity: DEFAULT_DB_CAPACITY,
            mem_capacity: DEFAULT_MEM_CAPACITY,
            hash: HashAlgo::default(),
        }
    }

    /// Override the on-disk capacity.
    pub fn with_db_capacity(mut self, capacity: u64) -> Self {
        self.db_capacity = capacity;
        self
    }

    /// Override the in-memory capacity.
    pub fn with_mem_capacity(mut self, capacity: usize) -> Self {
        self.mem_capacity = capacity;
        self
    }

    /// Override the hash algorithm.
    pub fn with_hash(mut self, hash: HashAlgo) -> Self {
        self.hash = hash;
        self
    }
}
