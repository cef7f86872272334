//! Chunk storage for chunkmesh nodes.
//!
//! The store is layered:
//!
//! ```text
//! NetStore ──miss──► Delivery dispatcher (peer fetch)
//!    │
//! LocalStore
//!    ├── MemStore   bounded cache, pending placeholders live here
//!    └── DbStore    RocksDB, capacity-bounded, asynchronously written
//! ```
//!
//! [`TreeChunker`] sits on top of any [`ChunkStore`] and turns payloads
//! into chunk trees and back.

mod chunker;
mod config;
mod db_store;
mod error;
mod local_store;
mod mem_store;
mod net_store;

pub use chunker::{TreeChunker, DEFAULT_BRANCHES, DEFAULT_CHUNK_SIZE};
pub use config::{StoreConfig, DEFAULT_DB_CAPACITY, DEFAULT_MEM_CAPACITY};
pub use db_store::DbStore;
pub use error::StoreError;
pub use local_store::LocalStore;
pub use mem_store::MemStore;
pub use net_store::{FetchFn, NetStore, DEFAULT_SEARCH_TIMEOUT};

use chunkmesh_types::{Chunk, Key};
use std::sync::Arc;

/// Anything chunks can be written to and read from.
pub trait ChunkStore: Send + Sync {
    /// Store a chunk.
    fn put(&self, chunk: &Arc<Chunk>) -> Result<(), StoreError>;

    /// Look up a chunk by key.
    fn get(&self, key: &Key) -> Result<Arc<Chunk>, StoreError>;
}
