//! Tree chunker.
//!
//! Splits a payload into a tree of content-addressed chunks and joins it
//! back from any [`ChunkStore`]. Every chunk starts with an 8-byte
//! little-endian size: for a leaf it is the payload length, for an
//! internal node the total byte count of the subtree below it. Internal
//! nodes carry up to `branches` child keys after the prefix.
//!
//! ```text
//! payload ──► leaves (≤ chunk_size bytes each)
//!         ──► internal nodes (≤ branches children each)
//!         ──► ... ──► root key
//! ```
//!
//! A payload that fits one leaf is a single chunk; its key is the root.

use crate::{ChunkStore, StoreError};
use bytes::Bytes;
use chunkmesh_types::{logical_size, Chunk, Hasher, Key, SIZE_PREFIX_BYTES};
use tracing::trace;

/// Default leaf payload size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default maximum children per internal node.
pub const DEFAULT_BRANCHES: usize = 128;

/// Splits payloads into chunk trees and reassembles them.
#[derive(Debug, Clone)]
pub struct TreeChunker {
    chunk_size: usize,
    branches: usize,
    hasher: Hasher,
}

impl TreeChunker {
    /// Chunker with the default geometry.
    pub fn new(hasher: Hasher) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            branches: DEFAULT_BRANCHES,
            hasher,
        }
    }

    /// Override the leaf size and branching factor.
    pub fn with_geometry(mut self, chunk_size: usize, branches: usize) -> Self {
        assert!(chunk_size > 0 && branches > 1, "degenerate chunker geometry");
        self.chunk_size = chunk_size;
        self.branches = branches;
        self
    }

    /// Split `payload` into chunks, store them, and return the root key.
    pub fn split(&self, payload: &[u8], store: &dyn ChunkStore) -> Result<Key, StoreError> {
        let mut level: Vec<(Key, u64)> = Vec::new();
        let leaves = if payload.is_empty() { 1 } else { payload.len().div_ceil(self.chunk_size) };
        for i in 0..leaves {
            let piece = &payload[i * self.chunk_size..payload.len().min((i + 1) * self.chunk_size)];
            let key = self.store_node(piece.len() as u64, piece, store)?;
            level.push((key, piece.len() as u64));
        }

        while level.len() > 1 {
            let mut next_level = Vec::with_capacity(level.len().div_ceil(self.branches));
            for group in level.chunks(self.branches) {
                let size: u64 = group.iter().map(|(_, size)| size).sum();
                let mut children = Vec::with_capacity(group.len() * Key::BYTES);
                for (key, _) in group {
                    children.extend_from_slice(key.as_bytes());
                }
                let key = self.store_node(size, &children, store)?;
                next_level.push((key, size));
            }
            level = next_level;
        }

        let (root, size) = level[0];
        trace!(?root, size, "split payload");
        Ok(root)
    }

    /// Reassemble the payload below `root` from `store`.
    pub fn join(&self, root: &Key, store: &dyn ChunkStore) -> Result<Vec<u8>, StoreError> {
        let chunk = store.get(root)?;
        let data = chunk
            .data()
            .ok_or_else(|| StoreError::InvalidChunk("chunk has no data".into()))?;
        let size = logical_size(&data);
        let mut out = Vec::with_capacity(size as usize);
        self.join_into(&data, size, &mut out, store)?;
        Ok(out)
    }

    fn join_into(
        &self,
        data: &Bytes,
        size: u64,
        out: &mut Vec<u8>,
        store: &dyn ChunkStore,
    ) -> Result<(), StoreError> {
        let body = &data[SIZE_PREFIX_BYTES.min(data.len())..];
        if size <= self.chunk_size as u64 {
            if body.len() as u64 != size {
                return Err(StoreError::Corrupt(format!(
                    "leaf carries {} bytes, size prefix says {size}",
                    body.len()
                )));
            }
            out.extend_from_slice(body);
            return Ok(());
        }

        if body.len() % Key::BYTES != 0 || body.is_empty() {
            return Err(StoreError::Corrupt(format!(
                "internal node body of {} bytes is not a key list",
                body.len()
            )));
        }
        let mut remaining = size;
        for key_bytes in body.chunks(Key::BYTES) {
            let key = Key::from_hash_bytes(key_bytes);
            let child = store.get(&key)?;
            let child_data = child
                .data()
                .ok_or_else(|| StoreError::InvalidChunk("chunk has no data".into()))?;
            let child_size = logical_size(&child_data).min(remaining);
            self.join_into(&child_data, child_size, out, store)?;
            remaining -= child_size;
        }
        if remaining != 0 {
            return Err(StoreError::Corrupt(format!(
                "subtree short by {remaining} bytes"
            )));
        }
        Ok(())
    }

    fn store_node(
        &self,
        size: u64,
        body: &[u8],
        store: &dyn ChunkStore,
    ) -> Result<Key, StoreError> {
        let mut bytes = Vec::with_capacity(SIZE_PREFIX_BYTES + body.len());
        bytes.extend_from_slice(&size.to_le_bytes());
        bytes.extend_from_slice(body);
        let key = self.hasher.hash(&bytes);
        store.put(&Chunk::resident(key, Bytes::from(bytes)))?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalStore, StoreConfig};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_local(dir: &TempDir) -> Arc<LocalStore> {
        LocalStore::open(&StoreConfig::new(dir.path())).unwrap()
    }

    fn random_payload(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen()).collect()
    }

    #[test]
    fn test_single_chunk_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_local(&dir);
        let chunker = TreeChunker::new(*store.hasher());
        let payload = random_payload(100, 1);
        let root = chunker.split(&payload, store.as_ref()).unwrap();
        assert_eq!(chunker.join(&root, store.as_ref()).unwrap(), payload);
        store.close();
    }

    #[test]
    fn test_multi_level_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_local(&dir);
        // Small geometry forces several tree levels out of 8100 bytes.
        let chunker = TreeChunker::new(*store.hasher()).with_geometry(256, 4);
        let payload = random_payload(8100, 2);
        let root = chunker.split(&payload, store.as_ref()).unwrap();
        let joined = chunker.join(&root, store.as_ref()).unwrap();
        assert_eq!(joined.len(), 8100);
        assert_eq!(joined, payload);
        store.close();
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let dir = TempDir::new().unwrap();
        let store = open_local(&dir);
        let chunker = TreeChunker::new(*store.hasher()).with_geometry(512, 8);
        let payload = random_payload(2048, 3);
        let root = chunker.split(&payload, store.as_ref()).unwrap();
        assert_eq!(chunker.join(&root, store.as_ref()).unwrap(), payload);
        store.close();
    }

    #[test]
    fn test_empty_payload() {
        let dir = TempDir::new().unwrap();
        let store = open_local(&dir);
        let chunker = TreeChunker::new(*store.hasher());
        let root = chunker.split(&[], store.as_ref()).unwrap();
        assert!(chunker.join(&root, store.as_ref()).unwrap().is_empty());
        store.close();
    }

    #[test]
    fn test_split_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let store = open_local(&dir);
        let chunker = TreeChunker::new(*store.hasher());
        let payload = random_payload(5000, 4);
        let a = chunker.split(&payload, store.as_ref()).unwrap();
        let b = chunker.split(&payload, store.as_ref()).unwrap();
        assert_eq!(a, b);
        store.close();
    }

    #[test]
    fn test_join_missing_chunk_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_local(&dir);
        let chunker = TreeChunker::new(*store.hasher());
        let missing = Key::from_hash_bytes(&[0x42; 32]);
        assert!(matches!(
            chunker.join(&missing, store.as_ref()),
            Err(StoreError::NotFound)
        ));
        store.close();
    }
}
