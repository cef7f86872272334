//! Overlay routing table.
//!
//! A flat table of connected peers and their overlay addresses. For a
//! target key it yields candidates ordered by descending proximity
//! (common-prefix bit length between the peer's overlay address and the
//! key). Equal-proximity candidates are rotated round-robin so repeated
//! retrievals spread load instead of hammering one peer.
//!
//! This is the seam a kademlia-style routing table would slot into; the
//! retrieval protocol only requires "an ordered list of candidates".

use chunkmesh_types::{Key, NodeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Proximity-ordered peer table.
///
/// Thread-safe via `RwLock` — membership changes only on peer add/drop,
/// candidate reads on every retrieval.
pub struct OverlayTable {
    base: Key,
    peers: RwLock<HashMap<NodeId, Key>>,
    cursor: AtomicUsize,
}

impl OverlayTable {
    /// Create a table centered on our own overlay address.
    pub fn new(base: Key) -> Self {
        Self {
            base,
            peers: RwLock::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Our own overlay address.
    pub fn base(&self) -> Key {
        self.base
    }

    /// Register a connected peer.
    pub fn add(&self, id: NodeId, addr: Key) {
        self.peers
            .write()
            .expect("overlay table lock poisoned")
            .insert(id, addr);
    }

    /// Drop a disconnected peer.
    pub fn remove(&self, id: &NodeId) {
        self.peers
            .write()
            .expect("overlay table lock poisoned")
            .remove(id);
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.read().expect("overlay table lock poisoned").len()
    }

    /// Whether any peers are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidate peers for `target`, closest first.
    ///
    /// Ordering is by descending proximity, then node id for
    /// determinism; runs of equal proximity are rotated by a shared
    /// cursor, one step per call.
    pub fn candidates(&self, target: &Key) -> Vec<NodeId> {
        let peers = self.peers.read().expect("overlay table lock poisoned");
        let mut ranked: Vec<(u32, NodeId)> = peers
            .iter()
            .map(|(id, addr)| (addr.proximity(target), *id))
            .collect();
        drop(peers);
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut out = Vec::with_capacity(ranked.len());
        let mut run_start = 0;
        while run_start < ranked.len() {
            let proximity = ranked[run_start].0;
            let run_end = ranked[run_start..]
                .iter()
                .position(|(p, _)| *p != proximity)
                .map(|offset| run_start + offset)
                .unwrap_or(ranked.len());
            let run = &ranked[run_start..run_end];
            let shift = turn % run.len();
            out.extend(run[shift..].iter().map(|(_, id)| *id));
            out.extend(run[..shift].iter().map(|(_, id)| *id));
            run_start = run_end;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: [u8; 32]) -> Key {
        Key::from_hash_bytes(&bytes)
    }

    fn id(byte: u8) -> NodeId {
        NodeId::from_bytes(&[byte; 32])
    }

    #[test]
    fn test_candidates_ordered_by_proximity() {
        let table = OverlayTable::new(key([0u8; 32]));
        let target = key([0u8; 32]);
        // Distances: first bit, second bit, third bit.
        table.add(id(1), key({ let mut k = [0u8; 32]; k[0] = 0x80; k }));
        table.add(id(2), key({ let mut k = [0u8; 32]; k[0] = 0x40; k }));
        table.add(id(3), key({ let mut k = [0u8; 32]; k[0] = 0x20; k }));
        assert_eq!(table.candidates(&target), vec![id(3), id(2), id(1)]);
    }

    #[test]
    fn test_equal_proximity_rotates() {
        let table = OverlayTable::new(key([0u8; 32]));
        let target = key([0u8; 32]);
        // Same first differing bit, so equal proximity.
        table.add(id(1), key({ let mut k = [0u8; 32]; k[0] = 0x80; k }));
        table.add(id(2), key({ let mut k = [0u8; 32]; k[0] = 0xC0; k }));
        let first = table.candidates(&target);
        let second = table.candidates(&target);
        assert_ne!(first, second);
        assert_eq!(first.len(), 2);
        // Same membership, different rotation.
        assert_eq!(
            {
                let mut sorted = first.clone();
                sorted.sort();
                sorted
            },
            {
                let mut sorted = second.clone();
                sorted.sort();
                sorted
            }
        );
    }

    #[test]
    fn test_remove_drops_candidate() {
        let table = OverlayTable::new(key([0u8; 32]));
        table.add(id(1), key([1u8; 32]));
        table.add(id(2), key([2u8; 32]));
        table.remove(&id(1));
        assert_eq!(table.candidates(&key([0u8; 32])), vec![id(2)]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_empty_table_yields_no_candidates() {
        let table = OverlayTable::new(key([0u8; 32]));
        assert!(table.candidates(&key([5u8; 32])).is_empty());
    }
}
