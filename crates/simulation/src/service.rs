//! The chunk service hosted on each simulated node.
//!
//! [`ChunkService`] wires one node's full stack: local store, net store,
//! overlay table, delivery dispatcher, protocol instance, and chunker.
//! [`ServiceFixture`] owns what tests and harnesses need to hand services
//! out — per-node data directories, shared tunables, and a registry of
//! built services — and produces the factory closure the simulation node
//! calls on start.

use chunkmesh_network::OverlayTable;
use chunkmesh_protocol::{Delivery, DeliveryConfig, PeerRegistry, Streamer};
use chunkmesh_storage::{
    LocalStore, NetStore, StoreConfig, StoreError, TreeChunker, DEFAULT_SEARCH_TIMEOUT,
};
use chunkmesh_types::{HashAlgo, Key, NodeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Everything one node runs.
pub struct ChunkService {
    id: NodeId,
    local: Arc<LocalStore>,
    net: Arc<NetStore>,
    overlay: Arc<OverlayTable>,
    streamer: Arc<Streamer>,
    delivery: Arc<Delivery>,
    chunker: TreeChunker,
}

impl ChunkService {
    /// Build and wire the service for `id`, storing under `datadir`.
    pub fn build(
        id: NodeId,
        datadir: PathBuf,
        store_config: StoreConfig,
        delivery_config: DeliveryConfig,
        search_timeout: Duration,
        skip_check: bool,
    ) -> Result<Arc<Self>, StoreError> {
        std::fs::create_dir_all(&datadir).map_err(|e| StoreError::Io(e.to_string()))?;
        let local = LocalStore::open(&store_config)?;
        let overlay = Arc::new(OverlayTable::new(id.overlay_addr()));
        let peers = PeerRegistry::new();
        let delivery = Delivery::new(
            id,
            local.clone(),
            overlay.clone(),
            peers.clone(),
            delivery_config,
        );
        let fetch_delivery = delivery.clone();
        let net = NetStore::new(
            local.clone(),
            Box::new(move |key: &Key| fetch_delivery.request_from_peers(*key, skip_check)),
            search_timeout,
        );
        let streamer = Streamer::new(local.clone(), delivery.clone(), peers);
        let chunker = TreeChunker::new(*local.hasher());

        debug!(node = %id, datadir = %datadir.display(), "chunk service built");
        Ok(Arc::new(Self {
            id,
            local,
            net,
            overlay,
            streamer,
            delivery,
            chunker,
        }))
    }

    /// The hosting node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The two-tier local store.
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// The network-backed store.
    pub fn net(&self) -> &Arc<NetStore> {
        &self.net
    }

    /// The overlay candidate table.
    pub fn overlay(&self) -> &Arc<OverlayTable> {
        &self.overlay
    }

    /// The protocol instance.
    pub fn streamer(&self) -> &Arc<Streamer> {
        &self.streamer
    }

    /// The delivery dispatcher.
    pub fn delivery(&self) -> &Arc<Delivery> {
        &self.delivery
    }

    /// Chunk a payload into the local store; returns the root key.
    pub fn store_payload(&self, payload: &[u8]) -> Result<Key, StoreError> {
        self.chunker.split(payload, self.local.as_ref())
    }

    /// Reassemble a payload by root key, fetching missing chunks from
    /// peers.
    pub fn fetch_payload(&self, root: &Key) -> Result<Vec<u8>, StoreError> {
        self.chunker.join(root, self.net.as_ref())
    }

    /// Shut the store down (drains the durability writer).
    pub fn close(&self) {
        self.local.close();
    }
}

/// Factory the simulation node calls on start.
pub type ServiceFactory = Arc<dyn Fn(NodeId) -> Result<Arc<ChunkService>, StoreError> + Send + Sync>;

/// Explicit fixture owning service construction for a whole network.
///
/// Hands each node its own data directory under `base_dir`, applies the
/// shared tunables, and records every built service so a test can reach
/// any node's stores without side channels.
pub struct ServiceFixture {
    base_dir: PathBuf,
    mem_capacity: usize,
    db_capacity: u64,
    hash: HashAlgo,
    hop_timeout: Duration,
    search_timeout: Duration,
    skip_check: bool,
    services: Mutex<HashMap<NodeId, Arc<ChunkService>>>,
}

impl ServiceFixture {
    /// Fixture storing under `base_dir` with default tunables.
    pub fn new(base_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            base_dir,
            mem_capacity: chunkmesh_storage::DEFAULT_MEM_CAPACITY,
            db_capacity: chunkmesh_storage::DEFAULT_DB_CAPACITY,
            hash: HashAlgo::default(),
            hop_timeout: DeliveryConfig::default().hop_timeout,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            skip_check: true,
            services: Mutex::new(HashMap::new()),
        })
    }

    /// Fetch chunks via offer negotiation instead of direct delivery.
    pub fn with_offer_negotiation(mut self: Arc<Self>) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("fixture not yet shared").skip_check = false;
        self
    }

    /// Override the per-hop retrieve timeout.
    pub fn with_hop_timeout(mut self: Arc<Self>, timeout: Duration) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("fixture not yet shared").hop_timeout = timeout;
        self
    }

    /// Override the end-to-end search timeout.
    pub fn with_search_timeout(mut self: Arc<Self>, timeout: Duration) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("fixture not yet shared").search_timeout = timeout;
        self
    }

    /// Override the in-memory cache capacity.
    pub fn with_mem_capacity(mut self: Arc<Self>, capacity: usize) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("fixture not yet shared").mem_capacity = capacity;
        self
    }

    /// The factory closure handed to nodes.
    pub fn factory(self: &Arc<Self>) -> ServiceFactory {
        let fixture = self.clone();
        Arc::new(move |id: NodeId| {
            let datadir = fixture.base_dir.join(format!("node-{}", id.to_hex()));
            let store_config = StoreConfig::new(&datadir)
                .with_mem_capacity(fixture.mem_capacity)
                .with_db_capacity(fixture.db_capacity)
                .with_hash(fixture.hash);
            let service = ChunkService::build(
                id,
                datadir,
                store_config,
                DeliveryConfig {
                    hop_timeout: fixture.hop_timeout,
                },
                fixture.search_timeout,
                fixture.skip_check,
            )?;
            fixture
                .services
                .lock()
                .expect("fixture lock poisoned")
                .insert(id, service.clone());
            Ok(service)
        })
    }

    /// The service most recently built for `id`.
    pub fn service(&self, id: &NodeId) -> Option<Arc<ChunkService>> {
        self.services
            .lock()
            .expect("fixture lock poisoned")
            .get(id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_factory_builds_and_registers() {
        let dir = TempDir::new().unwrap();
        let fixture = ServiceFixture::new(dir.path().to_path_buf());
        let factory = fixture.factory();
        let id = NodeId::random();
        let service = factory(id).unwrap();
        assert_eq!(service.id(), id);
        assert!(fixture.service(&id).is_some());
        service.close();
    }

    #[test]
    fn test_store_and_fetch_locally() {
        let dir = TempDir::new().unwrap();
        let fixture = ServiceFixture::new(dir.path().to_path_buf());
        let factory = fixture.factory();
        let service = factory(NodeId::random()).unwrap();

        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let root = service.store_payload(&payload).unwrap();
        assert_eq!(service.fetch_payload(&root).unwrap(), payload);
        service.close();
    }
}
