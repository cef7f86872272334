//! End-to-end retrieval across simulated nodes.

use chunkmesh_simulation::{NetConfig, ServiceFixture, SimNetwork};
use chunkmesh_storage::StoreError;
use chunkmesh_types::NodeId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn random_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn two_node_network(fixture: &Arc<ServiceFixture>) -> (Arc<SimNetwork>, NodeId, NodeId) {
    let network = SimNetwork::new(NetConfig::default(), fixture.factory());
    let a = NodeId::from_bytes(&[1u8; 32]);
    let b = NodeId::from_bytes(&[2u8; 32]);
    network.new_node_with_id(a).unwrap();
    network.new_node_with_id(b).unwrap();
    network.start(&a).unwrap();
    network.start(&b).unwrap();
    network.connect(&a, &b).unwrap();
    (network, a, b)
}

#[test]
fn test_two_node_retrieval() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let (network, a, b) = two_node_network(&fixture);

    // Store an 8100-byte payload on B, retrieve it from A by root hash.
    let payload = random_payload(8100, 0xB0B);
    let root = fixture
        .service(&b)
        .unwrap()
        .store_payload(&payload)
        .unwrap();

    let fetched = fixture.service(&a).unwrap().fetch_payload(&root).unwrap();
    assert_eq!(fetched.len(), 8100);
    assert_eq!(fetched, payload);

    network.shutdown();
}

#[test]
fn test_two_node_retrieval_with_offer_negotiation() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf()).with_offer_negotiation();
    let (network, a, b) = two_node_network(&fixture);

    let payload = random_payload(8100, 0xD0E);
    let root = fixture
        .service(&b)
        .unwrap()
        .store_payload(&payload)
        .unwrap();

    let fetched = fixture.service(&a).unwrap().fetch_payload(&root).unwrap();
    assert_eq!(fetched, payload);

    network.shutdown();
}

#[test]
fn test_retrieved_chunks_become_local() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let (network, a, b) = two_node_network(&fixture);

    let payload = random_payload(5000, 0xF00);
    let root = fixture
        .service(&b)
        .unwrap()
        .store_payload(&payload)
        .unwrap();

    let service_a = fixture.service(&a).unwrap();
    service_a.fetch_payload(&root).unwrap();

    // A second fetch works without the peer: every chunk was written
    // through A's own local store on the way past.
    network.disconnect(&a, &b).unwrap();
    assert_eq!(service_a.fetch_payload(&root).unwrap(), payload);

    network.shutdown();
}

#[test]
fn test_retrieval_fails_without_peers() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf())
        .with_search_timeout(Duration::from_secs(2));
    let network = SimNetwork::new(NetConfig::default(), fixture.factory());
    let a = NodeId::from_bytes(&[1u8; 32]);
    network.new_node_with_id(a).unwrap();
    network.start(&a).unwrap();

    let missing = fixture
        .service(&a)
        .unwrap()
        .local()
        .hasher()
        .hash(b"nowhere");
    let result = fixture.service(&a).unwrap().fetch_payload(&missing);
    assert!(matches!(
        result,
        Err(StoreError::NotFound) | Err(StoreError::Timeout)
    ));

    network.shutdown();
}
