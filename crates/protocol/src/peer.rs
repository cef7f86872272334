//! Per-peer protocol state.
//!
//! A [`Peer`] bundles the pipe to a connected node with the mutable state
//! the protocol keeps for it: which streams each side serves the other,
//! the hashes we last offered it, and the table of retrieve requests we
//! have in flight to it.
//!
//! The outgoing-request table is a small state machine per key:
//!
//! ```text
//! (idle) ──send──► Sent ──OfferedHashes──► Offered ──ChunkDelivery──► (done)
//!                    │  └────────ChunkDelivery────────────────────► (done)
//!                    └──timeout──► (idle, retryable)
//! ```
//!
//! While a key is Sent or Offered no second request for it goes to this
//! peer.

use crate::{encode_message, ProtocolError, ProtocolMsg, Stream};
use chunkmesh_network::{MsgPipe, PipeError, WireMsg};
use chunkmesh_types::{Key, NodeId};
use crossbeam::channel::{unbounded, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::trace;

/// State of a retrieve request we sent to this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveState {
    /// Request sent, nothing heard yet.
    Sent,
    /// Peer offered the hash; delivery negotiation in progress.
    Offered,
}

struct SentRequest {
    state: RetrieveState,
    since: Instant,
}

/// A connected peer and the protocol state attached to it.
///
/// Sends go through an outbox drained by a dedicated sender thread, so
/// handlers and the delivery dispatcher never block on a stalled pipe
/// and the session handshake cannot rendezvous-deadlock against the
/// remote side's. The outbox preserves per-peer FIFO order.
pub struct Peer {
    id: NodeId,
    pipe: Arc<dyn MsgPipe>,
    outbox: Sender<WireMsg>,
    /// Streams the peer subscribed us to — we serve these.
    server_streams: Mutex<HashSet<Stream>>,
    /// Streams we subscribed the peer to — they serve us.
    client_streams: Mutex<HashSet<Stream>>,
    /// Hashes we last offered per stream, awaiting a want.
    offered: Mutex<HashMap<Stream, Vec<u8>>>,
    /// Retrieve requests in flight to this peer.
    requests: Mutex<HashMap<Key, SentRequest>>,
}

impl Peer {
    /// Wrap a pipe to a connected node and start its sender.
    pub fn new(id: NodeId, pipe: Arc<dyn MsgPipe>) -> Arc<Self> {
        let (outbox, outbox_rx) = unbounded::<WireMsg>();
        let sender_pipe = pipe.clone();
        std::thread::Builder::new()
            .name(format!("peer-send-{id}"))
            .spawn(move || {
                for wire in outbox_rx {
                    if sender_pipe.write_msg(wire).is_err() {
                        return;
                    }
                }
            })
            .expect("failed to spawn peer sender");

        Arc::new(Self {
            id,
            pipe,
            outbox,
            server_streams: Mutex::new(HashSet::new()),
            client_streams: Mutex::new(HashSet::new()),
            offered: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
        })
    }

    /// The peer's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The underlying pipe.
    pub fn pipe(&self) -> &Arc<dyn MsgPipe> {
        &self.pipe
    }

    /// Encode and queue a message for sending.
    ///
    /// Queued messages leave in order; transport failures surface to the
    /// session's reader, not here.
    pub fn send(&self, msg: &ProtocolMsg) -> Result<(), ProtocolError> {
        trace!(peer = %self.id, msg = msg.name(), "sending");
        let wire = encode_message(msg)?;
        self.outbox
            .send(wire)
            .map_err(|_| ProtocolError::Pipe(PipeError::Closed))
    }

    /// Close the pipe, ending the runner on both sides.
    pub fn close(&self) {
        self.pipe.close();
    }

    // ── Stream bookkeeping ───────────────────────────────────────────

    /// The peer subscribed us to `stream`.
    pub fn add_server_stream(&self, stream: Stream) {
        self.server_streams
            .lock()
            .expect("peer stream lock poisoned")
            .insert(stream);
    }

    /// The peer unsubscribed from `stream`.
    pub fn remove_server_stream(&self, stream: &Stream) {
        self.server_streams
            .lock()
            .expect("peer stream lock poisoned")
            .remove(stream);
        self.offered
            .lock()
            .expect("peer offered lock poisoned")
            .remove(stream);
    }

    /// Whether we serve the peer `stream`.
    pub fn has_server_stream(&self, stream: &Stream) -> bool {
        self.server_streams
            .lock()
            .expect("peer stream lock poisoned")
            .contains(stream)
    }

    /// We subscribed the peer to `stream`.
    pub fn add_client_stream(&self, stream: Stream) {
        self.client_streams
            .lock()
            .expect("peer stream lock poisoned")
            .insert(stream);
    }

    /// Whether the peer serves us `stream`.
    pub fn has_client_stream(&self, stream: &Stream) -> bool {
        self.client_streams
            .lock()
            .expect("peer stream lock poisoned")
            .contains(stream)
    }

    // ── Server-side offer memory ─────────────────────────────────────

    /// Remember hashes offered on `stream` until the peer answers with
    /// its wants.
    pub fn remember_offered(&self, stream: Stream, hashes: Vec<u8>) {
        self.offered
            .lock()
            .expect("peer offered lock poisoned")
            .insert(stream, hashes);
    }

    /// Take the offer the peer is answering.
    pub fn take_offered(&self, stream: &Stream) -> Option<Vec<u8>> {
        self.offered
            .lock()
            .expect("peer offered lock poisoned")
            .remove(stream)
    }

    // ── Outgoing retrieve requests ───────────────────────────────────

    /// Note an outbound retrieve for `key`. Returns false if one is
    /// already in flight to this peer — the caller must not send again.
    pub fn retrieve_sent(&self, key: Key) -> bool {
        let mut requests = self.requests.lock().expect("peer request lock poisoned");
        if requests.contains_key(&key) {
            return false;
        }
        requests.insert(
            key,
            SentRequest {
                state: RetrieveState::Sent,
                since: Instant::now(),
            },
        );
        true
    }

    /// The peer offered an in-flight key. Returns false when nothing was
    /// in flight (unrelated offers are ignored, not an error).
    pub fn retrieve_offered(&self, key: &Key) -> bool {
        let mut requests = self.requests.lock().expect("peer request lock poisoned");
        match requests.get_mut(key) {
            Some(request) if request.state == RetrieveState::Sent => {
                request.state = RetrieveState::Offered;
                true
            }
            _ => false,
        }
    }

    /// The peer delivered an in-flight key; the request is complete.
    /// Returns whether it was in flight.
    pub fn retrieve_delivered(&self, key: &Key) -> bool {
        self.requests
            .lock()
            .expect("peer request lock poisoned")
            .remove(key)
            .is_some()
    }

    /// The request timed out; back to idle so a retry may target this
    /// peer again.
    pub fn retrieve_timed_out(&self, key: &Key) {
        self.requests
            .lock()
            .expect("peer request lock poisoned")
            .remove(key);
    }

    /// How long the request for `key` has been in flight.
    pub fn retrieve_age(&self, key: &Key) -> Option<std::time::Duration> {
        self.requests
            .lock()
            .expect("peer request lock poisoned")
            .get(key)
            .map(|request| request.since.elapsed())
    }
}

/// The peer table a node shares between its protocol runners and the
/// delivery dispatcher. Reads are frequent, writes only on peer
/// add/drop.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<NodeId, Arc<Peer>>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a peer, replacing any previous entry for the id.
    pub fn insert(&self, peer: Arc<Peer>) {
        self.peers
            .write()
            .expect("peer registry lock poisoned")
            .insert(peer.id(), peer);
    }

    /// Drop a peer.
    pub fn remove(&self, id: &NodeId) -> Option<Arc<Peer>> {
        self.peers
            .write()
            .expect("peer registry lock poisoned")
            .remove(id)
    }

    /// Look up a peer by id.
    pub fn get(&self, id: &NodeId) -> Option<Arc<Peer>> {
        self.peers
            .read()
            .expect("peer registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Connected peer ids.
    pub fn ids(&self) -> Vec<NodeId> {
        self.peers
            .read()
            .expect("peer registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.read().expect("peer registry lock poisoned").len()
    }

    /// Whether no peers are connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
