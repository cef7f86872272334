//! The per-node retrieval protocol instance.
//!
//! One [`Streamer`] runs on each node, shared by one runner loop per
//! connected peer. A runner reads messages off its pipe, dispatches them
//! here, and exits when the pipe closes. Decode failures and
//! stream-contract violations end only that peer's session.
//!
//! Server side of a retrieve request:
//!
//! ```text
//! RetrieveRequest{key}            miss ──► OfferedHashes{∅, from=0, to=0}
//!                                 hit  ──► OfferedHashes{key, from=0, to=32}
//! RetrieveRequest{key, skip}      hit  ──► ChunkDelivery{key, bytes}
//! WantedHashes{want}                   ──► ChunkDelivery per wanted hash
//! ```
//!
//! Client side: deliveries are handed to the delivery dispatcher (which
//! fulfills pending placeholders); offers for in-flight keys are
//! answered with a want-everything bitfield.

use crate::{
    decode_message, packed_hashes, retrieve_request_stream, ChunkDeliveryMsg, Delivery,
    OfferedHashesMsg, Peer, PeerRegistry, Priority, ProtocolError, ProtocolMsg,
    RetrieveRequestMsg, Stream, SubscribeMsg, UnsubscribeMsg, WantedHashesMsg, HASH_SIZE,
};
use bytes::Bytes;
use chunkmesh_network::{MsgPipe, PipeError};
use chunkmesh_storage::LocalStore;
use chunkmesh_types::{Key, NodeId};
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-node protocol instance.
pub struct Streamer {
    local: Arc<LocalStore>,
    delivery: Arc<Delivery>,
    peers: Arc<PeerRegistry>,
}

impl Streamer {
    /// Create the protocol instance for one node.
    pub fn new(local: Arc<LocalStore>, delivery: Arc<Delivery>, peers: Arc<PeerRegistry>) -> Arc<Self> {
        Arc::new(Self {
            local,
            delivery,
            peers,
        })
    }

    /// The shared peer table.
    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// The delivery dispatcher.
    pub fn delivery(&self) -> &Arc<Delivery> {
        &self.delivery
    }

    /// Register a newly connected peer and return its handle.
    pub fn register_peer(&self, id: NodeId, pipe: Arc<dyn MsgPipe>) -> Arc<Peer> {
        let peer = Peer::new(id, pipe);
        self.peers.insert(peer.clone());
        peer
    }

    /// Drop a peer from the table.
    pub fn unregister_peer(&self, id: &NodeId) {
        self.peers.remove(id);
    }

    /// Subscribe the peer to serve us `stream`.
    pub fn subscribe(&self, peer: &Arc<Peer>, stream: Stream, priority: Priority) -> Result<(), ProtocolError> {
        peer.add_client_stream(stream.clone());
        peer.send(&ProtocolMsg::Subscribe(SubscribeMsg {
            stream,
            key: vec![],
            from: 0,
            to: 0,
            priority,
        }))
    }

    /// Run the protocol session for one peer until its pipe closes.
    ///
    /// The caller subscribes the retrieve stream at registration, before
    /// the peer is discoverable by the dispatcher; outbox FIFO then
    /// guarantees the remote sees the subscription ahead of any retrieve
    /// request of ours.
    pub fn run(&self, peer: &Arc<Peer>) -> Result<(), ProtocolError> {
        loop {
            let wire = match peer.pipe().read_msg() {
                Ok(wire) => wire,
                Err(PipeError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            let msg = decode_message(&wire)?;
            trace!(peer = %peer.id(), msg = msg.name(), "received");
            self.handle(peer, msg)?;
        }
    }

    fn handle(&self, peer: &Arc<Peer>, msg: ProtocolMsg) -> Result<(), ProtocolError> {
        match msg {
            ProtocolMsg::Subscribe(m) => self.handle_subscribe(peer, m),
            ProtocolMsg::Unsubscribe(m) => self.handle_unsubscribe(peer, m),
            ProtocolMsg::RetrieveRequest(m) => self.handle_retrieve_request(peer, m),
            ProtocolMsg::OfferedHashes(m) => self.handle_offered_hashes(peer, m),
            ProtocolMsg::WantedHashes(m) => self.handle_wanted_hashes(peer, m),
            ProtocolMsg::ChunkDelivery(m) => self.handle_chunk_delivery(peer, m),
        }
    }

    fn handle_subscribe(&self, peer: &Arc<Peer>, msg: SubscribeMsg) -> Result<(), ProtocolError> {
        debug!(peer = %peer.id(), stream = %msg.stream, "peer subscribed");
        peer.add_server_stream(msg.stream);
        Ok(())
    }

    fn handle_unsubscribe(&self, peer: &Arc<Peer>, msg: UnsubscribeMsg) -> Result<(), ProtocolError> {
        debug!(peer = %peer.id(), stream = %msg.stream, "peer unsubscribed");
        peer.remove_server_stream(&msg.stream);
        Ok(())
    }

    /// Server side: answer a retrieve request from the local store.
    fn handle_retrieve_request(
        &self,
        peer: &Arc<Peer>,
        msg: RetrieveRequestMsg,
    ) -> Result<(), ProtocolError> {
        let stream = retrieve_request_stream();
        if !peer.has_server_stream(&stream) {
            return Err(ProtocolError::NotSubscribed {
                peer: peer.id(),
                stream: stream.0,
            });
        }

        // A pending placeholder is not servable data.
        let resident = self.local.get(&msg.key).ok().and_then(|chunk| chunk.data());

        match resident {
            None => {
                trace!(peer = %peer.id(), key = ?msg.key, "retrieve miss");
                peer.send(&ProtocolMsg::OfferedHashes(OfferedHashesMsg {
                    stream,
                    key: vec![],
                    from: 0,
                    to: 0,
                    hashes: vec![],
                    handover_proof: None,
                }))
            }
            Some(data) if msg.skip_check => {
                trace!(peer = %peer.id(), key = ?msg.key, "direct delivery");
                peer.send(&ProtocolMsg::ChunkDelivery(ChunkDeliveryMsg {
                    key: msg.key,
                    sdata: data.to_vec(),
                }))
            }
            Some(_) => {
                trace!(peer = %peer.id(), key = ?msg.key, "offering hash");
                let hashes = msg.key.as_bytes().to_vec();
                peer.remember_offered(stream.clone(), hashes.clone());
                peer.send(&ProtocolMsg::OfferedHashes(OfferedHashesMsg {
                    stream,
                    key: vec![],
                    from: 0,
                    to: HASH_SIZE,
                    hashes,
                    handover_proof: None,
                }))
            }
        }
    }

    /// Client side: answer offers of in-flight keys with our wants.
    fn handle_offered_hashes(
        &self,
        peer: &Arc<Peer>,
        msg: OfferedHashesMsg,
    ) -> Result<(), ProtocolError> {
        if msg.hashes.is_empty() {
            // The "we don't have it" reply; the hop timeout moves the
            // request along.
            trace!(peer = %peer.id(), stream = %msg.stream, "empty offer");
            return Ok(());
        }

        let hash_count = msg.hashes.len() / Key::BYTES;
        let mut want = vec![0u8; hash_count.div_ceil(8)];
        let mut wanted_any = false;
        for (index, key) in packed_hashes(&msg.hashes).enumerate() {
            if peer.retrieve_offered(&key) {
                want[index / 8] |= 1 << (index % 8);
                wanted_any = true;
            }
        }
        if !wanted_any {
            trace!(peer = %peer.id(), "offer matches no in-flight request");
            return Ok(());
        }

        peer.send(&ProtocolMsg::WantedHashes(WantedHashesMsg {
            stream: msg.stream,
            want,
            from: msg.from,
            to: msg.to,
        }))
    }

    /// Server side: deliver the wanted subset of our last offer.
    fn handle_wanted_hashes(
        &self,
        peer: &Arc<Peer>,
        msg: WantedHashesMsg,
    ) -> Result<(), ProtocolError> {
        let Some(offered) = peer.take_offered(&msg.stream) else {
            trace!(peer = %peer.id(), stream = %msg.stream, "want without an offer");
            return Ok(());
        };

        for (index, key) in packed_hashes(&offered).enumerate() {
            let wanted = msg
                .want
                .get(index / 8)
                .is_some_and(|byte| byte & (1 << (index % 8)) != 0);
            if !wanted {
                continue;
            }
            match self.local.get(&key) {
                Ok(chunk) => {
                    if let Some(data) = chunk.data() {
                        peer.send(&ProtocolMsg::ChunkDelivery(ChunkDeliveryMsg {
                            key,
                            sdata: data.to_vec(),
                        }))?;
                    }
                }
                Err(e) => {
                    // Offered but gone (evicted since). The client's
                    // timeout covers it.
                    debug!(?key, error = %e, "offered chunk no longer servable");
                }
            }
        }
        Ok(())
    }

    /// Client side: a chunk arrived.
    fn handle_chunk_delivery(
        &self,
        peer: &Arc<Peer>,
        msg: ChunkDeliveryMsg,
    ) -> Result<(), ProtocolError> {
        debug!(peer = %peer.id(), key = ?msg.key, bytes = msg.sdata.len(), "chunk delivered");
        self.delivery
            .process_delivery(peer, msg.key, Bytes::from(msg.sdata));
        Ok(())
    }
}
