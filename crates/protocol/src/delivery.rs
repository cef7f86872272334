//! Delivery dispatcher.
//!
//! Tracks which keys are being fetched from the network and walks the
//! candidate peers for each. One request per key is in flight at a time;
//! callers that miss on an already-tracked key simply attach to the
//! pending placeholder installed by the net store.
//!
//! Per request, a retry task sends to the closest candidate and waits one
//! hop timeout for the delivery; timeouts advance to the next candidate
//! over a candidate list fixed when the request started. Exhausting the
//! list abandons the request: the placeholder is cleared and its waiters
//! wake to observe the miss.

use crate::{Peer, PeerRegistry, ProtocolMsg, RetrieveRequestMsg};
use bytes::Bytes;
use chunkmesh_network::OverlayTable;
use chunkmesh_storage::{LocalStore, StoreError};
use chunkmesh_types::{Chunk, Key, NodeId, Signal};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Tunables for the dispatcher.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// How long to wait for one candidate before advancing to the next.
    pub hop_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            hop_timeout: Duration::from_secs(3),
        }
    }
}

struct InflightRequest {
    skip_check: bool,
    done: Signal,
}

/// Chooses candidate peers for keys and tracks outstanding requests.
pub struct Delivery {
    self_id: NodeId,
    local: Arc<LocalStore>,
    overlay: Arc<OverlayTable>,
    peers: Arc<PeerRegistry>,
    inflight: DashMap<Key, Arc<InflightRequest>>,
    config: DeliveryConfig,
}

impl Delivery {
    /// Create a dispatcher for one node.
    pub fn new(
        self_id: NodeId,
        local: Arc<LocalStore>,
        overlay: Arc<OverlayTable>,
        peers: Arc<PeerRegistry>,
        config: DeliveryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            local,
            overlay,
            peers,
            inflight: DashMap::new(),
            config,
        })
    }

    /// The peer table shared with the protocol runners.
    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// The overlay candidate table.
    pub fn overlay(&self) -> &Arc<OverlayTable> {
        &self.overlay
    }

    /// Number of keys currently being fetched.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Fetch `key` from the network.
    ///
    /// If the key is already being fetched this only attaches the caller
    /// (who waits on the shared placeholder). Otherwise a retry task is
    /// spawned to walk the candidate list.
    pub fn request_from_peers(self: &Arc<Self>, key: Key, skip_check: bool) -> Result<(), StoreError> {
        let request = match self.inflight.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                trace!(?key, "fetch already in flight");
                return Ok(());
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let request = Arc::new(InflightRequest {
                    skip_check,
                    done: Signal::new(),
                });
                vacant.insert(request.clone());
                request
            }
        };

        let delivery = self.clone();
        std::thread::Builder::new()
            .name("delivery-retry".into())
            .spawn(move || delivery.run_request(key, request))
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// A peer delivered chunk bytes. Completes the peer's request state,
    /// fulfills the pending placeholder (if any), stores the chunk, and
    /// wakes the retry task. Returns the stored chunk.
    pub fn process_delivery(&self, from: &Arc<Peer>, key: Key, data: Bytes) -> Arc<Chunk> {
        if !from.retrieve_delivered(&key) {
            trace!(peer = %from.id(), ?key, "unsolicited chunk delivery");
        }
        let chunk = self.local.deliver(key, data);
        if let Some((_, request)) = self.inflight.remove(&key) {
            request.done.fire();
        }
        chunk
    }

    /// Walk the candidate list for `key`, one hop timeout per candidate.
    fn run_request(&self, key: Key, request: Arc<InflightRequest>) {
        // The candidate list is fixed up front; ties were already
        // rotated round-robin by the overlay table.
        let candidates: Vec<NodeId> = self
            .overlay
            .candidates(&key)
            .into_iter()
            .filter(|id| *id != self.self_id)
            .collect();

        if candidates.is_empty() {
            debug!(?key, "no candidate peers");
            self.abandon(&key);
            return;
        }

        for candidate in candidates {
            let Some(peer) = self.peers.get(&candidate) else {
                continue;
            };
            if !peer.retrieve_sent(key) {
                // A request for this key is already in flight to this
                // peer; never double-send.
                continue;
            }
            let msg = ProtocolMsg::RetrieveRequest(RetrieveRequestMsg {
                key,
                skip_check: request.skip_check,
            });
            if let Err(e) = peer.send(&msg) {
                debug!(peer = %candidate, ?key, error = %e, "retrieve send failed");
                peer.retrieve_timed_out(&key);
                continue;
            }
            trace!(peer = %candidate, ?key, "retrieve request sent");

            if request.done.wait_timeout(self.config.hop_timeout) {
                return;
            }
            debug!(peer = %candidate, ?key, "retrieve timed out, advancing");
            peer.retrieve_timed_out(&key);
        }

        warn!(?key, "candidates exhausted");
        self.abandon(&key);
    }

    /// Give up on `key`: clear the tracking entry and the placeholder,
    /// waking waiters to observe the miss. A chunk that still arrives
    /// later is stored normally.
    fn abandon(&self, key: &Key) {
        self.inflight.remove(key);
        if let Some(chunk) = self.local.mem().remove_if_pending(key) {
            chunk.abandon_fetch();
        }
    }
}
