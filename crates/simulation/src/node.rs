//! A simulated node.
//!
//! Hosts one [`ChunkService`] and a pipe registry keyed by peer id. Each
//! connected peer gets one protocol runner thread that owns the read
//! side of our pipe end; the runner registers the peer with the protocol
//! instance and the overlay table, emits peer events, and cleans up when
//! the pipe closes.
//!
//! Lock discipline: the node lock is released before runner threads are
//! spawned, and stop takes the pipes and runner handles out under the
//! lock but closes and joins them outside it.

use crate::{Bus, NetError, PeerEvent, ServiceFactory, SimEvent};
use crate::service::ChunkService;
use chunkmesh_network::{pipe_pair, MsgPipe, PipeError, PipeFlavor, WireMsg};
use chunkmesh_protocol::{retrieve_request_stream, Priority};
use chunkmesh_types::NodeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

struct NodeInner {
    up: bool,
    pipes: HashMap<NodeId, Arc<dyn MsgPipe>>,
    runners: Vec<JoinHandle<()>>,
}

/// One logical node inside the simulation.
pub struct SimNode {
    id: NodeId,
    factory: ServiceFactory,
    flavor: PipeFlavor,
    trace: Option<Arc<Bus<SimEvent>>>,
    service: Mutex<Option<Arc<ChunkService>>>,
    inner: Mutex<NodeInner>,
    peer_events: Bus<PeerEvent>,
}

impl SimNode {
    /// Create a node, initially down.
    ///
    /// `trace` carries per-message events when message tracing is on.
    pub fn new(
        id: NodeId,
        factory: ServiceFactory,
        flavor: PipeFlavor,
        trace: Option<Arc<Bus<SimEvent>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            factory,
            flavor,
            trace,
            service: Mutex::new(None),
            inner: Mutex::new(NodeInner {
                up: false,
                pipes: HashMap::new(),
                runners: Vec::new(),
            }),
            peer_events: Bus::new(),
        })
    }

    /// The node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether the node is up.
    pub fn is_up(&self) -> bool {
        self.inner.lock().expect("node lock poisoned").up
    }

    /// The running service, if up.
    pub fn service(&self) -> Option<Arc<ChunkService>> {
        self.service.lock().expect("node service lock poisoned").clone()
    }

    /// Peer add/drop events for this node.
    pub fn peer_events(&self) -> &Bus<PeerEvent> {
        &self.peer_events
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.inner.lock().expect("node lock poisoned").pipes.len()
    }

    /// Install the service and move to up.
    ///
    /// `_snapshot` is accepted for interface symmetry with adapters that
    /// restore state; the in-process service rebuilds from its data
    /// directory instead.
    pub fn start(&self, _snapshot: Option<&[u8]>) -> Result<(), NetError> {
        {
            let inner = self.inner.lock().expect("node lock poisoned");
            if inner.up {
                return Err(NetError::Duplicate(format!("node {} already up", self.id)));
            }
        }
        let service = (self.factory)(self.id)?;
        *self.service.lock().expect("node service lock poisoned") = Some(service);
        self.inner.lock().expect("node lock poisoned").up = true;
        debug!(node = %self.id, "node started");
        Ok(())
    }

    /// Close all peer pipes, await the protocol runners, move to down.
    pub fn stop(&self) -> Result<(), NetError> {
        let (pipes, runners) = {
            let mut inner = self.inner.lock().expect("node lock poisoned");
            if !inner.up {
                return Err(NetError::Duplicate(format!("node {} already down", self.id)));
            }
            inner.up = false;
            (
                std::mem::take(&mut inner.pipes),
                std::mem::take(&mut inner.runners),
            )
        };
        for pipe in pipes.values() {
            pipe.close();
        }
        for runner in runners {
            let _ = runner.join();
        }
        if let Some(service) = self.service.lock().expect("node service lock poisoned").take() {
            service.close();
        }
        debug!(node = %self.id, "node stopped");
        Ok(())
    }

    /// Wire a duplex pipe to `other` and run the protocol on both ends.
    ///
    /// Emits [`PeerEvent::Add`] on both sides (from the runners, once
    /// each session is registered).
    pub fn add_peer(self: &Arc<Self>, other: &Arc<SimNode>) -> Result<(), NetError> {
        if !self.is_up() {
            return Err(NetError::Unavailable(self.id));
        }
        if !other.is_up() {
            return Err(NetError::Unavailable(other.id));
        }

        let (our_end, their_end) = pipe_pair(self.flavor).map_err(|e| NetError::Setup(e.to_string()))?;
        let our_end = self.maybe_trace(our_end, other.id);
        let their_end = other.maybe_trace(their_end, self.id);

        {
            let mut inner = self.inner.lock().expect("node lock poisoned");
            if inner.pipes.contains_key(&other.id) {
                return Err(NetError::Duplicate(format!(
                    "{} and {} already connected",
                    self.id, other.id
                )));
            }
            inner.pipes.insert(other.id, our_end.clone());
        }
        other
            .inner
            .lock()
            .expect("node lock poisoned")
            .pipes
            .insert(self.id, their_end.clone());

        // Locks are released; now spawn the two runners.
        self.spawn_runner(other.id, our_end);
        other.spawn_runner(self.id, their_end);
        Ok(())
    }

    /// Close our end of the pipe to `other`; both runners exit and emit
    /// [`PeerEvent::Drop`] on their side.
    pub fn remove_peer(&self, other: &NodeId) -> Result<(), NetError> {
        let pipe = self
            .inner
            .lock()
            .expect("node lock poisoned")
            .pipes
            .remove(other)
            .ok_or(NetError::UnknownConn(self.id, *other))?;
        pipe.close();
        Ok(())
    }

    fn maybe_trace(&self, pipe: Arc<dyn MsgPipe>, peer: NodeId) -> Arc<dyn MsgPipe> {
        match &self.trace {
            Some(bus) => Arc::new(EventedPipe {
                inner: pipe,
                bus: bus.clone(),
                from: self.id,
                to: peer,
            }),
            None => pipe,
        }
    }

    /// Register the session and start its reader thread.
    ///
    /// Registration, the retrieve-stream subscription, and the overlay
    /// entry happen here, synchronously: the subscription is first into
    /// the peer's outbox, and only after it is queued does the peer
    /// become discoverable by the delivery dispatcher — so a retrieve
    /// request can never overtake the subscription on the wire.
    fn spawn_runner(self: &Arc<Self>, peer_id: NodeId, pipe: Arc<dyn MsgPipe>) {
        let Some(service) = self.service() else {
            return;
        };
        let streamer = service.streamer().clone();
        let peer = streamer.register_peer(peer_id, pipe);
        if let Err(e) = streamer.subscribe(&peer, retrieve_request_stream(), Priority::Top) {
            warn!(node = %self.id, peer = %peer_id, error = %e, "subscribe failed");
        }
        service.overlay().add(peer_id, peer_id.overlay_addr());
        self.peer_events.post(PeerEvent::Add(peer_id));

        let node = self.clone();
        let runner = std::thread::Builder::new()
            .name(format!("proto-{}-{}", self.id, peer_id))
            .spawn(move || {
                trace!(node = %node.id, peer = %peer_id, "protocol session starting");
                if let Err(e) = streamer.run(&peer) {
                    warn!(node = %node.id, peer = %peer_id, error = %e, "protocol error, dropping peer");
                    peer.close();
                }
                streamer.unregister_peer(&peer_id);
                service.overlay().remove(&peer_id);
                node.forget_pipe(&peer_id);
                node.peer_events.post(PeerEvent::Drop(peer_id));
                trace!(node = %node.id, peer = %peer_id, "protocol session ended");
            })
            .expect("failed to spawn protocol runner");
        self.inner
            .lock()
            .expect("node lock poisoned")
            .runners
            .push(runner);
    }

    fn forget_pipe(&self, peer_id: &NodeId) {
        self.inner
            .lock()
            .expect("node lock poisoned")
            .pipes
            .remove(peer_id);
    }
}

/// Pipe decorator posting a message event per send.
struct EventedPipe {
    inner: Arc<dyn MsgPipe>,
    bus: Arc<Bus<SimEvent>>,
    from: NodeId,
    to: NodeId,
}

impl MsgPipe for EventedPipe {
    fn read_msg(&self) -> Result<WireMsg, PipeError> {
        self.inner.read_msg()
    }

    fn write_msg(&self, msg: WireMsg) -> Result<(), PipeError> {
        let code = msg.code;
        self.inner.write_msg(msg)?;
        self.bus.post(SimEvent::Msg {
            one: self.from,
            other: self.to,
            code,
        });
        Ok(())
    }

    fn close(&self) {
        self.inner.close();
    }
}
