//! The simulation network.
//!
//! Holds every node and connection, executes [`SimAction`]s from an
//! input bus, and posts the outcome of every structural change to the
//! output bus. Connections are canonical ordered pairs, created on first
//! connect and retained across up/down cycles.
//!
//! The node and connection maps sit under one coarse lock; the
//! dispatcher releases it before calling into a node, and per-action
//! panics are contained so one bad event never halts dispatch.

use crate::{Bus, ServiceFactory, SimAction, SimEvent, SimNode};
use chunkmesh_network::PipeFlavor;
use chunkmesh_storage::StoreError;
use chunkmesh_types::NodeId;
use crossbeam::channel::Receiver;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors from network structural operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// No node with that id.
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    /// The operation needs the node up.
    #[error("node {0} is down")]
    Unavailable(NodeId),

    /// Structural conflict: the requested state already holds.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// No connection between the pair.
    #[error("no connection between {0} and {1}")]
    UnknownConn(NodeId, NodeId),

    /// Harness setup failure.
    #[error("setup failed: {0}")]
    Setup(String),

    /// Store failure while building a node's service.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A connection between two nodes, canonical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conn {
    /// Lexicographically first endpoint.
    pub one: NodeId,
    /// Lexicographically second endpoint.
    pub other: NodeId,
    /// Whether the connection is up.
    pub up: bool,
    /// Whether `other` initiated the most recent change.
    pub reverse: bool,
}

fn canonical(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Harness configuration.
#[derive(Debug, Clone, Default)]
pub struct NetConfig {
    /// Pipe flavor connecting peers.
    pub flavor: PipeFlavor,
    /// Post a [`SimEvent::Msg`] per message sent.
    pub trace_msgs: bool,
}

struct NetInner {
    nodes: HashMap<NodeId, Arc<SimNode>>,
    conns: HashMap<(NodeId, NodeId), Conn>,
}

/// In-process container for many logical nodes.
pub struct SimNetwork {
    config: NetConfig,
    factory: ServiceFactory,
    inner: RwLock<NetInner>,
    events: Arc<Bus<SimEvent>>,
}

impl SimNetwork {
    /// Create an empty network.
    pub fn new(config: NetConfig, factory: ServiceFactory) -> Arc<Self> {
        Arc::new(Self {
            config,
            factory,
            inner: RwLock::new(NetInner {
                nodes: HashMap::new(),
                conns: HashMap::new(),
            }),
            events: Arc::new(Bus::new()),
        })
    }

    /// The output event bus.
    pub fn events(&self) -> &Arc<Bus<SimEvent>> {
        &self.events
    }

    /// Add a node with a fresh random id. The node starts down.
    pub fn new_node(&self) -> Result<NodeId, NetError> {
        let id = NodeId::random();
        self.new_node_with_id(id)?;
        Ok(id)
    }

    /// Add a node with a caller-chosen id.
    pub fn new_node_with_id(&self, id: NodeId) -> Result<(), NetError> {
        let mut inner = self.inner.write().expect("network lock poisoned");
        if inner.nodes.contains_key(&id) {
            return Err(NetError::Duplicate(format!("node {id} already added")));
        }
        let trace = self.config.trace_msgs.then(|| self.events.clone());
        let node = SimNode::new(id, self.factory.clone(), self.config.flavor, trace);
        inner.nodes.insert(id, node);
        debug!(node = %id, "node created");
        Ok(())
    }

    /// Look up a node.
    pub fn get_node(&self, id: &NodeId) -> Option<Arc<SimNode>> {
        self.inner
            .read()
            .expect("network lock poisoned")
            .nodes
            .get(id)
            .cloned()
    }

    /// Ids of all nodes.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner
            .read()
            .expect("network lock poisoned")
            .nodes
            .keys()
            .copied()
            .collect()
    }

    /// The connection entry for a pair, if one was ever created.
    pub fn conn(&self, a: &NodeId, b: &NodeId) -> Option<Conn> {
        let key = canonical(*a, *b);
        self.inner
            .read()
            .expect("network lock poisoned")
            .conns
            .get(&key)
            .cloned()
    }

    /// Start a node.
    pub fn start(&self, id: &NodeId) -> Result<(), NetError> {
        let node = self.get_node(id).ok_or(NetError::UnknownNode(*id))?;
        node.start(None)?;
        info!(node = %id, "node up");
        self.events.post(SimEvent::Node { id: *id, up: true });
        Ok(())
    }

    /// Stop a node. Connections involving it go down with it.
    pub fn stop(&self, id: &NodeId) -> Result<(), NetError> {
        let node = self.get_node(id).ok_or(NetError::UnknownNode(*id))?;
        node.stop()?;
        info!(node = %id, "node down");
        self.events.post(SimEvent::Node { id: *id, up: false });

        let downed: Vec<Conn> = {
            let mut inner = self.inner.write().expect("network lock poisoned");
            inner
                .conns
                .values_mut()
                .filter(|conn| conn.up && (conn.one == *id || conn.other == *id))
                .map(|conn| {
                    conn.up = false;
                    conn.clone()
                })
                .collect()
        };
        for conn in downed {
            self.events.post(SimEvent::Conn {
                one: conn.one,
                other: conn.other,
                up: false,
                reverse: conn.reverse,
            });
        }
        Ok(())
    }

    /// Connect two nodes, as if `a` dialed `b`.
    ///
    /// Creates the connection entry on first use; a second connect on an
    /// up connection is a [`NetError::Duplicate`] with no side effect.
    pub fn connect(&self, a: &NodeId, b: &NodeId) -> Result<(), NetError> {
        let (one, other) = self.node_pair(a, b)?;
        let key = canonical(*a, *b);
        let reverse = key.0 != *a;

        {
            let mut inner = self.inner.write().expect("network lock poisoned");
            let conn = inner.conns.entry(key).or_insert(Conn {
                one: key.0,
                other: key.1,
                up: false,
                reverse,
            });
            if conn.up {
                return Err(NetError::Duplicate(format!("{a} and {b} already connected")));
            }
        }

        // Lock released before touching the nodes.
        one.add_peer(&other)?;

        let mut inner = self.inner.write().expect("network lock poisoned");
        let conn = inner.conns.get_mut(&key).expect("conn entry just created");
        conn.up = true;
        conn.reverse = reverse;
        drop(inner);

        info!(one = %key.0, other = %key.1, "connected");
        self.events.post(SimEvent::Conn {
            one: key.0,
            other: key.1,
            up: true,
            reverse,
        });
        Ok(())
    }

    /// Disconnect two nodes; the drop is initiated by `a`.
    pub fn disconnect(&self, a: &NodeId, b: &NodeId) -> Result<(), NetError> {
        let key = canonical(*a, *b);
        {
            let inner = self.inner.read().expect("network lock poisoned");
            let conn = inner
                .conns
                .get(&key)
                .ok_or(NetError::UnknownConn(*a, *b))?;
            if !conn.up {
                return Err(NetError::Duplicate(format!(
                    "{a} and {b} already disconnected"
                )));
            }
        }

        let node = self.get_node(a).ok_or(NetError::UnknownNode(*a))?;
        node.remove_peer(b)?;

        let reverse = {
            let mut inner = self.inner.write().expect("network lock poisoned");
            let conn = inner.conns.get_mut(&key).expect("conn entry exists");
            conn.up = false;
            conn.reverse = key.0 != *a;
            conn.reverse
        };

        info!(one = %key.0, other = %key.1, "disconnected");
        self.events.post(SimEvent::Conn {
            one: key.0,
            other: key.1,
            up: false,
            reverse,
        });
        Ok(())
    }

    /// Consume actions from an input channel on a dispatcher thread.
    ///
    /// Individual action errors are logged and dispatch continues;
    /// panics are contained per action. The thread exits when the
    /// channel disconnects.
    pub fn subscribe_actions(self: &Arc<Self>, actions: Receiver<SimAction>) -> JoinHandle<()> {
        let network = self.clone();
        std::thread::Builder::new()
            .name("sim-dispatcher".into())
            .spawn(move || {
                for action in actions {
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        network.execute(&action)
                    }));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!(?action, error = %e, "action failed"),
                        Err(_) => error!(?action, "action panicked"),
                    }
                }
            })
            .expect("failed to spawn dispatcher")
    }

    /// Execute one action.
    pub fn execute(&self, action: &SimAction) -> Result<(), NetError> {
        match action {
            SimAction::NodeUp(id) => self.start(id),
            SimAction::NodeDown(id) => self.stop(id),
            SimAction::ConnUp(a, b) => self.connect(a, b),
            SimAction::ConnDown(a, b) => self.disconnect(a, b),
        }
    }

    /// Stop every running node and close the output bus.
    pub fn shutdown(&self) {
        for id in self.node_ids() {
            if let Some(node) = self.get_node(&id) {
                if node.is_up() {
                    if let Err(e) = self.stop(&id) {
                        warn!(node = %id, error = %e, "stop during shutdown failed");
                    }
                }
            }
        }
        self.events.close();
    }

    /// Resolve a pair of distinct nodes in dial order.
    fn node_pair(&self, a: &NodeId, b: &NodeId) -> Result<(Arc<SimNode>, Arc<SimNode>), NetError> {
        if a == b {
            return Err(NetError::Setup("cannot connect a node to itself".into()));
        }
        let one = self.get_node(a).ok_or(NetError::UnknownNode(*a))?;
        let other = self.get_node(b).ok_or(NetError::UnknownNode(*b))?;
        Ok((one, other))
    }
}
