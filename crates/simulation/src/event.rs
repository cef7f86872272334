//! Simulation event taxonomy.
//!
//! Two buses carry these:
//!
//! - the **input** bus carries [`SimAction`]s — high-level intents posted
//!   by mockers, journal replays, or drivers, executed by the network's
//!   dispatcher;
//! - the **output** bus carries [`SimEvent`]s — outcomes of structural
//!   changes, plus per-message traffic when message tracing is on.
//!
//! [`SimUpdate`] is the JSON export shape consumed by journals and
//! stream observers.

use chunkmesh_types::NodeId;
use serde::{Deserialize, Serialize};

/// A high-level intent for the network dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimAction {
    /// Bring a node up.
    NodeUp(NodeId),
    /// Take a node down.
    NodeDown(NodeId),
    /// Connect two nodes.
    ConnUp(NodeId, NodeId),
    /// Disconnect two nodes.
    ConnDown(NodeId, NodeId),
}

/// An observed outcome on the output bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEvent {
    /// A node changed up/down state.
    Node {
        /// The node.
        id: NodeId,
        /// Its new state.
        up: bool,
    },
    /// A connection changed up/down state.
    Conn {
        /// Canonically first endpoint.
        one: NodeId,
        /// Canonically second endpoint.
        other: NodeId,
        /// Its new state.
        up: bool,
        /// Whether `other` initiated.
        reverse: bool,
    },
    /// A message crossed a pipe (message tracing only).
    Msg {
        /// Sender.
        one: NodeId,
        /// Receiver.
        other: NodeId,
        /// Wire code of the message.
        code: u64,
    },
}

impl SimEvent {
    /// Event kind label for the export shape.
    pub fn kind(&self) -> &'static str {
        match self {
            SimEvent::Node { .. } => "node",
            SimEvent::Conn { .. } => "conn",
            SimEvent::Msg { .. } => "msg",
        }
    }

    /// The action that would reproduce this event, if any. Message
    /// events are observations, not actions.
    pub fn as_action(&self) -> Option<SimAction> {
        match self {
            SimEvent::Node { id, up: true } => Some(SimAction::NodeUp(*id)),
            SimEvent::Node { id, up: false } => Some(SimAction::NodeDown(*id)),
            SimEvent::Conn {
                one, other, up: true, ..
            } => Some(SimAction::ConnUp(*one, *other)),
            SimEvent::Conn {
                one, other, up: false, ..
            } => Some(SimAction::ConnDown(*one, *other)),
            SimEvent::Msg { .. } => None,
        }
    }
}

/// A peer add/drop on one node, emitted on the node's own event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A protocol session with the peer started.
    Add(NodeId),
    /// The session ended.
    Drop(NodeId),
}

/// JSON export shape: `{event, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimUpdate {
    /// Event kind.
    pub event: String,
    /// The event body.
    pub data: serde_json::Value,
}

impl SimUpdate {
    /// Build the export form of an event.
    pub fn from_event(event: &SimEvent) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.kind().to_string(),
            data: serde_json::to_value(event)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> NodeId {
        NodeId::from_bytes(&[byte; 32])
    }

    #[test]
    fn test_event_action_roundtrip() {
        let event = SimEvent::Node { id: id(1), up: true };
        assert_eq!(event.as_action(), Some(SimAction::NodeUp(id(1))));

        let event = SimEvent::Conn {
            one: id(1),
            other: id(2),
            up: false,
            reverse: true,
        };
        assert_eq!(event.as_action(), Some(SimAction::ConnDown(id(1), id(2))));

        let event = SimEvent::Msg {
            one: id(1),
            other: id(2),
            code: 5,
        };
        assert_eq!(event.as_action(), None);
    }

    #[test]
    fn test_sim_update_shape() {
        let event = SimEvent::Node { id: id(3), up: true };
        let update = SimUpdate::from_event(&event).unwrap();
        assert_eq!(update.event, "node");
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"event\":\"node\""));
        assert!(json.contains("\"data\""));
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = SimEvent::Conn {
            one: id(1),
            other: id(2),
            up: true,
            reverse: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SimEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
