//! In-process node simulation harness.
//!
//! Hosts many logical chunkmesh nodes in one process, connected by
//! synchronous duplex pipes, driven by an event bus:
//!
//! ```text
//! mocker / journal replay / driver
//!        │ SimAction (input channel)
//!        ▼
//! SimNetwork dispatcher ──► SimNode::{start,stop,add_peer,remove_peer}
//!        │                        │ one protocol runner per pipe end
//!        ▼                        ▼
//! output Bus<SimEvent> ◄── structural outcomes, traced messages
//!        │
//!        ├─► Journal (record, export, replay)
//!        └─► observers
//! ```
//!
//! Each node hosts a [`ChunkService`] built by a [`ServiceFixture`]
//! factory: local store, net store, retrieval protocol, and delivery
//! dispatcher, wired per node.

mod bus;
mod event;
mod journal;
mod mocker;
mod network;
mod node;
mod service;

pub use bus::Bus;
pub use event::{PeerEvent, SimAction, SimEvent, SimUpdate};
pub use journal::{Journal, JournalEntry};
pub use mocker::{Mocker, MockerConfig};
pub use network::{Conn, NetConfig, NetError, SimNetwork};
pub use node::SimNode;
pub use service::{ChunkService, ServiceFactory, ServiceFixture};
