//! The chunkmesh retrieval protocol.
//!
//! Peers exchange six messages over a framed pipe: stream subscriptions
//! (Subscribe/Unsubscribe), offer negotiation (OfferedHashes/
//! WantedHashes), and the retrieval pair (RetrieveRequest/ChunkDelivery).
//!
//! ```text
//! NetStore miss ──► Delivery::request_from_peers
//!                      │ closest candidate, hop timeout, rotate
//!                      ▼
//!              Peer ── RetrieveRequest ──► remote Streamer
//!                                             │ LocalStore lookup
//!              Streamer ◄── ChunkDelivery ────┘
//!                 │
//!              Delivery::process_delivery ──► placeholder fulfilled,
//!                                             waiters wake
//! ```

mod codec;
mod delivery;
mod error;
mod messages;
mod peer;
mod streamer;

pub use codec::{decode_message, encode_message, CodecError};
pub use delivery::{Delivery, DeliveryConfig};
pub use error::ProtocolError;
pub use messages::{
    codes, packed_hashes, retrieve_request_stream, ChunkDeliveryMsg, Handover, HandoverProof,
    OfferedHashesMsg, Priority, ProtocolMsg, RetrieveRequestMsg, Stream, SubscribeMsg,
    UnsubscribeMsg, WantedHashesMsg, HASH_SIZE,
};
pub use peer::{Peer, PeerRegistry, RetrieveState};
pub use streamer::Streamer;
