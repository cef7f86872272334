//! Wire message types for the retrieval protocol.
//!
//! Message codes are stable for compatibility:
//!
//! | code | message |
//! |------|---------|
//! | 1 | [`OfferedHashesMsg`] |
//! | 2 | [`WantedHashesMsg`] |
//! | 3 | [`SubscribeMsg`] |
//! | 4 | [`UnsubscribeMsg`] |
//! | 5 | [`RetrieveRequestMsg`] |
//! | 6 | [`ChunkDeliveryMsg`] |
//!
//! Unknown codes are a protocol error and drop the peer.

use chunkmesh_types::Key;
use sbor::prelude::*;

/// Stable message codes.
pub mod codes {
    /// [`super::OfferedHashesMsg`]
    pub const OFFERED_HASHES: u64 = 1;
    /// [`super::WantedHashesMsg`]
    pub const WANTED_HASHES: u64 = 2;
    /// [`super::SubscribeMsg`]
    pub const SUBSCRIBE: u64 = 3;
    /// [`super::UnsubscribeMsg`]
    pub const UNSUBSCRIBE: u64 = 4;
    /// [`super::RetrieveRequestMsg`]
    pub const RETRIEVE_REQUEST: u64 = 5;
    /// [`super::ChunkDeliveryMsg`]
    pub const CHUNK_DELIVERY: u64 = 6;
}

/// Scan window width advertised in an offer for a single retrieved
/// chunk: the byte length of one hash. Historical wire constant — it is
/// not a chunk count.
pub const HASH_SIZE: u64 = Key::BYTES as u64;

/// A named logical channel between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
#[sbor(transparent)]
pub struct Stream(pub String);

impl Stream {
    /// Create a stream by name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The well-known stream chunk retrievals run on.
pub fn retrieve_request_stream() -> Stream {
    Stream::new("RETRIEVE_REQUEST")
}

/// Delivery priority of a stream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum Priority {
    /// Bulk sync traffic.
    Low,
    /// Default.
    Mid,
    /// Retrievals; a blocked reader is a blocked caller.
    Top,
}

/// Ask the peer to serve us `stream`. Code 3.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct SubscribeMsg {
    /// Stream to serve.
    pub stream: Stream,
    /// Stream-specific cursor key (unused on the retrieve stream).
    pub key: Vec<u8>,
    /// Window start.
    pub from: u64,
    /// Window end; zero means open-ended.
    pub to: u64,
    /// Delivery priority.
    pub priority: Priority,
}

/// Stop serving `stream`. Code 4.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct UnsubscribeMsg {
    /// Stream to stop serving.
    pub stream: Stream,
}

/// Hand-off boundary of an offered batch.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Handover {
    /// Stream handed over.
    pub stream: Stream,
    /// First offered index.
    pub start: u64,
    /// One past the last offered index.
    pub end: u64,
    /// Root commitment over the offered batch.
    pub root: Vec<u8>,
}

/// Signed hand-off, attached to offers on syncing streams.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct HandoverProof {
    /// Signature over the handover.
    pub sig: Vec<u8>,
    /// The handover itself.
    pub handover: Handover,
}

/// Hashes the server can deliver on a stream. Code 1.
///
/// An empty `hashes` with `to = 0` is the "we do not have it" reply to a
/// retrieve request.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct OfferedHashesMsg {
    /// Stream the offer belongs to.
    pub stream: Stream,
    /// Stream-specific cursor key (empty on the retrieve stream).
    pub key: Vec<u8>,
    /// Scan window start.
    pub from: u64,
    /// Scan window width in bytes ([`HASH_SIZE`] for a single retrieved
    /// chunk, zero for a miss).
    pub to: u64,
    /// Concatenated 32-byte hashes.
    pub hashes: Vec<u8>,
    /// Hand-off proof; absent on the retrieve stream.
    pub handover_proof: Option<HandoverProof>,
}

/// Bitfield of offered hashes the client wants delivered. Code 2.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct WantedHashesMsg {
    /// Stream the want refers to.
    pub stream: Stream,
    /// Bit i set means the i-th offered hash is wanted.
    pub want: Vec<u8>,
    /// Echo of the offer's window start.
    pub from: u64,
    /// Echo of the offer's window width.
    pub to: u64,
}

/// Ask a peer for a chunk. Code 5.
///
/// With `skip_check` the server replies with the chunk directly instead
/// of an offer round-trip.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct RetrieveRequestMsg {
    /// Key of the wanted chunk.
    pub key: Key,
    /// Deliver directly, skipping offer negotiation.
    pub skip_check: bool,
}

/// A chunk's bytes. Code 6.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ChunkDeliveryMsg {
    /// Key of the delivered chunk.
    pub key: Key,
    /// The chunk bytes.
    pub sdata: Vec<u8>,
}

/// Any protocol message, tagged with its wire code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMsg {
    /// Code 1.
    OfferedHashes(OfferedHashesMsg),
    /// Code 2.
    WantedHashes(WantedHashesMsg),
    /// Code 3.
    Subscribe(SubscribeMsg),
    /// Code 4.
    Unsubscribe(UnsubscribeMsg),
    /// Code 5.
    RetrieveRequest(RetrieveRequestMsg),
    /// Code 6.
    ChunkDelivery(ChunkDeliveryMsg),
}

impl ProtocolMsg {
    /// The message's wire code.
    pub fn code(&self) -> u64 {
        match self {
            ProtocolMsg::OfferedHashes(_) => codes::OFFERED_HASHES,
            ProtocolMsg::WantedHashes(_) => codes::WANTED_HASHES,
            ProtocolMsg::Subscribe(_) => codes::SUBSCRIBE,
            ProtocolMsg::Unsubscribe(_) => codes::UNSUBSCRIBE,
            ProtocolMsg::RetrieveRequest(_) => codes::RETRIEVE_REQUEST,
            ProtocolMsg::ChunkDelivery(_) => codes::CHUNK_DELIVERY,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolMsg::OfferedHashes(_) => "OfferedHashes",
            ProtocolMsg::WantedHashes(_) => "WantedHashes",
            ProtocolMsg::Subscribe(_) => "Subscribe",
            ProtocolMsg::Unsubscribe(_) => "Unsubscribe",
            ProtocolMsg::RetrieveRequest(_) => "RetrieveRequest",
            ProtocolMsg::ChunkDelivery(_) => "ChunkDelivery",
        }
    }
}

/// Iterate the 32-byte hashes packed into an offer's `hashes` field.
pub fn packed_hashes(hashes: &[u8]) -> impl Iterator<Item = Key> + '_ {
    hashes
        .chunks_exact(Key::BYTES)
        .map(Key::from_hash_bytes)
}
