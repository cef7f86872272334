//! Protocol error taxonomy.

use crate::CodecError;
use chunkmesh_network::PipeError;
use chunkmesh_types::NodeId;
use thiserror::Error;

/// Errors that end a peer's protocol session.
///
/// A protocol error is scoped to one peer: the runner returns it, the
/// peer is dropped, and every other peer is untouched.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed or unknown wire message.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Transport failure (a clean close is not an error; runners treat
    /// [`PipeError::Closed`] as EOF).
    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// The peer used a stream it never subscribed to.
    #[error("peer {peer} is not subscribed to stream {stream}")]
    NotSubscribed {
        /// The offending peer.
        peer: NodeId,
        /// The stream the request arrived on.
        stream: String,
    },
}
