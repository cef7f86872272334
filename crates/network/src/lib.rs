//! Transport primitives for chunkmesh.
//!
//! - [`MsgPipe`]: synchronous duplex framed pipe between two peers, with
//!   in-process channel, OS socketpair, and localhost-TCP flavors behind
//!   one [`pipe_pair`] provider
//! - [`OverlayTable`]: proximity-ordered candidate peers for a target key

mod framed;
mod overlay;
mod pipe;

pub use framed::{pipe_pair, FramedPipe, PipeFlavor};
pub use overlay::OverlayTable;
pub use pipe::{channel_pipe, ChannelPipe, MsgPipe, PipeError, WireMsg};
