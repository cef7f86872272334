//! Core types for the chunkmesh store and simulation harness.
//!
//! This crate provides the foundational value objects shared by every
//! other crate in the workspace:
//!
//! - [`Key`]: 32-byte content address with overlay proximity
//! - [`NodeId`]: opaque node identifier with a derived overlay address
//! - [`Chunk`]: the content-addressed storage unit and its pipeline state
//! - [`Hasher`] / [`HashAlgo`]: key derivation
//! - [`Signal`], [`Completion`], [`CancelToken`]: the blocking primitives
//!   the store's asynchronous-durability and pending-fetch contracts are
//!   expressed with

mod chunk;
mod hasher;
mod key;
mod signal;

pub use chunk::{logical_size, Chunk, SIZE_PREFIX_BYTES};
pub use hasher::{HashAlgo, Hasher};
pub use key::{HexError, Key, NodeId};
pub use signal::{CancelToken, Completion, Signal, WaitOutcome};
