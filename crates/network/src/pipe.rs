//! Synchronous duplex message pipes.
//!
//! A [`MsgPipe`] carries framed messages between two logical peers.
//! Messages on one pipe are strictly FIFO in both directions. Writes are
//! synchronous: a slow reader stalls its writer and only that direction
//! of that pair — built-in backpressure, no dropped messages.
//!
//! Closing either end makes pending and future reads on both ends return
//! [`PipeError::Closed`], which is how protocol runner loops are told to
//! exit.
//!
//! The in-process flavor here uses rendezvous channels; byte-stream
//! flavors (socketpair, localhost TCP) live in [`crate::framed`]. All are
//! constructed through [`pipe_pair`](crate::pipe_pair).

use crossbeam::channel::{bounded, Receiver, Sender};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A framed message: numeric code plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMsg {
    /// Message code. Stable across versions; unknown codes are a
    /// protocol error.
    pub code: u64,
    /// Serialized payload.
    pub payload: Vec<u8>,
}

impl WireMsg {
    /// Convenience constructor.
    pub fn new(code: u64, payload: Vec<u8>) -> Self {
        Self { code, payload }
    }
}

/// Errors from pipe operations.
#[derive(Debug, Clone, Error)]
pub enum PipeError {
    /// The pipe was closed (EOF). The normal way a runner loop ends.
    #[error("pipe closed")]
    Closed,

    /// Transport failure on a byte-stream flavor.
    #[error("pipe io error: {0}")]
    Io(String),
}

/// One end of a duplex framed message pipe.
pub trait MsgPipe: Send + Sync {
    /// Block until a message arrives or the pipe closes.
    fn read_msg(&self) -> Result<WireMsg, PipeError>;

    /// Block until the peer accepts the message or the pipe closes.
    fn write_msg(&self, msg: WireMsg) -> Result<(), PipeError>;

    /// Close both directions, waking blocked readers and writers on both
    /// ends. Idempotent.
    fn close(&self);
}

/// In-process pipe end over rendezvous channels.
///
/// Both ends share one close-notification channel: dropping its sender
/// disconnects the receivers, which `select!` observes on either end
/// whether it is blocked reading or writing.
pub struct ChannelPipe {
    tx: Sender<WireMsg>,
    rx: Receiver<WireMsg>,
    closed: Receiver<Infallible>,
    close_handle: Arc<Mutex<Option<Sender<Infallible>>>>,
}

/// Create a connected pair of in-process pipe ends.
pub fn channel_pipe() -> (ChannelPipe, ChannelPipe) {
    let (a_tx, a_rx) = bounded(0);
    let (b_tx, b_rx) = bounded(0);
    let (close_tx, close_rx) = bounded::<Infallible>(0);
    let close_handle = Arc::new(Mutex::new(Some(close_tx)));
    (
        ChannelPipe {
            tx: a_tx,
            rx: b_rx,
            closed: close_rx.clone(),
            close_handle: close_handle.clone(),
        },
        ChannelPipe {
            tx: b_tx,
            rx: a_rx,
            closed: close_rx,
            close_handle,
        },
    )
}

impl MsgPipe for ChannelPipe {
    fn read_msg(&self) -> Result<WireMsg, PipeError> {
        let rx = &self.rx;
        let closed = &self.closed;
        crossbeam::select! {
            recv(rx) -> msg => msg.map_err(|_| PipeError::Closed),
            recv(closed) -> _ => Err(PipeError::Closed),
        }
    }

    fn write_msg(&self, msg: WireMsg) -> Result<(), PipeError> {
        let tx = &self.tx;
        let closed = &self.closed;
        crossbeam::select! {
            send(tx, msg) -> res => res.map_err(|_| PipeError::Closed),
            recv(closed) -> _ => Err(PipeError::Closed),
        }
    }

    fn close(&self) {
        // Dropping the shared sender disconnects both ends' close
        // receivers.
        self.close_handle
            .lock()
            .expect("pipe close lock poisoned")
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_roundtrip_both_directions() {
        let (a, b) = channel_pipe();
        let writer = thread::spawn(move || {
            a.write_msg(WireMsg::new(5, vec![1, 2, 3])).unwrap();
            let reply = a.read_msg().unwrap();
            assert_eq!(reply.code, 6);
            a
        });
        let msg = b.read_msg().unwrap();
        assert_eq!(msg, WireMsg::new(5, vec![1, 2, 3]));
        b.write_msg(WireMsg::new(6, vec![])).unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn test_fifo_order() {
        let (a, b) = channel_pipe();
        let writer = thread::spawn(move || {
            for code in 0..32u64 {
                a.write_msg(WireMsg::new(code, vec![])).unwrap();
            }
        });
        for code in 0..32u64 {
            assert_eq!(b.read_msg().unwrap().code, code);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_close_unblocks_reader_on_both_ends() {
        let (a, b) = channel_pipe();
        let reader = thread::spawn(move || b.read_msg());
        thread::sleep(Duration::from_millis(20));
        a.close();
        assert!(matches!(reader.join().unwrap(), Err(PipeError::Closed)));
        // The closing end's own reads fail too.
        assert!(matches!(a.read_msg(), Err(PipeError::Closed)));
    }

    #[test]
    fn test_close_unblocks_writer() {
        let (a, b) = channel_pipe();
        let writer = thread::spawn(move || a.write_msg(WireMsg::new(1, vec![0u8; 8])));
        thread::sleep(Duration::from_millis(20));
        b.close();
        assert!(matches!(writer.join().unwrap(), Err(PipeError::Closed)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (a, _b) = channel_pipe();
        a.close();
        a.close();
    }
}
