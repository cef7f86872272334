//! Byte-stream pipe flavors.
//!
//! Frames a [`WireMsg`] onto any ordered byte stream as
//! `[code: u64 LE][len: u32 LE][payload]` and adapts OS socketpairs and
//! localhost TCP connections to the [`MsgPipe`] interface. The simulation
//! harness picks a flavor at startup through [`pipe_pair`].

use crate::{channel_pipe, MsgPipe, PipeError, WireMsg};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Frame header: message code plus payload length.
const HEADER_BYTES: usize = 12;

/// Upper bound on a single frame's payload. Frames above this are
/// rejected as transport corruption rather than allocated.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Which pipe implementation connects a pair of peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipeFlavor {
    /// In-process rendezvous channels. The default.
    #[default]
    Channel,
    /// OS socketpair.
    SocketPair,
    /// Localhost TCP connection.
    Tcp,
}

impl FromStr for PipeFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "channel" | "sim" => Ok(PipeFlavor::Channel),
            "socket" | "socketpair" => Ok(PipeFlavor::SocketPair),
            "tcp" => Ok(PipeFlavor::Tcp),
            other => Err(format!("unknown pipe flavor: {other}")),
        }
    }
}

/// Create a connected pair of pipe ends of the requested flavor.
pub fn pipe_pair(flavor: PipeFlavor) -> io::Result<(Arc<dyn MsgPipe>, Arc<dyn MsgPipe>)> {
    match flavor {
        PipeFlavor::Channel => {
            let (a, b) = channel_pipe();
            Ok((Arc::new(a), Arc::new(b)))
        }
        PipeFlavor::SocketPair => {
            let (a, b) = UnixStream::pair()?;
            Ok((Arc::new(FramedPipe::unix(a)?), Arc::new(FramedPipe::unix(b)?)))
        }
        PipeFlavor::Tcp => {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            let addr = listener.local_addr()?;
            let dialer = TcpStream::connect(addr)?;
            let (accepted, _) = listener.accept()?;
            dialer.set_nodelay(true)?;
            accepted.set_nodelay(true)?;
            Ok((
                Arc::new(FramedPipe::tcp(dialer)?),
                Arc::new(FramedPipe::tcp(accepted)?),
            ))
        }
    }
}

/// A pipe end over an ordered byte stream.
///
/// Reader and writer are independently locked stream handles so a blocked
/// read never stalls a write. Close shuts the socket down in both
/// directions, which is what unblocks a reader parked in `read_exact`.
pub struct FramedPipe<S: Read + Write + Send> {
    reader: Mutex<S>,
    writer: Mutex<S>,
    closed: AtomicBool,
    shutdown: Box<dyn Fn() + Send + Sync>,
}

impl FramedPipe<UnixStream> {
    fn unix(stream: UnixStream) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        let ctl = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(stream),
            closed: AtomicBool::new(false),
            shutdown: Box::new(move || {
                let _ = ctl.shutdown(std::net::Shutdown::Both);
            }),
        })
    }
}

impl FramedPipe<TcpStream> {
    fn tcp(stream: TcpStream) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        let ctl = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(stream),
            closed: AtomicBool::new(false),
            shutdown: Box::new(move || {
                let _ = ctl.shutdown(std::net::Shutdown::Both);
            }),
        })
    }
}

impl<S: Read + Write + Send> FramedPipe<S> {
    fn map_err(&self, e: io::Error) -> PipeError {
        if self.closed.load(Ordering::Acquire) {
            return PipeError::Closed;
        }
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => PipeError::Closed,
            _ => PipeError::Io(e.to_string()),
        }
    }
}

impl<S: Read + Write + Send> MsgPipe for FramedPipe<S> {
    fn read_msg(&self) -> Result<WireMsg, PipeError> {
        let mut reader = self.reader.lock().expect("pipe reader lock poisoned");
        let mut header = [0u8; HEADER_BYTES];
        reader.read_exact(&mut header).map_err(|e| self.map_err(e))?;
        let code = u64::from_le_bytes(header[..8].try_into().expect("8-byte slice"));
        let len = u32::from_le_bytes(header[8..].try_into().expect("4-byte slice"));
        if len > MAX_FRAME_BYTES {
            return Err(PipeError::Io(format!("oversized frame: {len} bytes")));
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).map_err(|e| self.map_err(e))?;
        Ok(WireMsg { code, payload })
    }

    fn write_msg(&self, msg: WireMsg) -> Result<(), PipeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipeError::Closed);
        }
        let mut frame = Vec::with_capacity(HEADER_BYTES + msg.payload.len());
        frame.extend_from_slice(&msg.code.to_le_bytes());
        frame.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&msg.payload);
        let mut writer = self.writer.lock().expect("pipe writer lock poisoned");
        writer.write_all(&frame).map_err(|e| self.map_err(e))?;
        writer.flush().map_err(|e| self.map_err(e))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        (self.shutdown)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn exercise_roundtrip(flavor: PipeFlavor) {
        let (a, b) = pipe_pair(flavor).unwrap();
        let requester = thread::spawn(move || {
            a.write_msg(WireMsg::new(5, vec![0xAB; 300])).unwrap();
            a.read_msg().unwrap()
        });
        let msg = b.read_msg().unwrap();
        assert_eq!(msg.code, 5);
        assert_eq!(msg.payload, vec![0xAB; 300]);
        b.write_msg(WireMsg::new(6, vec![])).unwrap();
        assert_eq!(requester.join().unwrap(), WireMsg::new(6, vec![]));
    }

    fn exercise_close_unblocks(flavor: PipeFlavor) {
        let (a, b) = pipe_pair(flavor).unwrap();
        let reader = thread::spawn(move || b.read_msg());
        thread::sleep(Duration::from_millis(20));
        a.close();
        assert!(matches!(reader.join().unwrap(), Err(PipeError::Closed)));
    }

    #[test]
    fn test_socketpair_roundtrip() {
        exercise_roundtrip(PipeFlavor::SocketPair);
    }

    #[test]
    fn test_tcp_roundtrip() {
        exercise_roundtrip(PipeFlavor::Tcp);
    }

    #[test]
    fn test_socketpair_close_unblocks_reader() {
        exercise_close_unblocks(PipeFlavor::SocketPair);
    }

    #[test]
    fn test_tcp_close_unblocks_reader() {
        exercise_close_unblocks(PipeFlavor::Tcp);
    }

    #[test]
    fn test_channel_flavor_via_provider() {
        exercise_roundtrip(PipeFlavor::Channel);
    }

    #[test]
    fn test_flavor_parsing() {
        assert_eq!("sim".parse::<PipeFlavor>().unwrap(), PipeFlavor::Channel);
        assert_eq!(
            "socketpair".parse::<PipeFlavor>().unwrap(),
            PipeFlavor::SocketPair
        );
        assert_eq!("tcp".parse::<PipeFlavor>().unwrap(), PipeFlavor::Tcp);
        assert!("carrier-pigeon".parse::<PipeFlavor>().is_err());
    }
}
