//! Byte-stream transports.
//!
//! The receive loop only needs `fetch` (empty result means nothing more is
//! coming) and the executor only needs `send`, `close` and a socket state
//! probe. A [`Connector`] opens a fresh transport for every execution.

pub mod memory;
pub mod tcp;
pub mod udp;

use std::io;

use serde::Serialize;

pub use memory::{Inbound, MemoryConnector, MemoryTransport};
pub use tcp::{TcpConnector, TcpTransport};
pub use udp::{UdpConnector, UdpTransport};

/// State of the underlying socket, observed right before closing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SocketState {
    /// Open, nothing pending.
    Up,
    /// Open with unread bytes pending.
    DataAvailable,
    /// Peer closed the connection.
    Closed,
    /// Peer closed its write side but still reads.
    PeerWriteClosed,
    /// Probe timed out.
    Timeout,
    /// Probe failed with an I/O error (reset, refused, ...).
    SocketException,
}

/// Bidirectional byte transport for one connection.
pub trait Transport: Send {
    /// Read whatever arrives next. An empty vector means the peer has nothing
    /// more to send (end of stream or read timeout).
    fn fetch(&mut self) -> io::Result<Vec<u8>>;

    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;

    fn socket_state(&mut self) -> SocketState;
}

/// Opens transports to the target.
pub trait Connector: Send + Sync {
    fn connect(&self) -> io::Result<Box<dyn Transport>>;
}

/// Map a probe error to a socket state.
pub(crate) fn state_from_error(err: &io::Error) -> SocketState {
    match err.kind() {
        io::ErrorKind::WouldBlock => SocketState::Up,
        io::ErrorKind::TimedOut => SocketState::Timeout,
        io::ErrorKind::UnexpectedEof => SocketState::Closed,
        _ => SocketState::SocketException,
    }
}
