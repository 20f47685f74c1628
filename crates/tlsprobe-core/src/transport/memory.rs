//! In-memory transport driven by a scripted peer.
//!
//! Each connection owns a queue of inbound events. A responder closure sees
//! every chunk the probe sends and may queue replies, which makes it possible
//! to write deterministic peers without sockets.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{Connector, SocketState, Transport};

/// One inbound event seen by `fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Data(Vec<u8>),
    /// The next fetch fails with this error kind.
    Error(io::ErrorKind),
    /// The peer closes the connection.
    Close,
}

/// Reacts to one chunk sent by the probe.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Inbound> + Send>;

/// Builds the responder for connection number `n` (starting at zero).
pub type ResponderFactory = dyn Fn(u64) -> io::Result<Responder> + Send + Sync;

pub struct MemoryTransport {
    inbound: VecDeque<Inbound>,
    responder: Option<Responder>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    peer_closed: bool,
    closed: bool,
    failed: bool,
}

impl MemoryTransport {
    /// A transport whose inbound events are all known up front.
    pub fn scripted(inbound: Vec<Inbound>) -> Self {
        Self {
            inbound: inbound.into(),
            responder: None,
            sent: Arc::new(Mutex::new(Vec::new())),
            peer_closed: false,
            closed: false,
            failed: false,
        }
    }

    /// A transport that asks `responder` for replies to every send.
    pub fn with_responder(responder: Responder) -> Self {
        Self {
            responder: Some(responder),
            ..Self::scripted(Vec::new())
        }
    }

    /// Handle on everything sent so far, readable after the transport moved.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.sent)
    }
}

impl Transport for MemoryTransport {
    fn fetch(&mut self) -> io::Result<Vec<u8>> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        match self.inbound.pop_front() {
            Some(Inbound::Data(data)) => Ok(data),
            Some(Inbound::Error(kind)) => {
                self.failed = true;
                Err(io::Error::from(kind))
            }
            Some(Inbound::Close) => {
                self.peer_closed = true;
                self.inbound.clear();
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        if self.peer_closed {
            self.failed = true;
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(data.to_vec());
        }
        if let Some(responder) = self.responder.as_mut() {
            self.inbound.extend(responder(data));
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn socket_state(&mut self) -> SocketState {
        if self.closed || self.peer_closed || matches!(self.inbound.front(), Some(Inbound::Close)) {
            SocketState::Closed
        } else if self.failed {
            SocketState::SocketException
        } else if matches!(self.inbound.front(), Some(Inbound::Data(_))) {
            SocketState::DataAvailable
        } else {
            SocketState::Up
        }
    }
}

/// Connector producing one [`MemoryTransport`] per connection.
pub struct MemoryConnector {
    factory: Box<ResponderFactory>,
    connections: AtomicU64,
}

impl MemoryConnector {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(u64) -> io::Result<Responder> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            connections: AtomicU64::new(0),
        }
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> io::Result<Box<dyn Transport>> {
        let n = self.connections.fetch_add(1, Ordering::SeqCst);
        let responder = (self.factory)(n)?;
        Ok(Box::new(MemoryTransport::with_responder(responder)))
    }
}
