//! TCP transport.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{state_from_error, Connector, SocketState, Transport};
use crate::config::ProbeConfig;

const READ_CHUNK: usize = 16 * 1024;

pub struct TcpTransport {
    stream: TcpStream,
    closed: bool,
}

impl TcpTransport {
    /// Connect to `addr` with the given timeouts.
    pub fn connect(
        addr: &SocketAddr,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(addr, connect_timeout)?;
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_write_timeout(Some(read_timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            closed: false,
        })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

impl Transport for TcpTransport {
    fn fetch(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; READ_CHUNK];
        match self.stream.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    fn socket_state(&mut self) -> SocketState {
        if self.closed {
            return SocketState::Closed;
        }
        if let Err(e) = self.stream.set_nonblocking(true) {
            return state_from_error(&e);
        }
        let mut probe = [0u8; 1];
        let state = match self.stream.peek(&mut probe) {
            Ok(0) => SocketState::Closed,
            Ok(_) => SocketState::DataAvailable,
            Err(e) => state_from_error(&e),
        };
        if let Err(e) = self.stream.set_nonblocking(false) {
            debug!(error = %e, "could not restore blocking mode");
        }
        state
    }
}

/// Opens TCP connections to the configured target.
pub struct TcpConnector {
    config: Arc<ProbeConfig>,
}

impl TcpConnector {
    pub fn new(config: Arc<ProbeConfig>) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> io::Result<Box<dyn Transport>> {
        let target = self.config.target();
        let addr = target.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("cannot resolve '{target}': no addresses found"),
            )
        })?;
        debug!(%addr, "connecting");
        let transport = TcpTransport::connect(
            &addr,
            self.config.connect_timeout,
            self.config.read_timeout,
        )?;
        Ok(Box::new(transport))
    }
}
