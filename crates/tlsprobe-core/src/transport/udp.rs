//! UDP transport for DTLS targets. Each fetch returns one datagram.

use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use super::{state_from_error, Connector, SocketState, Transport};
use crate::config::ProbeConfig;

const MAX_DATAGRAM: usize = 65_535;

pub struct UdpTransport {
    socket: UdpSocket,
    closed: bool,
}

impl UdpTransport {
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

impl Transport for UdpTransport {
    fn fetch(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.socket.recv(&mut buf) {
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
        let sent = self.socket.send(data)?;
        if sent != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "datagram truncated on send",
            ));
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }

    /// UDP has no connection; only pending datagrams and ICMP errors show.
    fn socket_state(&mut self) -> SocketState {
        if self.closed {
            return SocketState::Closed;
        }
        if let Err(e) = self.socket.set_nonblocking(true) {
            return state_from_error(&e);
        }
        let mut probe = [0u8; 1];
        let state = match self.socket.peek(&mut probe) {
            Ok(_) => SocketState::DataAvailable,
            Err(e) => state_from_error(&e),
        };
        let _ = self.socket.set_nonblocking(false);
        state
    }
}

/// Opens UDP "connections" to the configured target.
pub struct UdpConnector {
    config: Arc<ProbeConfig>,
}

impl UdpConnector {
    pub fn new(config: Arc<ProbeConfig>) -> Self {
        Self { config }
    }
}

impl Connector for UdpConnector {
    fn connect(&self) -> io::Result<Box<dyn Transport>> {
        let target = self.config.target();
        let addr = target.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("cannot resolve '{target}': no addresses found"),
            )
        })?;
        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(addr)?;
        socket.set_read_timeout(Some(self.config.read_timeout))?;
        Ok(Box::new(UdpTransport::from_socket(socket)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_udp_datagram_exchange() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = ProbeConfig::builder()
            .host("127.0.0.1")
            .port(peer.local_addr().unwrap().port())
            .read_timeout(Duration::from_millis(200))
            .datagram(true)
            .build();
        let mut transport = UdpConnector::new(Arc::new(config)).connect().unwrap();
        transport.send(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        peer.send_to(b"one", from).unwrap();
        peer.send_to(b"two", from).unwrap();

        assert_eq!(transport.fetch().unwrap(), b"one");
        assert_eq!(transport.socket_state(), SocketState::DataAvailable);
        assert_eq!(transport.fetch().unwrap(), b"two");
        assert!(transport.fetch().unwrap().is_empty());
        transport.close().unwrap();
        assert_eq!(transport.socket_state(), SocketState::Closed);
    }
}
