//! Per-connection state.
//!
//! A `TlsContext` is created for one trace execution, mutated by the send and
//! receive paths, and reset before a re-execution.

use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::debug;

use crate::config::ProbeConfig;
use crate::record::dtls::DtlsRecordLayer;
use crate::record::{PlainRecordLayer, RecordLayer};
use crate::transport::{Connector, SocketState, Transport};
use crate::{CipherSuite, ConnectionEnd, ProtocolVersion};

pub struct TlsContext {
    pub config: Arc<ProbeConfig>,
    /// Our side of the connection.
    pub connection_end: ConnectionEnd,
    /// Side whose messages are currently being processed.
    pub talking_connection_end: ConnectionEnd,
    pub selected_cipher_suite: Option<CipherSuite>,
    pub selected_protocol_version: Option<ProtocolVersion>,
    pub client_random: Option<[u8; 32]>,
    pub server_random: Option<[u8; 32]>,
    pub dtls_cookie: Option<Vec<u8>>,
    /// Next DTLS handshake `message_seq` we send.
    pub dtls_write_message_seq: u16,
    /// Highest DTLS epoch seen on received records.
    pub dtls_read_epoch: u16,
    pub received_transport_exception: bool,
    pub received_fatal_alert: bool,
    pub sent_fatal_alert: bool,
    /// Snapshot taken by the executor right before closing the transport.
    pub socket_state: Option<SocketState>,
    pub record_layer: Box<dyn RecordLayer>,
    pub transport: Option<Box<dyn Transport>>,
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("connection_end", &self.connection_end)
            .field("selected_cipher_suite", &self.selected_cipher_suite)
            .field("selected_protocol_version", &self.selected_protocol_version)
            .field(
                "received_transport_exception",
                &self.received_transport_exception,
            )
            .field("received_fatal_alert", &self.received_fatal_alert)
            .field("socket_state", &self.socket_state)
            .field("open", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

fn record_layer_for(config: &ProbeConfig) -> Box<dyn RecordLayer> {
    if config.datagram {
        Box::new(DtlsRecordLayer::new(config.highest_protocol_version))
    } else {
        Box::new(PlainRecordLayer::new(config.highest_protocol_version))
    }
}

impl TlsContext {
    /// A client-side context that opens connections through `connector`.
    pub fn new(config: Arc<ProbeConfig>, connector: Arc<dyn Connector>) -> Self {
        let record_layer = record_layer_for(&config);
        Self {
            config,
            connection_end: ConnectionEnd::Client,
            talking_connection_end: ConnectionEnd::Client,
            selected_cipher_suite: None,
            selected_protocol_version: None,
            client_random: None,
            server_random: None,
            dtls_cookie: None,
            dtls_write_message_seq: 0,
            dtls_read_epoch: 0,
            received_transport_exception: false,
            received_fatal_alert: false,
            sent_fatal_alert: false,
            socket_state: None,
            record_layer,
            transport: None,
            connector,
        }
    }

    /// Replace the record layer, e.g. with one that holds real keys.
    pub fn with_record_layer(mut self, record_layer: Box<dyn RecordLayer>) -> Self {
        self.record_layer = record_layer;
        self
    }

    /// Cipher suite in effect: the negotiated one or the configured default.
    pub fn chosen_cipher_suite(&self) -> CipherSuite {
        self.selected_cipher_suite
            .unwrap_or(self.config.default_cipher_suite)
    }

    /// Protocol version in effect: the negotiated one or the configured highest.
    pub fn chosen_protocol_version(&self) -> ProtocolVersion {
        self.selected_protocol_version
            .unwrap_or(self.config.highest_protocol_version)
    }

    /// Open a fresh transport through the connector.
    pub fn open(&mut self) -> io::Result<()> {
        self.transport = Some(self.connector.connect()?);
        debug!("transport opened");
        Ok(())
    }

    /// Snapshot the socket state, then close the transport.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            self.socket_state = Some(transport.socket_state());
            if let Err(e) = transport.close() {
                debug!(error = %e, "error while closing transport");
            }
        }
    }

    /// Record the socket state without closing.
    pub fn snapshot_socket_state(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            self.socket_state = Some(transport.socket_state());
        }
    }

    /// Read the next chunk from the transport.
    pub fn fetch(&mut self) -> io::Result<Vec<u8>> {
        match self.transport.as_mut() {
            Some(t) => t.fetch(),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no transport open",
            )),
        }
    }

    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match self.transport.as_mut() {
            Some(t) => t.send(data),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no transport open",
            )),
        }
    }

    /// Drop all runtime state so the context can run a trace again.
    pub fn reset(&mut self) {
        self.close();
        self.talking_connection_end = self.connection_end;
        self.selected_cipher_suite = None;
        self.selected_protocol_version = None;
        self.client_random = None;
        self.server_random = None;
        self.dtls_cookie = None;
        self.dtls_write_message_seq = 0;
        self.dtls_read_epoch = 0;
        self.received_transport_exception = false;
        self.received_fatal_alert = false;
        self.sent_fatal_alert = false;
        self.socket_state = None;
        self.record_layer = record_layer_for(&self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{Inbound, MemoryConnector, Responder};

    fn connector() -> Arc<dyn Connector> {
        Arc::new(MemoryConnector::new(|_| {
            Ok(Box::new(|_: &[u8]| vec![Inbound::Data(vec![1])]) as Responder)
        }))
    }

    #[test]
    fn test_chosen_values_fall_back_to_config() {
        let config = Arc::new(ProbeConfig::default());
        let mut ctx = TlsContext::new(Arc::clone(&config), connector());
        assert_eq!(ctx.chosen_cipher_suite(), config.default_cipher_suite);
        assert_eq!(ctx.chosen_protocol_version(), ProtocolVersion::TLS12);
        ctx.selected_cipher_suite = Some(CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA);
        assert_eq!(
            ctx.chosen_cipher_suite(),
            CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA
        );
    }

    #[test]
    fn test_io_without_transport_fails() {
        let mut ctx = TlsContext::new(Arc::new(ProbeConfig::default()), connector());
        assert_eq!(
            ctx.fetch().unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert!(ctx.send(&[1]).is_err());
    }

    #[test]
    fn test_open_close_snapshots_state() {
        let mut ctx = TlsContext::new(Arc::new(ProbeConfig::default()), connector());
        ctx.open().unwrap();
        ctx.send(&[0]).unwrap();
        ctx.close();
        assert_eq!(ctx.socket_state, Some(SocketState::DataAvailable));
        assert!(ctx.transport.is_none());
    }

    #[test]
    fn test_reset_clears_runtime_state() {
        let mut ctx = TlsContext::new(Arc::new(ProbeConfig::default()), connector());
        ctx.open().unwrap();
        ctx.received_fatal_alert = true;
        ctx.received_transport_exception = true;
        ctx.selected_protocol_version = Some(ProtocolVersion::TLS10);
        ctx.dtls_write_message_seq = 4;
        ctx.reset();
        assert!(!ctx.received_fatal_alert);
        assert!(!ctx.received_transport_exception);
        assert!(ctx.selected_protocol_version.is_none());
        assert_eq!(ctx.dtls_write_message_seq, 0);
        assert!(ctx.transport.is_none());
        assert!(ctx.socket_state.is_none());
    }

    #[test]
    fn test_datagram_config_selects_dtls_layer() {
        let config = Arc::new(ProbeConfig::builder().datagram(true).build());
        let ctx = TlsContext::new(config, connector());
        assert!(ctx.record_layer.is_datagram());
    }
}
