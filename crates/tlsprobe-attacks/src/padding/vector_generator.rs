//! Padding test traces.
//!
//! A vector generator wraps every padding record into a workflow trace that
//! runs a handshake and then sends the record at a fixed point.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tlsprobe_core::alert::{AlertDescription, AlertLevel};
use tlsprobe_core::config::ProbeConfig;
use tlsprobe_core::handshake::codec::ClientHello;
use tlsprobe_core::handshake::HandshakeType;
use tlsprobe_core::message::{HandshakeMessage, MessageKind, ProtocolMessage};
use tlsprobe_core::record::Record;
use tlsprobe_core::workflow::WorkflowTrace;
use tlsprobe_types::ProbeError;

use super::record_generator::{PaddingRecordGenerator, RecordGeneratorType};

/// Where in the connection the padding record is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum VectorGeneratorType {
    /// Application data after a full handshake.
    #[default]
    Classic,
    /// In place of the client Finished record.
    Finished,
    /// A close_notify alert after a full handshake.
    CloseNotify,
}

impl FromStr for VectorGeneratorType {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "classic" => Ok(VectorGeneratorType::Classic),
            "finished" => Ok(VectorGeneratorType::Finished),
            "close-notify" | "closenotify" => Ok(VectorGeneratorType::CloseNotify),
            other => Err(ProbeError::Configuration(format!(
                "unknown vector generator: {other}"
            ))),
        }
    }
}

impl fmt::Display for VectorGeneratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VectorGeneratorType::Classic => "classic",
            VectorGeneratorType::Finished => "finished",
            VectorGeneratorType::CloseNotify => "close-notify",
        })
    }
}

/// Produces one trace per test vector. Must be deterministic for a given
/// configuration.
pub trait VectorGenerator: Send + Sync {
    fn generate(&self, config: &ProbeConfig) -> Result<Vec<WorkflowTrace>, ProbeError>;
}

/// signature_algorithms: sha256/rsa, sha384/rsa, sha1/rsa.
const SIGNATURE_ALGORITHMS_EXT: [u8; 12] = [
    0x00, 0x0d, 0x00, 0x08, 0x00, 0x06, 0x04, 0x01, 0x05, 0x01, 0x02, 0x01,
];

/// Placeholder RSA key exchange: a 48-byte premaster secret in the clear.
const CLIENT_KEY_EXCHANGE_LEN: usize = 48;

const VERIFY_DATA_LEN: usize = 12;

#[derive(Debug, Clone, Copy)]
pub struct PaddingVectorGenerator {
    kind: VectorGeneratorType,
    records: PaddingRecordGenerator,
}

impl PaddingVectorGenerator {
    pub fn new(kind: VectorGeneratorType, records: RecordGeneratorType) -> Self {
        Self {
            kind,
            records: PaddingRecordGenerator::new(records),
        }
    }

    pub fn kind(&self) -> VectorGeneratorType {
        self.kind
    }

    fn trace(&self, config: &ProbeConfig, name: &str, record: Record) -> WorkflowTrace {
        let trace = handshake_prefix(WorkflowTrace::named(name), config);
        match self.kind {
            VectorGeneratorType::Classic => client_flight(trace)
                .receive(server_finish())
                .send_records(vec![ProtocolMessage::ApplicationData(Vec::new())], vec![record])
                .receive(vec![MessageKind::Alert]),
            VectorGeneratorType::Finished => trace
                .send_records(
                    client_finish_messages(),
                    vec![Record::template(), Record::template(), record],
                )
                .receive(vec![MessageKind::Alert]),
            VectorGeneratorType::CloseNotify => client_flight(trace)
                .receive(server_finish())
                .send_records(
                    vec![ProtocolMessage::alert(
                        AlertLevel::Warning,
                        AlertDescription::CloseNotify,
                    )],
                    vec![record],
                )
                .receive(vec![MessageKind::Alert]),
        }
    }
}

impl VectorGenerator for PaddingVectorGenerator {
    fn generate(&self, config: &ProbeConfig) -> Result<Vec<WorkflowTrace>, ProbeError> {
        let vectors = self
            .records
            .records(config.default_cipher_suite, config.highest_protocol_version)?;
        Ok(vectors
            .into_iter()
            .map(|v| self.trace(config, &v.name, v.record))
            .collect())
    }
}

fn client_hello(config: &ProbeConfig) -> ProtocolMessage {
    let suites = if config.cipher_suites.is_empty() {
        vec![config.default_cipher_suite]
    } else {
        config.cipher_suites.clone()
    };
    let dtls = config.highest_protocol_version.is_dtls();
    ProtocolMessage::Handshake(HandshakeMessage::client_hello(ClientHello {
        version: config.highest_protocol_version,
        random: [0x2A; 32],
        session_id: Vec::new(),
        cookie: dtls.then(Vec::new),
        cipher_suites: suites,
        compression_methods: vec![0],
        extensions: SIGNATURE_ALGORITHMS_EXT.to_vec(),
    }))
}

/// ClientHello up to ServerHelloDone, with the cookie exchange on DTLS.
fn handshake_prefix(trace: WorkflowTrace, config: &ProbeConfig) -> WorkflowTrace {
    let mut trace = trace.send(vec![client_hello(config)]);
    if config.highest_protocol_version.is_dtls() {
        trace = trace
            .receive(vec![MessageKind::Handshake(HandshakeType::HelloVerifyRequest)])
            .send(vec![client_hello(config)]);
    }
    let mut flight = vec![
        MessageKind::Handshake(HandshakeType::ServerHello),
        MessageKind::Handshake(HandshakeType::Certificate),
    ];
    if config.default_cipher_suite.is_ecdhe() {
        flight.push(MessageKind::Handshake(HandshakeType::ServerKeyExchange));
    }
    flight.push(MessageKind::Handshake(HandshakeType::ServerHelloDone));
    trace.receive(flight)
}

fn client_finish_messages() -> Vec<ProtocolMessage> {
    let mut cke = Vec::with_capacity(2 + CLIENT_KEY_EXCHANGE_LEN);
    cke.extend_from_slice(&(CLIENT_KEY_EXCHANGE_LEN as u16).to_be_bytes());
    cke.resize(2 + CLIENT_KEY_EXCHANGE_LEN, 0);
    vec![
        ProtocolMessage::Handshake(HandshakeMessage::opaque(
            HandshakeType::ClientKeyExchange,
            cke,
        )),
        ProtocolMessage::change_cipher_spec(),
        ProtocolMessage::Handshake(HandshakeMessage::opaque(
            HandshakeType::Finished,
            vec![0; VERIFY_DATA_LEN],
        )),
    ]
}

fn client_flight(trace: WorkflowTrace) -> WorkflowTrace {
    trace.send(client_finish_messages())
}

fn server_finish() -> Vec<MessageKind> {
    vec![
        MessageKind::ChangeCipherSpec,
        MessageKind::Handshake(HandshakeType::Finished),
    ]
}
