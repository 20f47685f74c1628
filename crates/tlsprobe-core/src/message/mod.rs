//! Protocol messages exchanged over the record layer.
//!
//! Every message is one variant of [`ProtocolMessage`]. The equality oracle
//! only looks at [`MessageKind`], the class identity of a message, plus the
//! serialized bytes of alerts.

pub mod handler;
pub mod https;
pub mod ssl2;

use serde::Serialize;
use tracing::debug;

use crate::alert::{AlertDescription, AlertLevel};
use crate::context::TlsContext;
use crate::handshake::codec::{
    decode_client_hello, decode_hello_verify_request, decode_server_hello,
    encode_client_hello_body, wrap_handshake, ClientHello, EcdheServerKeyExchange,
    HelloVerifyRequest, ServerHello,
};
use crate::handshake::codec_dtls::{wrap_dtls_handshake, DtlsHandshakeHeader};
use crate::handshake::HandshakeType;
use crate::record::ContentType;
use crate::ProtocolVersion;
use tlsprobe_types::ParserError;

pub use https::{HttpsRequest, HttpsResponse};
pub use ssl2::Ssl2ServerHello;

/// Class identity of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKind {
    Alert,
    ChangeCipherSpec,
    Handshake(HandshakeType),
    UnknownHandshake,
    ApplicationData,
    Heartbeat,
    HttpsRequest,
    HttpsResponse,
    Ssl2ServerHello,
    DtlsFragment,
    Unknown,
}

/// Alert message: `level(1) || description(1)`.
///
/// Raw bytes are kept as-is so that unknown levels and descriptions survive a
/// parse/serialize cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub level: u8,
    pub description: u8,
}

impl AlertMessage {
    pub fn new(level: AlertLevel, description: AlertDescription) -> Self {
        Self {
            level: level as u8,
            description: description as u8,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.level == AlertLevel::Fatal as u8
    }

    pub fn description(&self) -> Result<AlertDescription, u8> {
        AlertDescription::from_u8(self.description)
    }
}

/// Decoded view of a handshake body, for the types the probe inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeBody {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    HelloVerifyRequest(HelloVerifyRequest),
    /// Only decoded once the negotiated suite is known to be ECDHE.
    EcdheServerKeyExchange(EcdheServerKeyExchange),
    Opaque,
}

/// A handshake message of a known type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub handshake_type: HandshakeType,
    pub body: Vec<u8>,
    /// DTLS message sequence number, if the message arrived over DTLS.
    pub message_seq: Option<u16>,
    pub decoded: HandshakeBody,
}

impl HandshakeMessage {
    /// Build a message from a raw body, decoding the inspected types.
    pub fn new(handshake_type: HandshakeType, body: Vec<u8>) -> Result<Self, ParserError> {
        let decoded = match handshake_type {
            HandshakeType::ClientHello => {
                let dtls = body.len() >= 2
                    && ProtocolVersion::from_be_bytes([body[0], body[1]]).is_dtls();
                HandshakeBody::ClientHello(decode_client_hello(&body, dtls)?)
            }
            HandshakeType::ServerHello => HandshakeBody::ServerHello(decode_server_hello(&body)?),
            HandshakeType::HelloVerifyRequest => {
                HandshakeBody::HelloVerifyRequest(decode_hello_verify_request(&body)?)
            }
            _ => HandshakeBody::Opaque,
        };
        Ok(Self {
            handshake_type,
            body,
            message_seq: None,
            decoded,
        })
    }

    /// An opaque message whose body is not inspected.
    pub fn opaque(handshake_type: HandshakeType, body: Vec<u8>) -> Self {
        Self {
            handshake_type,
            body,
            message_seq: None,
            decoded: HandshakeBody::Opaque,
        }
    }

    pub fn client_hello(ch: ClientHello) -> Self {
        Self {
            handshake_type: HandshakeType::ClientHello,
            body: encode_client_hello_body(&ch),
            message_seq: None,
            decoded: HandshakeBody::ClientHello(ch),
        }
    }
}

/// Handshake message with a type byte this crate does not model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownHandshakeMessage {
    pub msg_type: u8,
    pub body: Vec<u8>,
}

/// Heartbeat message (RFC 6520).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatMessage {
    pub heartbeat_type: u8,
    pub payload_length: u16,
    pub payload: Vec<u8>,
    pub padding: Vec<u8>,
}

/// One DTLS handshake fragment, before reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtlsFragmentMessage {
    pub header: DtlsHandshakeHeader,
    pub fragment: Vec<u8>,
}

/// Bytes that could not be parsed as any known message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessage {
    /// Content type hint the bytes arrived under, if any.
    pub content_type: Option<ContentType>,
    pub data: Vec<u8>,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    Alert(AlertMessage),
    ChangeCipherSpec(Vec<u8>),
    Handshake(HandshakeMessage),
    UnknownHandshake(UnknownHandshakeMessage),
    ApplicationData(Vec<u8>),
    Heartbeat(HeartbeatMessage),
    HttpsRequest(HttpsRequest),
    HttpsResponse(HttpsResponse),
    Ssl2ServerHello(Ssl2ServerHello),
    DtlsFragment(DtlsFragmentMessage),
    Unknown(UnknownMessage),
}

impl ProtocolMessage {
    pub fn alert(level: AlertLevel, description: AlertDescription) -> Self {
        ProtocolMessage::Alert(AlertMessage::new(level, description))
    }

    pub fn change_cipher_spec() -> Self {
        ProtocolMessage::ChangeCipherSpec(vec![1])
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            ProtocolMessage::Alert(_) => MessageKind::Alert,
            ProtocolMessage::ChangeCipherSpec(_) => MessageKind::ChangeCipherSpec,
            ProtocolMessage::Handshake(m) => MessageKind::Handshake(m.handshake_type),
            ProtocolMessage::UnknownHandshake(_) => MessageKind::UnknownHandshake,
            ProtocolMessage::ApplicationData(_) => MessageKind::ApplicationData,
            ProtocolMessage::Heartbeat(_) => MessageKind::Heartbeat,
            ProtocolMessage::HttpsRequest(_) => MessageKind::HttpsRequest,
            ProtocolMessage::HttpsResponse(_) => MessageKind::HttpsResponse,
            ProtocolMessage::Ssl2ServerHello(_) => MessageKind::Ssl2ServerHello,
            ProtocolMessage::DtlsFragment(_) => MessageKind::DtlsFragment,
            ProtocolMessage::Unknown(_) => MessageKind::Unknown,
        }
    }

    /// Content type of the record this message travels in.
    ///
    /// `None` for SSL2 messages and for unknown bytes received without a hint.
    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            ProtocolMessage::Alert(_) => Some(ContentType::Alert),
            ProtocolMessage::ChangeCipherSpec(_) => Some(ContentType::ChangeCipherSpec),
            ProtocolMessage::Handshake(_)
            | ProtocolMessage::UnknownHandshake(_)
            | ProtocolMessage::DtlsFragment(_) => Some(ContentType::Handshake),
            ProtocolMessage::ApplicationData(_)
            | ProtocolMessage::HttpsRequest(_)
            | ProtocolMessage::HttpsResponse(_) => Some(ContentType::ApplicationData),
            ProtocolMessage::Heartbeat(_) => Some(ContentType::Heartbeat),
            ProtocolMessage::Ssl2ServerHello(_) => None,
            ProtocolMessage::Unknown(m) => m.content_type,
        }
    }

    pub fn is_fatal_alert(&self) -> bool {
        matches!(self, ProtocolMessage::Alert(a) if a.is_fatal())
    }

    /// Wire encoding of the message (record payload, TLS framing).
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            ProtocolMessage::Alert(a) => vec![a.level, a.description],
            ProtocolMessage::ChangeCipherSpec(payload) => payload.clone(),
            ProtocolMessage::Handshake(m) => wrap_handshake(m.handshake_type as u8, &m.body),
            ProtocolMessage::UnknownHandshake(m) => wrap_handshake(m.msg_type, &m.body),
            ProtocolMessage::ApplicationData(data) => data.clone(),
            ProtocolMessage::Heartbeat(m) => {
                let mut out = Vec::with_capacity(3 + m.payload.len() + m.padding.len());
                out.push(m.heartbeat_type);
                out.extend_from_slice(&m.payload_length.to_be_bytes());
                out.extend_from_slice(&m.payload);
                out.extend_from_slice(&m.padding);
                out
            }
            ProtocolMessage::HttpsRequest(m) => m.serialize(),
            ProtocolMessage::HttpsResponse(m) => m.serialize(),
            ProtocolMessage::Ssl2ServerHello(m) => m.serialize(),
            ProtocolMessage::DtlsFragment(m) => wrap_dtls_handshake(
                m.header.msg_type,
                m.header.length,
                m.header.message_seq,
                m.header.fragment_offset,
                &m.fragment,
            ),
            ProtocolMessage::Unknown(m) => m.data.clone(),
        }
    }

    /// Handshake type byte and body, for re-framing over DTLS.
    pub fn handshake_parts(&self) -> Option<(u8, &[u8])> {
        match self {
            ProtocolMessage::Handshake(m) => Some((m.handshake_type as u8, &m.body)),
            ProtocolMessage::UnknownHandshake(m) => Some((m.msg_type, &m.body)),
            _ => None,
        }
    }

    /// Fill in values only known at send time.
    ///
    /// A DTLS ClientHello without a cookie picks up the cookie from the last
    /// HelloVerifyRequest.
    pub fn prepare(&self, context: &TlsContext) -> ProtocolMessage {
        if let (ProtocolMessage::Handshake(m), Some(cookie)) = (self, &context.dtls_cookie) {
            if let HandshakeBody::ClientHello(ch) = &m.decoded {
                let missing = ch.cookie.as_ref().map_or(true, Vec::is_empty);
                if ch.version.is_dtls() && missing {
                    let mut ch = ch.clone();
                    ch.cookie = Some(cookie.clone());
                    return ProtocolMessage::Handshake(HandshakeMessage::client_hello(ch));
                }
            }
        }
        self.clone()
    }

    /// Apply the message's effect on the connection context.
    ///
    /// Called for every received message and every message about to be sent;
    /// `context.talking_connection_end` tells the two apart.
    pub fn adjust_context(&self, context: &mut TlsContext) -> Result<(), ParserError> {
        let local = context.talking_connection_end == context.connection_end;
        match self {
            ProtocolMessage::Alert(a) if a.is_fatal() => {
                if local {
                    context.sent_fatal_alert = true;
                } else {
                    context.received_fatal_alert = true;
                }
            }
            ProtocolMessage::Handshake(m) => match &m.decoded {
                HandshakeBody::ClientHello(ch) => {
                    context.client_random = Some(ch.random);
                    if let Some(cookie) = &ch.cookie {
                        if !cookie.is_empty() {
                            context.dtls_cookie = Some(cookie.clone());
                        }
                    }
                }
                HandshakeBody::ServerHello(sh) => {
                    if !sh.cipher_suite.is_cbc() {
                        debug!(suite = sh.cipher_suite.0, "peer selected a non-CBC suite");
                    }
                    context.selected_protocol_version = Some(sh.version);
                    context.selected_cipher_suite = Some(sh.cipher_suite);
                    context.server_random = Some(sh.random);
                }
                HandshakeBody::HelloVerifyRequest(hvr) => {
                    if hvr.cookie.is_empty() {
                        return Err(ParserError::Adjustment(
                            "HelloVerifyRequest carries an empty cookie".into(),
                        ));
                    }
                    context.dtls_cookie = Some(hvr.cookie.clone());
                }
                HandshakeBody::EcdheServerKeyExchange(ske) => {
                    debug!(curve = ske.named_curve, "peer sent ECDHE parameters");
                }
                HandshakeBody::Opaque => {}
            },
            ProtocolMessage::Ssl2ServerHello(_) => {
                context.selected_protocol_version = Some(ProtocolVersion::SSL2);
            }
            _ => {}
        }
        Ok(())
    }
}
