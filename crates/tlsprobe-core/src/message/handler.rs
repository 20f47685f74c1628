//! Message handler registry.
//!
//! A handler knows how to parse one class of message out of a buffer. The
//! dispatcher asks [`get_handler`] for the handler matching a record's content
//! type (and, for handshakes, the type byte) and falls back to the unknown
//! handlers when that fails.

use super::{
    AlertMessage, DtlsFragmentMessage, HandshakeBody, HandshakeMessage, HeartbeatMessage,
    HttpsRequest, HttpsResponse, ProtocolMessage, Ssl2ServerHello, UnknownHandshakeMessage,
    UnknownMessage,
};
use crate::context::TlsContext;
use crate::handshake::codec::{decode_ecdhe_server_key_exchange, parse_handshake_header};
use crate::handshake::codec_dtls::parse_dtls_handshake_header;
use crate::handshake::HandshakeType;
use crate::record::ContentType;
use crate::CipherSuite;
use tlsprobe_types::ParserError;

/// Connection state visible to a handler.
///
/// The dispatcher refreshes it after every parsed message, so a handler sees
/// the effect of the messages before it in the same buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseState {
    /// Parse handshake content as DTLS fragments.
    pub is_fragment: bool,
    pub cipher_suite: Option<CipherSuite>,
}

impl ParseState {
    pub fn from_context(context: &TlsContext, is_fragment: bool) -> Self {
        Self {
            is_fragment,
            cipher_suite: context.selected_cipher_suite,
        }
    }
}

/// Parses one message class.
pub trait MessageHandler: Send + Sync {
    /// Parse one message starting at `offset`.
    ///
    /// Returns the message and the offset just past it.
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError>;
}

fn remaining(data: &[u8], offset: usize) -> Result<&[u8], ParserError> {
    data.get(offset..)
        .filter(|rest| !rest.is_empty())
        .ok_or(ParserError::Truncated {
            offset,
            need: 1,
            got: 0,
        })
}

pub struct AlertHandler;

impl MessageHandler for AlertHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        _state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let rest = remaining(data, offset)?;
        if rest.len() < 2 {
            return Err(ParserError::Truncated {
                offset,
                need: 2,
                got: rest.len(),
            });
        }
        Ok((
            ProtocolMessage::Alert(AlertMessage {
                level: rest[0],
                description: rest[1],
            }),
            offset + 2,
        ))
    }
}

pub struct ChangeCipherSpecHandler;

impl MessageHandler for ChangeCipherSpecHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        _state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let rest = remaining(data, offset)?;
        Ok((ProtocolMessage::ChangeCipherSpec(vec![rest[0]]), offset + 1))
    }
}

/// Handshake messages of a known type, or DTLS fragments of any type.
pub struct HandshakeHandler;

impl MessageHandler for HandshakeHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let rest = remaining(data, offset)?;
        if state.is_fragment {
            let (header, fragment, total) = parse_dtls_handshake_header(rest)?;
            return Ok((
                ProtocolMessage::DtlsFragment(DtlsFragmentMessage {
                    header,
                    fragment: fragment.to_vec(),
                }),
                offset + total,
            ));
        }
        let (type_byte, body, total) = parse_handshake_header(rest)?;
        let handshake_type =
            HandshakeType::from_u8(type_byte).map_err(ParserError::UnexpectedHandshakeType)?;
        let mut message = HandshakeMessage::new(handshake_type, body.to_vec())?;
        // The key exchange format follows from the suite the ServerHello picked.
        if handshake_type == HandshakeType::ServerKeyExchange
            && state.cipher_suite.is_some_and(CipherSuite::is_ecdhe)
        {
            message.decoded =
                HandshakeBody::EcdheServerKeyExchange(decode_ecdhe_server_key_exchange(body)?);
        }
        Ok((ProtocolMessage::Handshake(message), offset + total))
    }
}

/// Any well-framed handshake message, whatever its type byte.
pub struct UnknownHandshakeHandler;

impl MessageHandler for UnknownHandshakeHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        _state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let rest = remaining(data, offset)?;
        let (msg_type, body, total) = parse_handshake_header(rest)?;
        Ok((
            ProtocolMessage::UnknownHandshake(UnknownHandshakeMessage {
                msg_type,
                body: body.to_vec(),
            }),
            offset + total,
        ))
    }
}

/// Application data consumes everything that is left.
pub struct ApplicationDataHandler;

impl MessageHandler for ApplicationDataHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        _state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let rest = remaining(data, offset)?;
        Ok((ProtocolMessage::ApplicationData(rest.to_vec()), data.len()))
    }
}

pub struct HeartbeatHandler;

impl MessageHandler for HeartbeatHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        _state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let rest = remaining(data, offset)?;
        if rest.len() < 3 {
            return Err(ParserError::Truncated {
                offset,
                need: 3,
                got: rest.len(),
            });
        }
        let payload_length = u16::from_be_bytes([rest[1], rest[2]]);
        // A lying payload length is exactly what a heartbleed probe sends.
        let payload_end = (3 + payload_length as usize).min(rest.len());
        Ok((
            ProtocolMessage::Heartbeat(HeartbeatMessage {
                heartbeat_type: rest[0],
                payload_length,
                payload: rest[3..payload_end].to_vec(),
                padding: rest[payload_end..].to_vec(),
            }),
            data.len(),
        ))
    }
}

pub struct HttpsRequestHandler;

impl MessageHandler for HttpsRequestHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        _state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let (request, consumed) = HttpsRequest::parse(remaining(data, offset)?)?;
        Ok((ProtocolMessage::HttpsRequest(request), offset + consumed))
    }
}

pub struct HttpsResponseHandler;

impl MessageHandler for HttpsResponseHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        _state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let (response, consumed) = HttpsResponse::parse(remaining(data, offset)?)?;
        Ok((ProtocolMessage::HttpsResponse(response), offset + consumed))
    }
}

pub struct Ssl2ServerHelloHandler;

impl MessageHandler for Ssl2ServerHelloHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        _state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let (hello, consumed) = Ssl2ServerHello::parse(remaining(data, offset)?)?;
        Ok((ProtocolMessage::Ssl2ServerHello(hello), offset + consumed))
    }
}

/// Last resort: wraps all remaining bytes.
pub struct UnknownHandler {
    pub content_type: Option<ContentType>,
}

impl MessageHandler for UnknownHandler {
    fn parse(
        &self,
        data: &[u8],
        offset: usize,
        _state: &ParseState,
    ) -> Result<(ProtocolMessage, usize), ParserError> {
        let rest = remaining(data, offset)?;
        Ok((
            ProtocolMessage::Unknown(UnknownMessage {
                content_type: self.content_type,
                data: rest.to_vec(),
            }),
            data.len(),
        ))
    }
}

static ALERT: AlertHandler = AlertHandler;
static CHANGE_CIPHER_SPEC: ChangeCipherSpecHandler = ChangeCipherSpecHandler;
static HANDSHAKE: HandshakeHandler = HandshakeHandler;
static UNKNOWN_HANDSHAKE: UnknownHandshakeHandler = UnknownHandshakeHandler;
static APPLICATION_DATA: ApplicationDataHandler = ApplicationDataHandler;
static HEARTBEAT: HeartbeatHandler = HeartbeatHandler;
static HTTPS_REQUEST: HttpsRequestHandler = HttpsRequestHandler;
static HTTPS_RESPONSE: HttpsResponseHandler = HttpsResponseHandler;
static SSL2_SERVER_HELLO: Ssl2ServerHelloHandler = Ssl2ServerHelloHandler;

/// Handler for messages of `content_type`, refined by the handshake type
/// byte in `sub_type`.
///
/// A handshake with an unmodelled type byte gets the unknown-handshake
/// handler. `None` as content type selects the SSLv2 path.
pub fn get_handler(
    content_type: Option<ContentType>,
    sub_type: Option<u8>,
) -> &'static dyn MessageHandler {
    match content_type {
        Some(ContentType::Alert) => &ALERT,
        Some(ContentType::ChangeCipherSpec) => &CHANGE_CIPHER_SPEC,
        Some(ContentType::Handshake) => match sub_type.map(HandshakeType::from_u8) {
            Some(Err(_)) => &UNKNOWN_HANDSHAKE,
            _ => &HANDSHAKE,
        },
        Some(ContentType::ApplicationData) => &APPLICATION_DATA,
        Some(ContentType::Heartbeat) => &HEARTBEAT,
        None => &SSL2_SERVER_HELLO,
    }
}

/// HTTP handlers for application data, requests before responses.
pub fn https_handlers() -> [&'static dyn MessageHandler; 2] {
    [&HTTPS_REQUEST, &HTTPS_RESPONSE]
}

/// Handler for a handshake message that failed under its proper handler.
pub fn unknown_handshake_handler() -> &'static dyn MessageHandler {
    &UNKNOWN_HANDSHAKE
}
