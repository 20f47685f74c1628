//! TLS 1.2 handshake message encoding/decoding (RFC 5246 §7.4).
//!
//! Only the fields the probe reads or writes are modelled; everything else
//! (extensions, key exchange parameters) is carried as opaque bytes.

use crate::{CipherSuite, ProtocolVersion};
use tlsprobe_types::ParserError;

use super::HandshakeType;

/// Handshake header length: `msg_type(1) || length(3)`.
pub const HS_HEADER_LEN: usize = 4;

/// ClientHello message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    /// DTLS only; `None` for stream TLS.
    pub cookie: Option<Vec<u8>>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    /// Raw extensions block (without the outer length).
    pub extensions: Vec<u8>,
}

/// ServerHello message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Vec<u8>,
}

/// HelloVerifyRequest message (DTLS, RFC 6347 §4.2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

/// ECDHE ServerKeyExchange parameters (RFC 8422 §5.4). Only named curves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdheServerKeyExchange {
    pub named_curve: u16,
    pub public_key: Vec<u8>,
    /// Signature algorithm and signature, undecoded.
    pub signature: Vec<u8>,
}

const NAMED_CURVE: u8 = 3;

pub(crate) fn read_u24(data: &[u8]) -> usize {
    ((data[0] as usize) << 16) | ((data[1] as usize) << 8) | (data[2] as usize)
}

pub(crate) fn push_u24(buf: &mut Vec<u8>, val: usize) {
    buf.push((val >> 16) as u8);
    buf.push((val >> 8) as u8);
    buf.push(val as u8);
}

/// Bounds-checked cursor over a message body.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParserError> {
        if self.data.len() - self.pos < n {
            return Err(ParserError::Truncated {
                offset: self.pos,
                need: n,
                got: self.data.len() - self.pos,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ParserError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ParserError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn vec_u8(&mut self) -> Result<Vec<u8>, ParserError> {
        let len = self.u8()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn vec_u16(&mut self) -> Result<Vec<u8>, ParserError> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn random(&mut self) -> Result<[u8; 32], ParserError> {
        let mut random = [0u8; 32];
        random.copy_from_slice(self.take(32)?);
        Ok(random)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Parse a handshake header: msg_type(1) || length(3).
///
/// The type byte is returned raw so that unknown types can still be framed.
/// Returns (type_byte, body_slice, total_bytes_consumed).
pub fn parse_handshake_header(data: &[u8]) -> Result<(u8, &[u8], usize), ParserError> {
    if data.len() < HS_HEADER_LEN {
        return Err(ParserError::Truncated {
            offset: 0,
            need: HS_HEADER_LEN,
            got: data.len(),
        });
    }
    let length = read_u24(&data[1..4]);
    let total = HS_HEADER_LEN + length;
    if data.len() < total {
        return Err(ParserError::Truncated {
            offset: HS_HEADER_LEN,
            need: length,
            got: data.len() - HS_HEADER_LEN,
        });
    }
    Ok((data[0], &data[HS_HEADER_LEN..total], total))
}

/// Wrap a handshake body with the 4-byte header.
pub fn wrap_handshake(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HS_HEADER_LEN + body.len());
    out.push(msg_type);
    push_u24(&mut out, body.len());
    out.extend_from_slice(body);
    out
}

/// Encode a ClientHello body (without the handshake header).
pub fn encode_client_hello_body(ch: &ClientHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(128);
    body.extend_from_slice(&ch.version.to_be_bytes());
    body.extend_from_slice(&ch.random);

    body.push(ch.session_id.len() as u8);
    body.extend_from_slice(&ch.session_id);

    if let Some(cookie) = &ch.cookie {
        body.push(cookie.len() as u8);
        body.extend_from_slice(cookie);
    }

    body.extend_from_slice(&((ch.cipher_suites.len() * 2) as u16).to_be_bytes());
    for s in &ch.cipher_suites {
        body.extend_from_slice(&s.0.to_be_bytes());
    }

    body.push(ch.compression_methods.len() as u8);
    body.extend_from_slice(&ch.compression_methods);

    if !ch.extensions.is_empty() {
        body.extend_from_slice(&(ch.extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&ch.extensions);
    }
    body
}

/// Decode a ClientHello body. `dtls` selects whether a cookie field is present.
pub fn decode_client_hello(body: &[u8], dtls: bool) -> Result<ClientHello, ParserError> {
    let mut r = Reader::new(body);
    let version = ProtocolVersion(r.u16()?);
    let random = r.random()?;
    let session_id = r.vec_u8()?;
    let cookie = if dtls { Some(r.vec_u8()?) } else { None };

    let suites_raw = r.vec_u16()?;
    if suites_raw.len() % 2 != 0 {
        return Err(ParserError::Malformed(
            "odd cipher suite list length".into(),
        ));
    }
    let cipher_suites = suites_raw
        .chunks_exact(2)
        .map(|c| CipherSuite(u16::from_be_bytes([c[0], c[1]])))
        .collect();

    let compression_methods = r.vec_u8()?;
    let extensions = if r.remaining() > 0 {
        r.vec_u16()?
    } else {
        Vec::new()
    };

    Ok(ClientHello {
        version,
        random,
        session_id,
        cookie,
        cipher_suites,
        compression_methods,
        extensions,
    })
}

/// Encode a ServerHello body (without the handshake header).
pub fn encode_server_hello_body(sh: &ServerHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(80);
    body.extend_from_slice(&sh.version.to_be_bytes());
    body.extend_from_slice(&sh.random);
    body.push(sh.session_id.len() as u8);
    body.extend_from_slice(&sh.session_id);
    body.extend_from_slice(&sh.cipher_suite.0.to_be_bytes());
    body.push(sh.compression_method);
    if !sh.extensions.is_empty() {
        body.extend_from_slice(&(sh.extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&sh.extensions);
    }
    body
}

/// Decode a ServerHello body.
pub fn decode_server_hello(body: &[u8]) -> Result<ServerHello, ParserError> {
    let mut r = Reader::new(body);
    let version = ProtocolVersion(r.u16()?);
    let random = r.random()?;
    let session_id = r.vec_u8()?;
    if session_id.len() > 32 {
        return Err(ParserError::Malformed("session id longer than 32".into()));
    }
    let cipher_suite = CipherSuite(r.u16()?);
    let compression_method = r.u8()?;
    let extensions = if r.remaining() > 0 {
        r.vec_u16()?
    } else {
        Vec::new()
    };
    if r.remaining() != 0 {
        return Err(ParserError::Malformed(
            "trailing bytes after ServerHello".into(),
        ));
    }
    Ok(ServerHello {
        version,
        random,
        session_id,
        cipher_suite,
        compression_method,
        extensions,
    })
}

/// Decode a HelloVerifyRequest body.
pub fn decode_hello_verify_request(body: &[u8]) -> Result<HelloVerifyRequest, ParserError> {
    let mut r = Reader::new(body);
    let version = ProtocolVersion(r.u16()?);
    let cookie = r.vec_u8()?;
    Ok(HelloVerifyRequest { version, cookie })
}

/// Decode an ECDHE ServerKeyExchange body.
pub fn decode_ecdhe_server_key_exchange(
    body: &[u8],
) -> Result<EcdheServerKeyExchange, ParserError> {
    let mut r = Reader::new(body);
    let curve_type = r.u8()?;
    if curve_type != NAMED_CURVE {
        return Err(ParserError::Malformed(format!(
            "unsupported ECDH curve type {curve_type}"
        )));
    }
    let named_curve = r.u16()?;
    let public_key = r.vec_u8()?;
    if public_key.is_empty() {
        return Err(ParserError::Malformed("empty ECDH public key".into()));
    }
    let signature = r.take(r.remaining())?.to_vec();
    Ok(EcdheServerKeyExchange {
        named_curve,
        public_key,
        signature,
    })
}

/// Build a full ClientHello handshake message (header + body).
pub fn encode_client_hello(ch: &ClientHello) -> Vec<u8> {
    wrap_handshake(
        HandshakeType::ClientHello as u8,
        &encode_client_hello_body(ch),
    )
}
