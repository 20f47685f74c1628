//! DTLS handshake header codec (RFC 6347 §4.2.2).
//!
//! DTLS handshake header is 12 bytes:
//! `type(1) || length(3) || message_seq(2) || fragment_offset(3) || fragment_length(3)`

use super::codec::{push_u24, read_u24};
use tlsprobe_types::ParserError;

/// DTLS handshake header length: 12 bytes.
pub const DTLS_HS_HEADER_LEN: usize = 12;

/// A parsed DTLS handshake header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtlsHandshakeHeader {
    /// Raw handshake type byte; unknown types are still reassembled.
    pub msg_type: u8,
    /// Total message length (24-bit).
    pub length: usize,
    pub message_seq: u16,
    /// Fragment offset (24-bit).
    pub fragment_offset: usize,
    /// Fragment length (24-bit).
    pub fragment_length: usize,
}

/// Parse a DTLS handshake header (12 bytes).
///
/// Returns `(header, fragment_body, total_bytes_consumed)`.
pub fn parse_dtls_handshake_header(
    data: &[u8],
) -> Result<(DtlsHandshakeHeader, &[u8], usize), ParserError> {
    if data.len() < DTLS_HS_HEADER_LEN {
        return Err(ParserError::Truncated {
            offset: 0,
            need: DTLS_HS_HEADER_LEN,
            got: data.len(),
        });
    }

    let header = DtlsHandshakeHeader {
        msg_type: data[0],
        length: read_u24(&data[1..4]),
        message_seq: u16::from_be_bytes([data[4], data[5]]),
        fragment_offset: read_u24(&data[6..9]),
        fragment_length: read_u24(&data[9..12]),
    };

    let total = DTLS_HS_HEADER_LEN + header.fragment_length;
    if data.len() < total {
        return Err(ParserError::Truncated {
            offset: DTLS_HS_HEADER_LEN,
            need: header.fragment_length,
            got: data.len() - DTLS_HS_HEADER_LEN,
        });
    }
    if header.fragment_offset + header.fragment_length > header.length {
        return Err(ParserError::Malformed(format!(
            "fragment {}+{} exceeds message length {}",
            header.fragment_offset, header.fragment_length, header.length
        )));
    }

    Ok((header, &data[DTLS_HS_HEADER_LEN..total], total))
}

/// Build one DTLS handshake fragment (12-byte header + fragment body).
pub fn wrap_dtls_handshake(
    msg_type: u8,
    total_length: usize,
    message_seq: u16,
    fragment_offset: usize,
    fragment: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(DTLS_HS_HEADER_LEN + fragment.len());
    out.push(msg_type);
    push_u24(&mut out, total_length);
    out.extend_from_slice(&message_seq.to_be_bytes());
    push_u24(&mut out, fragment_offset);
    push_u24(&mut out, fragment.len());
    out.extend_from_slice(fragment);
    out
}
