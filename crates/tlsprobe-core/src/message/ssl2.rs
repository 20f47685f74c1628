//! SSLv2 SERVER-HELLO, the only SSLv2 message the probe needs to recognise.
//!
//! Layout: a 2-byte record header with the high bit set, then
//! `msg_type(1) || session_id_hit(1) || certificate_type(1) || version(2) ||
//! certificate_length(2) || cipher_specs_length(2) || connection_id_length(2)`
//! followed by the three variable fields.

use crate::ProtocolVersion;
use tlsprobe_types::ParserError;

const SSL2_SERVER_HELLO: u8 = 4;
const FIXED_LEN: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ssl2ServerHello {
    pub session_id_hit: u8,
    pub certificate_type: u8,
    pub version: ProtocolVersion,
    pub certificate: Vec<u8>,
    pub cipher_specs: Vec<u8>,
    pub connection_id: Vec<u8>,
}

impl Ssl2ServerHello {
    /// Parse a SERVER-HELLO. Returns the message and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParserError> {
        if data.len() < 2 + FIXED_LEN {
            return Err(ParserError::Truncated {
                offset: 0,
                need: 2 + FIXED_LEN,
                got: data.len(),
            });
        }
        if data[0] & 0x80 == 0 {
            return Err(ParserError::Malformed(
                "SSLv2 record header without the high bit".into(),
            ));
        }
        let record_len = (((data[0] & 0x7F) as usize) << 8) | data[1] as usize;
        let total = 2 + record_len;
        if data.len() < total {
            return Err(ParserError::Truncated {
                offset: 2,
                need: record_len,
                got: data.len() - 2,
            });
        }
        let body = &data[2..total];
        if body.len() < FIXED_LEN || body[0] != SSL2_SERVER_HELLO {
            return Err(ParserError::Malformed("not an SSLv2 SERVER-HELLO".into()));
        }

        let u16_at = |i: usize| u16::from_be_bytes([body[i], body[i + 1]]) as usize;
        let cert_len = u16_at(5);
        let specs_len = u16_at(7);
        let conn_id_len = u16_at(9);
        if FIXED_LEN + cert_len + specs_len + conn_id_len != body.len() {
            return Err(ParserError::Malformed(
                "SSLv2 SERVER-HELLO field lengths do not add up".into(),
            ));
        }

        let cert_end = FIXED_LEN + cert_len;
        let specs_end = cert_end + specs_len;
        Ok((
            Self {
                session_id_hit: body[1],
                certificate_type: body[2],
                version: ProtocolVersion::from_be_bytes([body[3], body[4]]),
                certificate: body[FIXED_LEN..cert_end].to_vec(),
                cipher_specs: body[cert_end..specs_end].to_vec(),
                connection_id: body[specs_end..].to_vec(),
            },
            total,
        ))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let body_len =
            FIXED_LEN + self.certificate.len() + self.cipher_specs.len() + self.connection_id.len();
        let mut out = Vec::with_capacity(2 + body_len);
        out.push(0x80 | ((body_len >> 8) as u8 & 0x7F));
        out.push(body_len as u8);
        out.push(SSL2_SERVER_HELLO);
        out.push(self.session_id_hit);
        out.push(self.certificate_type);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&(self.certificate.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.cipher_specs.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.connection_id.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.certificate);
        out.extend_from_slice(&self.cipher_specs);
        out.extend_from_slice(&self.connection_id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Ssl2ServerHello {
        Ssl2ServerHello {
            session_id_hit: 0,
            certificate_type: 1,
            version: ProtocolVersion::SSL2,
            certificate: vec![0x30, 0x82, 0x01],
            cipher_specs: vec![0x07, 0x00, 0xC0],
            connection_id: vec![0xAA; 16],
        }
    }

    #[test]
    fn test_ssl2_server_hello_roundtrip() {
        let hello = sample();
        let wire = hello.serialize();
        let (parsed, consumed) = Ssl2ServerHello::parse(&wire).unwrap();
        assert_eq!(parsed, hello);
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn test_ssl2_rejects_tls_record() {
        let tls = [22, 3, 3, 0, 20, 2, 0, 0, 16, 3, 3, 0, 0, 0, 0, 0];
        assert!(Ssl2ServerHello::parse(&tls).is_err());
    }

    #[test]
    fn test_ssl2_inconsistent_lengths() {
        let mut wire = sample().serialize();
        wire[8] = 0xFF;
        assert!(matches!(
            Ssl2ServerHello::parse(&wire),
            Err(ParserError::Malformed(_))
        ));
    }
}
