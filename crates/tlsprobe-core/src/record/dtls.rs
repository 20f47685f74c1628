//! DTLS record layer (RFC 6347 §4.1).
//!
//! DTLS record header is 13 bytes:
//! `content_type(1) || version(2) || epoch(2) || sequence_number(6) || length(2)`

use super::{soft_parse, ContentType, Record, RecordKind, RecordLayer, MAX_CIPHERTEXT_LENGTH};
use crate::ProtocolVersion;
use tlsprobe_types::ParserError;

/// DTLS record header length: 13 bytes.
pub const DTLS_RECORD_HEADER_LEN: usize = 13;

/// Maximum 48-bit sequence number.
const MAX_SEQ_48: u64 = (1u64 << 48) - 1;

/// Parse a DTLS record from bytes.
///
/// Returns `(record, bytes_consumed)`.
pub fn parse_dtls_record(data: &[u8]) -> Result<(Record, usize), ParserError> {
    if data.len() < DTLS_RECORD_HEADER_LEN {
        return Err(ParserError::Truncated {
            offset: 0,
            need: DTLS_RECORD_HEADER_LEN,
            got: data.len(),
        });
    }

    let content_type = ContentType::from_u8(data[0]).map_err(ParserError::UnknownContentType)?;
    let version = ProtocolVersion::from_be_bytes([data[1], data[2]]);
    let epoch = u16::from_be_bytes([data[3], data[4]]);

    // 48-bit sequence number in bytes 5..11
    let mut seq_bytes = [0u8; 8];
    seq_bytes[2..8].copy_from_slice(&data[5..11]);
    let sequence_number = u64::from_be_bytes(seq_bytes);

    let length = u16::from_be_bytes([data[11], data[12]]) as usize;
    if length > MAX_CIPHERTEXT_LENGTH {
        return Err(ParserError::RecordTooLarge(length));
    }

    let total = DTLS_RECORD_HEADER_LEN + length;
    if data.len() < total {
        return Err(ParserError::Truncated {
            offset: DTLS_RECORD_HEADER_LEN,
            need: length,
            got: data.len() - DTLS_RECORD_HEADER_LEN,
        });
    }

    Ok((
        Record {
            kind: RecordKind::Dtls,
            content_type: Some(content_type),
            version,
            length,
            epoch: Some(epoch),
            sequence_number: Some(sequence_number),
            protocol_message_bytes: data[DTLS_RECORD_HEADER_LEN..total].to_vec(),
            ..Record::default()
        },
        total,
    ))
}

/// Serialize a DTLS record to bytes.
pub fn serialize_dtls_record(record: &Record) -> Vec<u8> {
    let body = &record.protocol_message_bytes;
    let mut buf = Vec::with_capacity(DTLS_RECORD_HEADER_LEN + body.len());

    buf.push(record.content_type.map(|c| c as u8).unwrap_or(0));
    buf.extend_from_slice(&record.version.to_be_bytes());
    buf.extend_from_slice(&record.epoch.unwrap_or(0).to_be_bytes());

    // 48-bit sequence number → 6 bytes
    let seq_bytes = record.sequence_number.unwrap_or(0).to_be_bytes();
    buf.extend_from_slice(&seq_bytes[2..8]);

    buf.extend_from_slice(&(body.len() as u16).to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Epoch and sequence number state for the DTLS write side.
///
/// Epoch increments when the cipher state changes (after CCS).
/// Sequence number is 48-bit and resets to 0 on epoch change.
#[derive(Debug, Default)]
pub struct EpochState {
    pub epoch: u16,
    pub write_seq: u64,
}

impl EpochState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the next epoch. Resets sequence number to 0.
    pub fn next_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.write_seq = 0;
    }

    /// Get the next write sequence number and increment.
    ///
    /// Wraps to 0 past the 48-bit limit; a probe must keep sending even
    /// where a conforming peer would refuse.
    pub fn next_write_seq(&mut self) -> u64 {
        let seq = self.write_seq;
        self.write_seq = if seq >= MAX_SEQ_48 { 0 } else { seq + 1 };
        seq
    }
}

/// Plaintext DTLS record layer.
pub struct DtlsRecordLayer {
    pub default_version: ProtocolVersion,
    epoch_state: EpochState,
}

impl DtlsRecordLayer {
    pub fn new(default_version: ProtocolVersion) -> Self {
        Self {
            default_version,
            epoch_state: EpochState::new(),
        }
    }

    /// Move the write side to the next epoch (called after sending CCS).
    pub fn next_epoch(&mut self) {
        self.epoch_state.next_epoch();
    }
}

impl Default for DtlsRecordLayer {
    fn default() -> Self {
        Self::new(ProtocolVersion::DTLS12)
    }
}

impl RecordLayer for DtlsRecordLayer {
    fn parse_records(&self, data: &[u8]) -> Result<Vec<Record>, ParserError> {
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let (record, consumed) = parse_dtls_record(&data[pos..])?;
            records.push(record);
            pos += consumed;
        }
        Ok(records)
    }

    fn parse_records_soft(&self, data: &[u8]) -> Vec<Record> {
        soft_parse(data, parse_dtls_record)
    }

    fn decrypt(&mut self, record: &mut Record) {
        record.clean_bytes = Some(record.protocol_message_bytes.clone());
    }

    fn encrypt(&mut self, record: &mut Record) {
        let clean = record.clean_bytes.clone().unwrap_or_default();
        let mut body = record.effective_payload(&clean);
        if let Some(mac) = &record.overrides.mac {
            body.extend_from_slice(mac);
        }
        if let Some(padding) = &record.overrides.padding {
            body.extend_from_slice(padding);
        }
        record.kind = RecordKind::Dtls;
        if let Some(ct) = record.overrides.content_type {
            record.content_type = Some(ct);
        }
        record.version = record.effective_version(self.default_version);
        record.epoch = Some(self.epoch_state.epoch);
        record.sequence_number = Some(self.epoch_state.next_write_seq());
        record.length = body.len();
        record.protocol_message_bytes = body;
        if record.content_type == Some(ContentType::ChangeCipherSpec) {
            self.next_epoch();
        }
    }

    fn serialize(&self, record: &Record) -> Vec<u8> {
        serialize_dtls_record(record)
    }

    fn is_datagram(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dtls_record_valid() {
        // Handshake, version=0xFEFD, epoch=0, seq=1, body="hello"
        let mut data = vec![
            22, // Handshake
            0xFE, 0xFD, // DTLS 1.2
            0x00, 0x00, // epoch=0
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // seq=1
            0x00, 0x05, // length=5
        ];
        data.extend_from_slice(b"hello");

        let (record, consumed) = parse_dtls_record(&data).unwrap();
        assert_eq!(record.kind, RecordKind::Dtls);
        assert_eq!(record.content_type, Some(ContentType::Handshake));
        assert_eq!(record.version, ProtocolVersion::DTLS12);
        assert_eq!(record.epoch, Some(0));
        assert_eq!(record.sequence_number, Some(1));
        assert_eq!(record.protocol_message_bytes, b"hello");
        assert_eq!(consumed, 18);
    }

    #[test]
    fn test_parse_dtls_record_too_short() {
        let data = vec![22, 0xFE, 0xFD, 0x00];
        assert!(parse_dtls_record(&data).is_err());
    }

    #[test]
    fn test_dtls_record_epoch_and_seq_encoding() {
        let record = Record {
            kind: RecordKind::Dtls,
            content_type: Some(ContentType::Handshake),
            version: ProtocolVersion::DTLS12,
            epoch: Some(0x0102),
            sequence_number: Some(0x030405060708),
            protocol_message_bytes: vec![0xAA],
            ..Record::default()
        };

        let bytes = serialize_dtls_record(&record);
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[3..5], &[0x01, 0x02]);
        assert_eq!(&bytes[5..11], &[0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[11..13], &[0x00, 0x01]);
        assert_eq!(bytes[13], 0xAA);
    }

    #[test]
    fn test_epoch_state_next_epoch_resets_seq() {
        let mut state = EpochState::new();
        state.write_seq = 100;
        state.next_epoch();
        assert_eq!(state.epoch, 1);
        assert_eq!(state.write_seq, 0);
    }

    #[test]
    fn test_epoch_state_seq_wraps() {
        let mut state = EpochState::new();
        state.write_seq = (1u64 << 48) - 1;
        assert_eq!(state.next_write_seq(), (1u64 << 48) - 1);
        assert_eq!(state.next_write_seq(), 0);
    }

    #[test]
    fn test_encrypt_assigns_sequence_and_bumps_epoch_after_ccs() {
        let mut layer = DtlsRecordLayer::default();

        let mut hs = Record::template();
        hs.content_type = Some(ContentType::Handshake);
        hs.clean_bytes = Some(vec![1, 2, 3]);
        layer.encrypt(&mut hs);
        assert_eq!(hs.epoch, Some(0));
        assert_eq!(hs.sequence_number, Some(0));

        let mut ccs = Record::template();
        ccs.content_type = Some(ContentType::ChangeCipherSpec);
        ccs.clean_bytes = Some(vec![1]);
        layer.encrypt(&mut ccs);
        assert_eq!(ccs.epoch, Some(0));
        assert_eq!(ccs.sequence_number, Some(1));

        let mut fin = Record::template();
        fin.content_type = Some(ContentType::Handshake);
        fin.clean_bytes = Some(vec![20]);
        layer.encrypt(&mut fin);
        assert_eq!(fin.epoch, Some(1));
        assert_eq!(fin.sequence_number, Some(0));

        let wire = layer.serialize(&fin);
        let records = layer.parse_records(&wire).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].epoch, Some(1));
    }

    #[test]
    fn test_soft_parse_keeps_prefix() {
        let layer = DtlsRecordLayer::default();
        let mut hs = Record::template();
        hs.content_type = Some(ContentType::Alert);
        hs.clean_bytes = Some(vec![2, 40]);
        let mut enc = DtlsRecordLayer::default();
        enc.encrypt(&mut hs);
        let mut wire = layer.serialize(&hs);
        wire.extend_from_slice(&[22, 0xFE]);
        assert!(layer.parse_records(&wire).is_err());
        let soft = layer.parse_records_soft(&wire);
        assert_eq!(soft.len(), 1);
        assert!(soft[0].is_alert());
    }
}
