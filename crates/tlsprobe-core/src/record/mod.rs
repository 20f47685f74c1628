//! Record layer: record model, parsing, soft parsing and serialization.
//!
//! The record layer is the seam to the cryptographic collaborator. The core
//! only needs parse / soft-parse / decrypt / encrypt / serialize over opaque
//! records; the layers provided here run in plaintext mode.

pub mod dtls;

use serde::Serialize;
use tracing::{debug, warn};

use crate::ProtocolVersion;
use tlsprobe_types::ParserError;

/// TLS record header length: 5 bytes.
pub const RECORD_HEADER_LEN: usize = 5;

/// Maximum plaintext fragment length (2^14).
pub const MAX_PLAINTEXT_LENGTH: usize = 16384;

/// Largest record body accepted from the wire (ciphertext expansion included).
pub const MAX_CIPHERTEXT_LENGTH: usize = MAX_PLAINTEXT_LENGTH + 2048;

/// Alert records at most this long are presumed to be unencrypted.
pub const PLAINTEXT_ALERT_RECORD_MAX: usize = 6;

/// Record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
    Heartbeat = 24,
}

impl ContentType {
    /// Convert from u8 to ContentType.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            24 => Ok(ContentType::Heartbeat),
            _ => Err(v),
        }
    }
}

/// Record class identity, compared by the equality oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum RecordKind {
    #[default]
    Tls,
    Dtls,
    /// Bytes that could not be framed as a record.
    Blob,
}

/// Send-side overrides applied on top of computed record values.
///
/// Each field is either unset (use the computed value) or an explicit
/// replacement. `mac` and `padding` are consumed by [`RecordLayer::encrypt`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOverrides {
    pub content_type: Option<ContentType>,
    pub version: Option<ProtocolVersion>,
    pub payload: Option<Vec<u8>>,
    pub mac: Option<Vec<u8>>,
    pub padding: Option<Vec<u8>>,
}

/// A record, either observed on the wire or prepared for sending.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub kind: RecordKind,
    /// `None` only for blob records (no framing could be recognised).
    pub content_type: Option<ContentType>,
    pub version: ProtocolVersion,
    /// Length field as seen on the wire.
    pub length: usize,
    /// DTLS epoch and 48-bit sequence number.
    pub epoch: Option<u16>,
    pub sequence_number: Option<u64>,
    /// Record body as transported (ciphertext when encryption is active).
    pub protocol_message_bytes: Vec<u8>,
    /// Decrypted, unpadded, un-MACed body. Set by [`RecordLayer::decrypt`].
    pub clean_bytes: Option<Vec<u8>>,
    pub overrides: RecordOverrides,
}

impl Record {
    /// An empty record template whose values are all computed at send time.
    pub fn template() -> Self {
        Self::default()
    }

    /// A record template carrying explicit overrides.
    pub fn with_overrides(overrides: RecordOverrides) -> Self {
        Self {
            overrides,
            ..Self::default()
        }
    }

    /// Content type to put on the wire: the override if set, else `computed`.
    pub fn effective_content_type(&self, computed: ContentType) -> ContentType {
        self.overrides.content_type.unwrap_or(computed)
    }

    /// Protocol version to put on the wire: the override if set, else `computed`.
    pub fn effective_version(&self, computed: ProtocolVersion) -> ProtocolVersion {
        self.overrides.version.unwrap_or(computed)
    }

    /// Payload to protect: the override if set, else `computed`.
    pub fn effective_payload(&self, computed: &[u8]) -> Vec<u8> {
        match &self.overrides.payload {
            Some(p) => p.clone(),
            None => computed.to_vec(),
        }
    }

    pub fn is_alert(&self) -> bool {
        self.content_type == Some(ContentType::Alert)
    }

    /// Clean bytes if the record was decrypted, otherwise the raw body.
    pub fn clean_or_raw(&self) -> &[u8] {
        self.clean_bytes
            .as_deref()
            .unwrap_or(&self.protocol_message_bytes)
    }

    /// Clear everything observed or computed at runtime, keeping overrides.
    pub fn reset(&mut self) {
        let overrides = std::mem::take(&mut self.overrides);
        *self = Self::with_overrides(overrides);
    }
}

/// Capability interface of the record layer collaborator.
pub trait RecordLayer: Send {
    /// Parse `data` into records. Fails if any byte cannot be framed.
    fn parse_records(&self, data: &[u8]) -> Result<Vec<Record>, ParserError>;

    /// Best-effort parse that never fails.
    fn parse_records_soft(&self, data: &[u8]) -> Vec<Record>;

    /// Decrypt a received record in place, filling `clean_bytes`.
    fn decrypt(&mut self, record: &mut Record);

    /// Protect a record prepared for sending, filling the wire fields from
    /// `clean_bytes` and the overrides.
    fn encrypt(&mut self, record: &mut Record);

    /// Serialize a prepared record to wire bytes.
    fn serialize(&self, record: &Record) -> Vec<u8>;

    /// Whether records travel over a datagram transport (DTLS framing).
    fn is_datagram(&self) -> bool {
        false
    }
}

/// Shared soft-parse strategy over a single-record parser.
///
/// Keeps every well-formed record from the start of `data` and drops the
/// remainder. If not a single record can be framed, the whole buffer becomes
/// one blob record so that the message layer can still look at it.
pub(crate) fn soft_parse<F>(data: &[u8], parse_one: F) -> Vec<Record>
where
    F: Fn(&[u8]) -> Result<(Record, usize), ParserError>,
{
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        match parse_one(&data[pos..]) {
            Ok((record, consumed)) => {
                records.push(record);
                pos += consumed;
            }
            Err(e) => {
                debug!(offset = pos, error = %e, "soft record parse stopped");
                break;
            }
        }
    }
    if records.is_empty() && !data.is_empty() {
        return vec![Record {
            kind: RecordKind::Blob,
            length: data.len(),
            protocol_message_bytes: data.to_vec(),
            ..Record::default()
        }];
    }
    if pos < data.len() {
        warn!(
            discarded = data.len() - pos,
            "discarding bytes that do not form a record"
        );
    }
    records
}

/// Plaintext TLS record layer.
pub struct PlainRecordLayer {
    /// Maximum accepted record body length.
    pub max_record_length: usize,
    /// Version written on records without a version override.
    pub default_version: ProtocolVersion,
}

impl PlainRecordLayer {
    pub fn new(default_version: ProtocolVersion) -> Self {
        Self {
            max_record_length: MAX_CIPHERTEXT_LENGTH,
            default_version,
        }
    }

    /// Parse a single TLS record from the start of `data`.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn parse_record(&self, data: &[u8]) -> Result<(Record, usize), ParserError> {
        if data.len() < RECORD_HEADER_LEN {
            return Err(ParserError::Truncated {
                offset: 0,
                need: RECORD_HEADER_LEN,
                got: data.len(),
            });
        }

        let content_type =
            ContentType::from_u8(data[0]).map_err(ParserError::UnknownContentType)?;
        let version = ProtocolVersion::from_be_bytes([data[1], data[2]]);
        let length = u16::from_be_bytes([data[3], data[4]]) as usize;

        if length > self.max_record_length {
            return Err(ParserError::RecordTooLarge(length));
        }
        if data.len() < RECORD_HEADER_LEN + length {
            return Err(ParserError::Truncated {
                offset: RECORD_HEADER_LEN,
                need: length,
                got: data.len() - RECORD_HEADER_LEN,
            });
        }

        let body = data[RECORD_HEADER_LEN..RECORD_HEADER_LEN + length].to_vec();
        Ok((
            Record {
                kind: RecordKind::Tls,
                content_type: Some(content_type),
                version,
                length,
                protocol_message_bytes: body,
                ..Record::default()
            },
            RECORD_HEADER_LEN + length,
        ))
    }
}

impl Default for PlainRecordLayer {
    fn default() -> Self {
        Self::new(ProtocolVersion::TLS12)
    }
}

impl RecordLayer for PlainRecordLayer {
    fn parse_records(&self, data: &[u8]) -> Result<Vec<Record>, ParserError> {
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let (record, consumed) = self.parse_record(&data[pos..]).map_err(|e| match e {
                ParserError::Truncated { offset, need, got } => ParserError::Truncated {
                    offset: pos + offset,
                    need,
                    got,
                },
                other => other,
            })?;
            records.push(record);
            pos += consumed;
        }
        Ok(records)
    }

    fn parse_records_soft(&self, data: &[u8]) -> Vec<Record> {
        soft_parse(data, |d| self.parse_record(d))
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
        record.kind = RecordKind::Tls;
        if let Some(ct) = record.overrides.content_type {
            record.content_type = Some(ct);
        }
        record.version = record.effective_version(self.default_version);
        record.length = body.len();
        record.protocol_message_bytes = body;
    }

    fn serialize(&self, record: &Record) -> Vec<u8> {
        let ct = record.content_type.map(|c| c as u8).unwrap_or(0);
        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + record.protocol_message_bytes.len());
        buf.push(ct);
        buf.extend_from_slice(&record.version.to_be_bytes());
        buf.extend_from_slice(&(record.protocol_message_bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(&record.protocol_message_bytes);
        buf
    }
}

/// Contiguous records sharing one content type.
#[derive(Debug)]
pub struct RecordGroup<'a> {
    pub records: &'a mut [Record],
}

impl RecordGroup<'_> {
    /// Content type of the group, taken from its first record.
    ///
    /// A group whose records disagree is logged; the first type still wins.
    pub fn content_type(&self) -> Option<ContentType> {
        let first = self.records.first().and_then(|r| r.content_type);
        if self.records.iter().any(|r| r.content_type != first) {
            warn!("mixed record group detected");
        }
        first
    }

    /// Concatenated clean bytes of all records in the group.
    pub fn clean_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for record in self.records.iter() {
            out.extend_from_slice(record.clean_or_raw());
        }
        out
    }
}

/// Split records into maximal runs of equal content type.
pub fn group_records(records: &mut [Record]) -> Vec<RecordGroup<'_>> {
    let mut groups = Vec::new();
    let mut rest = records;
    while !rest.is_empty() {
        let ct = rest[0].content_type;
        let run = rest.iter().take_while(|r| r.content_type == ct).count();
        let (head, tail) = rest.split_at_mut(run);
        groups.push(RecordGroup { records: head });
        rest = tail;
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(ct: u8, body: &[u8]) -> Vec<u8> {
        let mut v = vec![ct, 0x03, 0x03];
        v.extend_from_slice(&(body.len() as u16).to_be_bytes());
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn test_content_type_from_u8() {
        assert_eq!(ContentType::from_u8(21).unwrap(), ContentType::Alert);
        assert_eq!(ContentType::from_u8(24).unwrap(), ContentType::Heartbeat);
        assert_eq!(ContentType::from_u8(19).unwrap_err(), 19);
        assert_eq!(ContentType::from_u8(255).unwrap_err(), 255);
    }

    #[test]
    fn test_parse_record_valid() {
        let layer = PlainRecordLayer::default();
        let data = record_bytes(22, b"hello");
        let (record, consumed) = layer.parse_record(&data).unwrap();
        assert_eq!(consumed, 10);
        assert_eq!(record.content_type, Some(ContentType::Handshake));
        assert_eq!(record.version, ProtocolVersion::TLS12);
        assert_eq!(record.length, 5);
        assert_eq!(record.protocol_message_bytes, b"hello");
        assert!(record.clean_bytes.is_none());
    }

    #[test]
    fn test_parse_record_incomplete_header() {
        let layer = PlainRecordLayer::default();
        assert!(matches!(
            layer.parse_record(&[22, 3, 3]),
            Err(ParserError::Truncated { .. })
        ));
    }

    #[test]
    fn test_parse_record_unknown_content_type() {
        let layer = PlainRecordLayer::default();
        let data = record_bytes(99, b"x");
        assert_eq!(
            layer.parse_record(&data).unwrap_err(),
            ParserError::UnknownContentType(99)
        );
    }

    #[test]
    fn test_parse_records_multiple() {
        let layer = PlainRecordLayer::default();
        let mut data = record_bytes(22, b"abc");
        data.extend(record_bytes(21, &[2, 40]));
        let records = layer.parse_records(&data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].content_type, Some(ContentType::Alert));
    }

    #[test]
    fn test_parse_records_truncated_tail_fails() {
        let layer = PlainRecordLayer::default();
        let mut data = record_bytes(22, b"abc");
        data.extend_from_slice(&[21, 3, 3, 0, 2, 2]);
        let err = layer.parse_records(&data).unwrap_err();
        assert!(matches!(err, ParserError::Truncated { offset: 13, .. }));
    }

    #[test]
    fn test_soft_parse_discards_remainder() {
        let layer = PlainRecordLayer::default();
        let mut data = record_bytes(22, b"abc");
        data.extend_from_slice(&[21, 3, 3, 0, 2, 2]);
        let records = layer.parse_records_soft(&data);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].protocol_message_bytes, b"abc");
    }

    #[test]
    fn test_soft_parse_garbage_becomes_blob() {
        let layer = PlainRecordLayer::default();
        let records = layer.parse_records_soft(&[0x80, 0x2E, 0x04, 0x00]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, RecordKind::Blob);
        assert_eq!(records[0].content_type, None);
        assert_eq!(records[0].length, 4);
    }

    #[test]
    fn test_soft_parse_empty() {
        let layer = PlainRecordLayer::default();
        assert!(layer.parse_records_soft(&[]).is_empty());
    }

    #[test]
    fn test_encrypt_applies_overrides() {
        let mut layer = PlainRecordLayer::default();
        let mut record = Record::with_overrides(RecordOverrides {
            content_type: Some(ContentType::ApplicationData),
            version: Some(ProtocolVersion::TLS10),
            payload: None,
            mac: Some(vec![0xAA; 4]),
            padding: Some(vec![0x01, 0x01]),
        });
        record.clean_bytes = Some(b"GET".to_vec());
        layer.encrypt(&mut record);
        assert_eq!(record.content_type, Some(ContentType::ApplicationData));
        assert_eq!(record.version, ProtocolVersion::TLS10);
        assert_eq!(record.length, 9);
        assert_eq!(
            record.protocol_message_bytes,
            [b'G', b'E', b'T', 0xAA, 0xAA, 0xAA, 0xAA, 0x01, 0x01]
        );

        let wire = layer.serialize(&record);
        assert_eq!(&wire[..5], &[23, 0x03, 0x01, 0x00, 0x09]);
        let (parsed, _) = layer.parse_record(&wire).unwrap();
        assert_eq!(parsed.protocol_message_bytes, record.protocol_message_bytes);
    }

    #[test]
    fn test_decrypt_plaintext_sets_clean_bytes() {
        let mut layer = PlainRecordLayer::default();
        let (mut record, _) = layer.parse_record(&record_bytes(21, &[2, 20])).unwrap();
        layer.decrypt(&mut record);
        assert_eq!(record.clean_bytes.as_deref(), Some(&[2u8, 20][..]));
    }

    #[test]
    fn test_record_reset_keeps_overrides() {
        let mut record = Record::with_overrides(RecordOverrides {
            padding: Some(vec![0; 3]),
            ..RecordOverrides::default()
        });
        record.length = 40;
        record.protocol_message_bytes = vec![1; 40];
        record.clean_bytes = Some(vec![1]);
        record.reset();
        assert_eq!(record.length, 0);
        assert!(record.protocol_message_bytes.is_empty());
        assert!(record.clean_bytes.is_none());
        assert_eq!(record.overrides.padding, Some(vec![0; 3]));
    }

    #[test]
    fn test_group_records_by_content_type() {
        let layer = PlainRecordLayer::default();
        let mut data = record_bytes(22, b"a");
        data.extend(record_bytes(22, b"b"));
        data.extend(record_bytes(20, &[1]));
        data.extend(record_bytes(22, b"c"));
        let mut records = layer.parse_records(&data).unwrap();
        let groups = group_records(&mut records);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].records.len(), 2);
        assert_eq!(groups[0].content_type(), Some(ContentType::Handshake));
        assert_eq!(groups[0].clean_bytes(), b"ab");
        assert_eq!(groups[1].content_type(), Some(ContentType::ChangeCipherSpec));
        assert_eq!(groups[2].records.len(), 1);
    }

    #[test]
    fn test_group_records_empty() {
        let mut records: Vec<Record> = Vec::new();
        assert!(group_records(&mut records).is_empty());
    }
}
