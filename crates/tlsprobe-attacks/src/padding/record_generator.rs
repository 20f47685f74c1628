//! Padding test records.
//!
//! Each generator type yields a fixed list of record templates for a given
//! suite. The templates carry their payload, MAC and padding as overrides, so
//! the record layer sends them as-is. Records built for one padding length
//! all have the same total length and therefore land in the same bucket.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tlsprobe_core::record::{Record, RecordOverrides};
use tlsprobe_core::{CipherSuite, ProtocolVersion};
use tlsprobe_types::ProbeError;

/// Which family of padding records to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum RecordGeneratorType {
    /// Records made of padding only, shorter than a MAC plus one block.
    /// Responses are not bucketed by length.
    VeryShort,
    #[default]
    Short,
    Medium,
    Long,
}

impl FromStr for RecordGeneratorType {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "very-short" | "veryshort" => Ok(RecordGeneratorType::VeryShort),
            "short" => Ok(RecordGeneratorType::Short),
            "medium" => Ok(RecordGeneratorType::Medium),
            "long" => Ok(RecordGeneratorType::Long),
            other => Err(ProbeError::Configuration(format!(
                "unknown record generator: {other}"
            ))),
        }
    }
}

impl fmt::Display for RecordGeneratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordGeneratorType::VeryShort => "very-short",
            RecordGeneratorType::Short => "short",
            RecordGeneratorType::Medium => "medium",
            RecordGeneratorType::Long => "long",
        })
    }
}

/// A named padding record template.
#[derive(Debug, Clone)]
pub struct PaddingVector {
    pub name: String,
    pub record: Record,
}

impl PaddingVector {
    fn new(
        name: String,
        version: ProtocolVersion,
        payload: Vec<u8>,
        mac: Vec<u8>,
        padding: Vec<u8>,
    ) -> Self {
        let record = Record::with_overrides(RecordOverrides {
            version: Some(version),
            payload: Some(payload),
            mac: if mac.is_empty() { None } else { Some(mac) },
            padding: Some(padding),
            ..RecordOverrides::default()
        });
        Self { name, record }
    }

    /// Body length the record will have on the wire.
    pub fn length(&self) -> usize {
        let o = &self.record.overrides;
        [&o.payload, &o.mac, &o.padding]
            .iter()
            .map(|v| v.as_ref().map_or(0, Vec::len))
            .sum()
    }
}

/// `padding + 1` bytes, each holding the value `padding`.
pub fn padding_bytes(padding: usize) -> Vec<u8> {
    vec![padding as u8; padding + 1]
}

#[derive(Debug, Clone, Copy)]
pub struct PaddingRecordGenerator {
    kind: RecordGeneratorType,
}

impl PaddingRecordGenerator {
    pub fn new(kind: RecordGeneratorType) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> RecordGeneratorType {
        self.kind
    }

    /// Padding test records for `suite`. Fails for suites without CBC.
    pub fn records(
        &self,
        suite: CipherSuite,
        version: ProtocolVersion,
    ) -> Result<Vec<PaddingVector>, ProbeError> {
        if !suite.is_cbc() {
            return Err(ProbeError::Configuration(format!(
                "cipher suite 0x{:04X} does not use CBC padding",
                suite.0
            )));
        }
        let mac_len = suite.mac_length();
        let block = suite.block_size();

        let records = match self.kind {
            RecordGeneratorType::VeryShort => very_short(block, version),
            RecordGeneratorType::Short => same_length_sets(&[block - 1], mac_len, block, version),
            RecordGeneratorType::Medium => {
                same_length_sets(&[block - 1, 5 * block - 1], mac_len, block, version)
            }
            RecordGeneratorType::Long => {
                same_length_sets(&[block - 1, 5 * block - 1, 255], mac_len, block, version)
            }
        };
        Ok(records)
    }
}

fn very_short(block: usize, version: ProtocolVersion) -> Vec<PaddingVector> {
    let mut out = Vec::new();
    for padding in [block - 1, 2 * block - 1] {
        let valid = padding_bytes(padding);
        let mut invalid = valid.clone();
        invalid[0] ^= 0x80;
        out.push(PaddingVector::new(
            format!("OnlyPadding-{padding}"),
            version,
            Vec::new(),
            Vec::new(),
            valid,
        ));
        out.push(PaddingVector::new(
            format!("OnlyInvalidPadding-{padding}"),
            version,
            Vec::new(),
            Vec::new(),
            invalid,
        ));
    }
    out.push(PaddingVector::new(
        "PlainOnly".to_string(),
        version,
        vec![0; block],
        Vec::new(),
        Vec::new(),
    ));
    out
}

fn same_length_sets(
    paddings: &[usize],
    mac_len: usize,
    block: usize,
    version: ProtocolVersion,
) -> Vec<PaddingVector> {
    paddings
        .iter()
        .flat_map(|&p| same_length_set(p, mac_len, block, version))
        .collect()
}

/// Records of one total length that differ only in MAC and padding validity.
fn same_length_set(
    padding: usize,
    mac_len: usize,
    block: usize,
    version: ProtocolVersion,
) -> Vec<PaddingVector> {
    let plain_len = (block - (mac_len + padding + 1) % block) % block;
    let plain = vec![0u8; plain_len];
    let mac = vec![0u8; mac_len];
    let valid = padding_bytes(padding);
    let mut out = Vec::with_capacity(5);

    out.push(PaddingVector::new(
        format!("InvalidMac-ValidPadding-{padding}"),
        version,
        plain.clone(),
        mac.clone(),
        valid.clone(),
    ));
    if padding > 0 {
        let mut first = valid.clone();
        first[0] ^= 0x80;
        out.push(PaddingVector::new(
            format!("InvalidPadding-FirstByte-{padding}"),
            version,
            plain.clone(),
            mac.clone(),
            first,
        ));
    }
    if padding >= 2 {
        let mut middle = valid.clone();
        middle[padding / 2] ^= 0x01;
        out.push(PaddingVector::new(
            format!("InvalidPadding-MiddleByte-{padding}"),
            version,
            plain.clone(),
            mac.clone(),
            middle,
        ));
    }
    let mut length_byte = valid.clone();
    length_byte[padding] = length_byte[padding].wrapping_add(1);
    out.push(PaddingVector::new(
        format!("InvalidPadding-LengthByte-{padding}"),
        version,
        plain.clone(),
        mac,
        length_byte,
    ));

    let mut no_mac_plain = plain;
    no_mac_plain.resize(plain_len + mac_len, 0);
    out.push(PaddingVector::new(
        format!("MissingMac-ValidPadding-{padding}"),
        version,
        no_mac_plain,
        Vec::new(),
        valid,
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: CipherSuite = CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA;

    #[test]
    fn test_padding_bytes() {
        assert_eq!(padding_bytes(0), vec![0]);
        assert_eq!(padding_bytes(3), vec![3, 3, 3, 3]);
        assert_eq!(padding_bytes(255).len(), 256);
    }

    #[test]
    fn test_short_records_share_one_length() {
        let gen = PaddingRecordGenerator::new(RecordGeneratorType::Short);
        let records = gen.records(SHA, ProtocolVersion::TLS12).unwrap();
        assert_eq!(records.len(), 5);
        for r in &records {
            assert_eq!(r.length(), 48, "{}", r.name);
            assert_eq!(r.length() % 16, 0);
        }
    }

    #[test]
    fn test_long_records_per_padding_length() {
        let gen = PaddingRecordGenerator::new(RecordGeneratorType::Long);
        let records = gen.records(SHA, ProtocolVersion::TLS12).unwrap();
        let mut lengths: Vec<usize> = records.iter().map(PaddingVector::length).collect();
        lengths.dedup();
        assert_eq!(lengths.len(), 3);
        assert!(lengths.iter().all(|l| l % 16 == 0));
        assert!(records.iter().any(|r| r.name == "InvalidMac-ValidPadding-255"));
    }

    #[test]
    fn test_triple_des_block_size() {
        let gen = PaddingRecordGenerator::new(RecordGeneratorType::Medium);
        let records = gen
            .records(CipherSuite::TLS_RSA_WITH_3DES_EDE_CBC_SHA, ProtocolVersion::TLS10)
            .unwrap();
        assert!(records.iter().all(|r| r.length() % 8 == 0));
        assert!(records
            .iter()
            .all(|r| r.record.overrides.version == Some(ProtocolVersion::TLS10)));
    }

    #[test]
    fn test_very_short_has_no_mac() {
        let gen = PaddingRecordGenerator::new(RecordGeneratorType::VeryShort);
        let records = gen.records(SHA, ProtocolVersion::TLS12).unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.record.overrides.mac.is_none()));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let gen = PaddingRecordGenerator::new(RecordGeneratorType::Medium);
        let a = gen.records(SHA, ProtocolVersion::TLS12).unwrap();
        let b = gen.records(SHA, ProtocolVersion::TLS12).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.name, y.name);
            assert_eq!(x.record.overrides, y.record.overrides);
        }
    }

    #[test]
    fn test_aead_suite_rejected() {
        let gen = PaddingRecordGenerator::new(RecordGeneratorType::Short);
        let err = gen
            .records(CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256, ProtocolVersion::TLS12)
            .unwrap_err();
        assert!(matches!(err, ProbeError::Configuration(_)));
    }

    #[test]
    fn test_generator_type_parsing() {
        assert_eq!(
            "very-short".parse::<RecordGeneratorType>().unwrap(),
            RecordGeneratorType::VeryShort
        );
        assert_eq!("LONG".parse::<RecordGeneratorType>().unwrap(), RecordGeneratorType::Long);
        assert!("huge".parse::<RecordGeneratorType>().is_err());
        assert_eq!(RecordGeneratorType::Medium.to_string(), "medium");
    }
}
