//! DTLS handshake message fragmentation and reassembly (RFC 6347 §4.2.3).
//!
//! Outgoing messages are split into fragments that each carry their own
//! 12-byte header. Incoming fragments are collected per `message_seq` and,
//! once a message is complete, re-framed with the 4-byte TLS handshake header
//! so that the regular message dispatcher can parse it.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::codec::wrap_handshake;
use super::codec_dtls::{wrap_dtls_handshake, DtlsHandshakeHeader};
use tlsprobe_types::ParserError;

/// Default DTLS MTU (conservative for UDP over IPv4/IPv6).
pub const DEFAULT_MTU: usize = 1200;

/// Fragment a handshake message body into DTLS handshake fragments of at
/// most `max_fragment_payload` body bytes.
///
/// A message that fits, including an empty one, yields a single fragment.
pub fn fragment_handshake(
    msg_type: u8,
    body: &[u8],
    message_seq: u16,
    max_fragment_payload: usize,
) -> Vec<Vec<u8>> {
    if body.len() <= max_fragment_payload || max_fragment_payload == 0 {
        return vec![wrap_dtls_handshake(
            msg_type,
            body.len(),
            message_seq,
            0,
            body,
        )];
    }

    body.chunks(max_fragment_payload)
        .enumerate()
        .map(|(i, chunk)| {
            wrap_dtls_handshake(
                msg_type,
                body.len(),
                message_seq,
                i * max_fragment_payload,
                chunk,
            )
        })
        .collect()
}

/// Tracks reassembly state for a single handshake message.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    msg_type: u8,
    total_length: usize,
    buffer: Vec<u8>,
    received: Vec<bool>,
    /// A fragment with offset 0 has been seen.
    started: bool,
}

impl ReassemblyBuffer {
    /// Create a new reassembly buffer for a message of known total length.
    pub fn new(msg_type: u8, total_length: usize) -> Self {
        Self {
            msg_type,
            total_length,
            buffer: vec![0u8; total_length],
            received: vec![false; total_length],
            started: false,
        }
    }

    /// Insert a fragment. Returns `true` if the message is now complete.
    pub fn insert_fragment(&mut self, offset: usize, data: &[u8]) -> Result<bool, ParserError> {
        if offset + data.len() > self.total_length {
            return Err(ParserError::Malformed(
                "fragment exceeds total message length".into(),
            ));
        }
        if offset == 0 {
            self.started = true;
        }
        self.buffer[offset..offset + data.len()].copy_from_slice(data);
        for flag in &mut self.received[offset..offset + data.len()] {
            *flag = true;
        }
        Ok(self.is_complete())
    }

    /// Check if all bytes have been received, starting from offset zero.
    pub fn is_complete(&self) -> bool {
        self.started && self.received.iter().all(|&r| r)
    }

    /// The reassembled message framed with the TLS handshake header.
    pub fn tls_message(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        Some(wrap_handshake(self.msg_type, &self.buffer))
    }
}

/// Manages reassembly for all handshake messages seen in one receive.
#[derive(Debug, Default)]
pub struct ReassemblyManager {
    buffers: BTreeMap<u16, ReassemblyBuffer>,
}

impl ReassemblyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one fragment to the buffer for its `message_seq`.
    ///
    /// A fragment whose header disagrees with the buffer already open for
    /// that sequence number starts a fresh buffer (retransmission with new
    /// content).
    pub fn process_fragment(
        &mut self,
        header: &DtlsHandshakeHeader,
        fragment_body: &[u8],
    ) -> Result<(), ParserError> {
        let conflicting = self
            .buffers
            .get(&header.message_seq)
            .map(|b| b.msg_type != header.msg_type || b.total_length != header.length)
            .unwrap_or(false);
        if conflicting {
            debug!(
                message_seq = header.message_seq,
                "conflicting fragment header, restarting reassembly"
            );
            self.buffers.remove(&header.message_seq);
        }
        let buf = self
            .buffers
            .entry(header.message_seq)
            .or_insert_with(|| ReassemblyBuffer::new(header.msg_type, header.length));
        buf.insert_fragment(header.fragment_offset, fragment_body)?;
        Ok(())
    }

    /// Remove and return every complete message, in `message_seq` order, as
    /// TLS-framed handshake bytes.
    pub fn take_complete(&mut self) -> Vec<(u16, Vec<u8>)> {
        let complete: Vec<u16> = self
            .buffers
            .iter()
            .filter(|(_, b)| b.is_complete())
            .map(|(seq, _)| *seq)
            .collect();
        let mut out = Vec::with_capacity(complete.len());
        for seq in complete {
            if let Some(msg) = self.buffers.remove(&seq).and_then(|b| b.tls_message()) {
                out.push((seq, msg));
            }
        }
        out
    }

    /// Number of messages still missing fragments.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    /// Drop incomplete messages.
    pub fn reset(&mut self) {
        if !self.buffers.is_empty() {
            warn!(
                incomplete = self.buffers.len(),
                "dropping incomplete DTLS handshake messages"
            );
        }
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::codec::parse_handshake_header;
    use crate::handshake::codec_dtls::parse_dtls_handshake_header;

    fn feed(mgr: &mut ReassemblyManager, frag: &[u8]) {
        let (hdr, body, _) = parse_dtls_handshake_header(frag).unwrap();
        mgr.process_fragment(&hdr, body).unwrap();
    }

    #[test]
    fn test_fragment_small_message_no_split() {
        let body = b"small msg";
        let fragments = fragment_handshake(20, body, 5, 1000);
        assert_eq!(fragments.len(), 1);

        let (hdr, data, _) = parse_dtls_handshake_header(&fragments[0]).unwrap();
        assert_eq!(hdr.msg_type, 20);
        assert_eq!(hdr.message_seq, 5);
        assert_eq!(hdr.fragment_offset, 0);
        assert_eq!(hdr.fragment_length, body.len());
        assert_eq!(hdr.length, body.len());
        assert_eq!(data, body);
    }

    #[test]
    fn test_fragment_exact_boundary() {
        let body = vec![0xBB; 100];
        assert_eq!(fragment_handshake(20, &body, 0, 100).len(), 1);
        assert_eq!(fragment_handshake(20, &body, 0, 50).len(), 2);
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let body: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let mut fragments = fragment_handshake(11, &body, 2, 1000);
        fragments.reverse();

        let mut mgr = ReassemblyManager::new();
        feed(&mut mgr, &fragments[0]);
        feed(&mut mgr, &fragments[1]);
        assert!(mgr.take_complete().is_empty());
        assert_eq!(mgr.pending(), 1);
        feed(&mut mgr, &fragments[2]);

        let done = mgr.take_complete();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, 2);
        let (ty, reassembled, _) = parse_handshake_header(&done[0].1).unwrap();
        assert_eq!(ty, 11);
        assert_eq!(reassembled, &body[..]);
        assert_eq!(mgr.pending(), 0);
    }

    #[test]
    fn test_missing_start_fragment_is_incomplete() {
        let body = vec![0x11; 20];
        let fragments = fragment_handshake(2, &body, 0, 10);
        let mut mgr = ReassemblyManager::new();
        feed(&mut mgr, &fragments[1]);
        assert!(mgr.take_complete().is_empty());
        mgr.reset();
        assert_eq!(mgr.pending(), 0);
    }

    #[test]
    fn test_empty_message_completes() {
        let fragments = fragment_handshake(14, &[], 4, 100);
        let mut mgr = ReassemblyManager::new();
        feed(&mut mgr, &fragments[0]);
        let done = mgr.take_complete();
        assert_eq!(done, vec![(4, vec![14, 0, 0, 0])]);
    }

    #[test]
    fn test_complete_messages_in_sequence_order() {
        let mut mgr = ReassemblyManager::new();
        feed(&mut mgr, &fragment_handshake(14, &[], 3, 100)[0]);
        feed(&mut mgr, &fragment_handshake(2, &[1, 2], 1, 100)[0]);
        let seqs: Vec<u16> = mgr.take_complete().into_iter().map(|(s, _)| s).collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[test]
    fn test_duplicate_fragment_is_harmless() {
        let fragments = fragment_handshake(2, &[7; 30], 0, 10);
        let mut mgr = ReassemblyManager::new();
        for frag in fragments.iter().chain(fragments.iter()) {
            feed(&mut mgr, frag);
        }
        assert_eq!(mgr.take_complete().len(), 1);
    }
}
