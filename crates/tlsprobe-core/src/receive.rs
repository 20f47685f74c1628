//! Receive orchestrator.
//!
//! Pulls bytes from the transport, frames them into records, decrypts them
//! and hands each group of same-type records to the message dispatcher.
//! Malformed input and transport failures are recorded, never raised.

use tracing::{debug, warn};

use crate::context::TlsContext;
use crate::handshake::fragment::ReassemblyManager;
use crate::message::{MessageKind, ProtocolMessage};
use crate::parser::parse_messages;
use crate::record::{group_records, ContentType, Record, RecordGroup};

/// Records and messages observed by one receive.
#[derive(Debug, Clone, Default)]
pub struct MessageActionResult {
    pub records: Vec<Record>,
    pub messages: Vec<ProtocolMessage>,
}

impl MessageActionResult {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.messages.is_empty()
    }

    pub fn merge(&mut self, other: MessageActionResult) {
        self.records.extend(other.records);
        self.messages.extend(other.messages);
    }
}

/// Whether the received messages satisfy the expected sequence.
///
/// Every expected class must appear at the same index. Without early stop
/// the counts must also match exactly.
pub fn received_all_expected(
    expected: &[MessageKind],
    received: &[ProtocolMessage],
    early_stop: bool,
) -> bool {
    if received.len() < expected.len() {
        return false;
    }
    if !early_stop && received.len() != expected.len() {
        return false;
    }
    expected
        .iter()
        .zip(received)
        .all(|(kind, message)| *kind == message.kind())
}

/// Whether another fetch is worthwhile under quick-receive.
fn should_continue(
    context: &TlsContext,
    expected: &[MessageKind],
    received: &[ProtocolMessage],
) -> bool {
    if received.iter().any(ProtocolMessage::is_fatal_alert) {
        return false;
    }
    if context.config.quick_receive && !expected.is_empty() {
        return !received_all_expected(expected, received, context.config.early_stop);
    }
    true
}

/// Receive until the peer goes quiet, the expected messages are in, or a
/// fatal alert arrives.
pub fn receive_messages(context: &mut TlsContext, expected: &[MessageKind]) -> MessageActionResult {
    context.talking_connection_end = context.connection_end.peer();
    let mut result = MessageActionResult::default();
    let mut reassembly = ReassemblyManager::new();

    loop {
        let data = match context.fetch() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "transport exception while receiving");
                context.received_transport_exception = true;
                break;
            }
        };
        if data.is_empty() {
            debug!("no more data from peer");
            break;
        }

        let mut records = parse_records_with_refetch(context, data);
        let messages = process_records(context, &mut records, &mut reassembly);
        result.records.extend(records);
        result.messages.extend(messages);

        if context.config.stop_receiving_after_fatal && context.received_fatal_alert {
            debug!("stopping receive after fatal alert");
            break;
        }
        if !should_continue(context, expected, &result.messages) {
            break;
        }
    }

    reassembly.reset();
    context.talking_connection_end = context.connection_end;
    result
}

/// Parse records, fetching more bytes when the batch is incomplete.
///
/// At most `max_record_refetch` extra fetches are made; after that the
/// buffer is soft-parsed.
fn parse_records_with_refetch(context: &mut TlsContext, mut data: Vec<u8>) -> Vec<Record> {
    let mut refetches = 0;
    loop {
        let err = match context.record_layer.parse_records(&data) {
            Ok(records) => return records,
            Err(e) => e,
        };
        if refetches >= context.config.max_record_refetch {
            debug!(error = %err, "falling back to soft record parsing");
            return context.record_layer.parse_records_soft(&data);
        }
        refetches += 1;
        debug!(error = %err, refetches, "incomplete records, fetching more");
        match context.fetch() {
            Ok(more) if !more.is_empty() => data.extend(more),
            Ok(_) => return context.record_layer.parse_records_soft(&data),
            Err(e) => {
                warn!(error = %e, "transport exception while refetching");
                context.received_transport_exception = true;
                return context.record_layer.parse_records_soft(&data);
            }
        }
    }
}

fn process_records(
    context: &mut TlsContext,
    records: &mut [Record],
    reassembly: &mut ReassemblyManager,
) -> Vec<ProtocolMessage> {
    let datagram = context.record_layer.is_datagram();
    let mut messages = Vec::new();
    for group in group_records(records) {
        if datagram {
            messages.extend(process_dtls_group(context, group, reassembly));
        } else {
            messages.extend(process_group(context, group));
        }
    }
    messages
}

fn adjust_and_decrypt(context: &mut TlsContext, group: &mut RecordGroup<'_>) {
    for record in group.records.iter_mut() {
        if let Some(epoch) = record.epoch {
            context.dtls_read_epoch = context.dtls_read_epoch.max(epoch);
        }
        context.record_layer.decrypt(record);
    }
}

fn process_group(context: &mut TlsContext, mut group: RecordGroup<'_>) -> Vec<ProtocolMessage> {
    adjust_and_decrypt(context, &mut group);
    let content_type = group.content_type();
    let bytes = group.clean_bytes();
    parse_messages(context, &bytes, content_type, false)
}

fn process_dtls_group(
    context: &mut TlsContext,
    mut group: RecordGroup<'_>,
    reassembly: &mut ReassemblyManager,
) -> Vec<ProtocolMessage> {
    adjust_and_decrypt(context, &mut group);
    let content_type = group.content_type();
    if content_type != Some(ContentType::Handshake) {
        let bytes = group.clean_bytes();
        return parse_messages(context, &bytes, content_type, false);
    }

    let mut messages = Vec::new();
    for record in group.records.iter() {
        let fragments = parse_messages(context, record.clean_or_raw(), content_type, true);
        for fragment in fragments {
            match fragment {
                ProtocolMessage::DtlsFragment(f) => {
                    if let Err(e) = reassembly.process_fragment(&f.header, &f.fragment) {
                        debug!(error = %e, "dropping bad DTLS fragment");
                    }
                }
                other => messages.push(other),
            }
        }
    }

    for (seq, bytes) in reassembly.take_complete() {
        for mut message in parse_messages(context, &bytes, content_type, false) {
            if let ProtocolMessage::Handshake(m) = &mut message {
                m.message_seq = Some(seq);
            }
            messages.push(message);
        }
    }
    messages
}
