//! Send and receive actions.

use tracing::{debug, warn};

use crate::context::TlsContext;
use crate::handshake::fragment::fragment_handshake;
use crate::message::{MessageKind, ProtocolMessage};
use crate::receive::{receive_messages, received_all_expected};
use crate::record::{ContentType, Record, MAX_PLAINTEXT_LENGTH};

/// Sends messages, optionally through configured record templates.
#[derive(Debug, Clone, Default)]
pub struct SendAction {
    pub messages: Vec<ProtocolMessage>,
    /// Record templates used in order; computed records follow once they
    /// run out.
    pub records: Vec<Record>,
    /// Records as they went on the wire.
    pub sent_records: Vec<Record>,
    executed: bool,
}

/// Receives until the expected messages are in or the peer goes quiet.
#[derive(Debug, Clone, Default)]
pub struct ReceiveAction {
    pub expected: Vec<MessageKind>,
    pub records: Vec<Record>,
    pub messages: Vec<ProtocolMessage>,
    executed: bool,
}

/// One step of a workflow trace.
#[derive(Debug, Clone)]
pub enum Action {
    Send(SendAction),
    Receive(ReceiveAction),
}

impl SendAction {
    pub fn new(messages: Vec<ProtocolMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_records(messages: Vec<ProtocolMessage>, records: Vec<Record>) -> Self {
        Self {
            messages,
            records,
            ..Self::default()
        }
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn reset(&mut self) {
        self.sent_records.clear();
        self.executed = false;
    }

    /// Serialize, frame, protect and send all messages in one write.
    ///
    /// A transport error is recorded on the context and leaves the action
    /// unexecuted.
    pub fn execute(&mut self, context: &mut TlsContext) {
        context.talking_connection_end = context.connection_end;
        let prepared: Vec<ProtocolMessage> =
            self.messages.iter().map(|m| m.prepare(context)).collect();
        for message in &prepared {
            if let Err(e) = message.adjust_context(context) {
                debug!(kind = ?message.kind(), error = %e, "send-side adjustment failed");
            }
        }

        let mut chunks = payload_chunks(context, &prepared);
        pad_chunks(&mut chunks, &self.records);
        let mut records = assign_records(&chunks, &self.records);
        let mut wire = Vec::new();
        for (record, chunk) in records.iter_mut().zip(&chunks) {
            match chunk.content_type {
                Some(ct) => {
                    record.content_type = Some(ct);
                    record.clean_bytes = Some(chunk.bytes.clone());
                    context.record_layer.encrypt(record);
                    wire.extend(context.record_layer.serialize(record));
                }
                None => wire.extend_from_slice(&chunk.bytes),
            }
        }

        debug!(records = records.len(), bytes = wire.len(), "sending");
        self.sent_records = records;
        match context.send(&wire) {
            Ok(()) => self.executed = true,
            Err(e) => {
                warn!(error = %e, "transport exception while sending");
                context.received_transport_exception = true;
                self.executed = false;
            }
        }
    }
}

/// Bytes for one record, before protection.
struct Chunk {
    content_type: Option<ContentType>,
    bytes: Vec<u8>,
}

/// Concatenate consecutive messages of one content type and split the result
/// into record-sized chunks. Handshake messages get DTLS framing on datagram
/// layers.
fn payload_chunks(context: &mut TlsContext, messages: &[ProtocolMessage]) -> Vec<Chunk> {
    let datagram = context.record_layer.is_datagram();
    let mut runs: Vec<Chunk> = Vec::new();
    for message in messages {
        let ct = message.content_type();
        let bytes = match message.handshake_parts() {
            Some((msg_type, body)) if datagram => {
                let seq = context.dtls_write_message_seq;
                context.dtls_write_message_seq = seq.wrapping_add(1);
                fragment_handshake(msg_type, body, seq, context.config.max_fragment_payload)
                    .concat()
            }
            _ => message.serialize(),
        };
        match runs.last_mut() {
            Some(run) if run.content_type == ct && ct.is_some() => run.bytes.extend(bytes),
            _ => runs.push(Chunk {
                content_type: ct,
                bytes,
            }),
        }
    }

    let mut chunks = Vec::with_capacity(runs.len());
    for run in runs {
        if run.content_type.is_none() || run.bytes.len() <= MAX_PLAINTEXT_LENGTH {
            chunks.push(run);
            continue;
        }
        for piece in run.bytes.chunks(MAX_PLAINTEXT_LENGTH) {
            chunks.push(Chunk {
                content_type: run.content_type,
                bytes: piece.to_vec(),
            });
        }
    }
    chunks
}

/// Append empty chunks for templates that have no message content, so that
/// they can still carry a fully overridden payload.
fn pad_chunks(chunks: &mut Vec<Chunk>, templates: &[Record]) {
    let fallback = chunks
        .last()
        .and_then(|c| c.content_type)
        .unwrap_or(ContentType::ApplicationData);
    while chunks.len() < templates.len() {
        let template = &templates[chunks.len()];
        chunks.push(Chunk {
            content_type: Some(template.overrides.content_type.unwrap_or(fallback)),
            bytes: Vec::new(),
        });
    }
}

/// Pair every chunk with a record: the configured templates first, then
/// computed ones.
fn assign_records(chunks: &[Chunk], templates: &[Record]) -> Vec<Record> {
    let mut records: Vec<Record> = templates.to_vec();
    records.resize_with(chunks.len(), Record::template);
    records
}

impl ReceiveAction {
    pub fn new(expected: Vec<MessageKind>) -> Self {
        Self {
            expected,
            ..Self::default()
        }
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Whether exactly the expected messages were received.
    pub fn executed_as_planned(&self) -> bool {
        received_all_expected(&self.expected, &self.messages, false)
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.messages.clear();
        self.executed = false;
    }

    pub fn execute(&mut self, context: &mut TlsContext) {
        let result = receive_messages(context, &self.expected);
        debug!(
            records = result.records.len(),
            messages = result.messages.len(),
            as_planned = received_all_expected(&self.expected, &result.messages, false),
            "received"
        );
        self.records = result.records;
        self.messages = result.messages;
        self.executed = true;
    }
}

impl Action {
    pub fn send(messages: Vec<ProtocolMessage>) -> Self {
        Action::Send(SendAction::new(messages))
    }

    pub fn receive(expected: Vec<MessageKind>) -> Self {
        Action::Receive(ReceiveAction::new(expected))
    }

    pub fn execute(&mut self, context: &mut TlsContext) {
        match self {
            Action::Send(a) => a.execute(context),
            Action::Receive(a) => a.execute(context),
        }
    }

    pub fn is_executed(&self) -> bool {
        match self {
            Action::Send(a) => a.is_executed(),
            Action::Receive(a) => a.is_executed(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Action::Send(a) => a.reset(),
            Action::Receive(a) => a.reset(),
        }
    }
}
