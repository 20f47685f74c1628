//! Observable outcome of one executed trace.

use std::fmt;

use serde::Serialize;
use tlsprobe_core::context::TlsContext;
use tlsprobe_core::message::MessageKind;
use tlsprobe_core::record::{ContentType, Record, RecordKind, PLAINTEXT_ALERT_RECORD_MAX};
use tlsprobe_core::transport::SocketState;
use tlsprobe_core::workflow::{State, WorkflowTrace};
use tlsprobe_core::ProtocolVersion;

/// Shape and content of one received record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSnapshot {
    pub kind: RecordKind,
    pub content_type: Option<ContentType>,
    pub version: ProtocolVersion,
    pub length: usize,
    pub protocol_message_bytes: Vec<u8>,
    pub clean_bytes: Option<Vec<u8>>,
}

impl RecordSnapshot {
    fn of(record: &Record) -> Self {
        Self {
            kind: record.kind,
            content_type: record.content_type,
            version: record.version,
            length: record.length,
            protocol_message_bytes: record.protocol_message_bytes.clone(),
            clean_bytes: record.clean_bytes.clone(),
        }
    }

    pub fn is_alert(&self) -> bool {
        self.content_type == Some(ContentType::Alert)
    }
}

/// Comparable summary of how the peer answered one trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseFingerprint {
    pub received_transport_exception: bool,
    /// An alert arrived in a record too long to be plaintext.
    pub encrypted_alert: bool,
    pub message_classes: Vec<MessageKind>,
    pub records: Vec<RecordSnapshot>,
    pub socket_state: Option<SocketState>,
}

impl ResponseFingerprint {
    pub fn number_records_received(&self) -> usize {
        self.records.len()
    }

    pub fn number_messages_received(&self) -> usize {
        self.message_classes.len()
    }

    pub fn record_classes(&self) -> impl Iterator<Item = RecordKind> + '_ {
        self.records.iter().map(|r| r.kind)
    }
}

impl fmt::Display for ResponseFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "records=[")?;
        for (i, r) in self.records.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match r.content_type {
                Some(ct) => write!(f, "{ct:?}({})", r.length)?,
                None => write!(f, "{:?}({})", r.kind, r.length)?,
            }
        }
        write!(f, "] messages={:?}", self.message_classes)?;
        if self.encrypted_alert {
            write!(f, " encrypted-alert")?;
        }
        if self.received_transport_exception {
            write!(f, " transport-exception")?;
        }
        match self.socket_state {
            Some(state) => write!(f, " socket={state:?}"),
            None => write!(f, " socket=-"),
        }
    }
}

/// Fingerprint the last receive action of `trace` and the connection outcome
/// recorded in `context`.
///
/// Works on partially executed traces: whatever was not observed is empty.
pub fn fingerprint(trace: &WorkflowTrace, context: &TlsContext) -> ResponseFingerprint {
    let (records, messages) = match trace.last_receive_action() {
        Some(action) => (action.records.as_slice(), action.messages.as_slice()),
        None => (&[][..], &[][..]),
    };
    let encrypted_alert = records
        .iter()
        .any(|r| r.is_alert() && r.length > PLAINTEXT_ALERT_RECORD_MAX);
    ResponseFingerprint {
        received_transport_exception: context.received_transport_exception,
        encrypted_alert,
        message_classes: messages.iter().map(|m| m.kind()).collect(),
        records: records.iter().map(RecordSnapshot::of).collect(),
        socket_state: context.socket_state,
    }
}

pub fn fingerprint_state(state: &State) -> ResponseFingerprint {
    fingerprint(&state.trace, &state.context)
}
