//! Fingerprint equality oracle.
//!
//! Two fingerprints are compared through a fixed chain of checks and the
//! first failing check names the difference. The order matters: when several
//! dimensions differ, it decides which one gets reported.

use std::fmt;

use serde::Serialize;

use super::fingerprint::{RecordSnapshot, ResponseFingerprint};

/// First dimension in which two fingerprints differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EqualityError {
    None,
    SocketException,
    RecordCount,
    EncryptedAlert,
    RecordClass,
    RecordLength,
    RecordVersion,
    RecordContentType,
    AlertRecordContent,
    AlertMessageContent,
    MessageCount,
    MessageClass,
    SocketState,
}

impl EqualityError {
    pub fn is_none(self) -> bool {
        self == EqualityError::None
    }

    /// Human-readable explanation of the difference.
    pub fn translation(self) -> &'static str {
        match self {
            EqualityError::None => "The server responded identically to all test vectors.",
            EqualityError::SocketException => {
                "The server closed or reset the connection for some test vectors but not for others."
            }
            EqualityError::RecordCount => {
                "The server sent a different number of records for different test vectors."
            }
            EqualityError::EncryptedAlert => {
                "The server sent an encrypted alert for some test vectors and a plaintext alert for others."
            }
            EqualityError::RecordClass => {
                "The server sent records that could not be parsed for some test vectors."
            }
            EqualityError::RecordLength => {
                "The server sent records of different lengths for different test vectors."
            }
            EqualityError::RecordVersion => {
                "The server used different record protocol versions for different test vectors."
            }
            EqualityError::RecordContentType => {
                "The server sent records of different content types for different test vectors."
            }
            EqualityError::AlertRecordContent => {
                "The server sent different plaintext alert records for different test vectors."
            }
            EqualityError::AlertMessageContent => {
                "The server sent different alert messages for different test vectors."
            }
            EqualityError::MessageCount => {
                "The server sent a different number of protocol messages for different test vectors."
            }
            EqualityError::MessageClass => {
                "The server sent different protocol messages for different test vectors."
            }
            EqualityError::SocketState => {
                "The connection ended in a different socket state for different test vectors."
            }
        }
    }
}

impl fmt::Display for EqualityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EqualityError::None => "NONE",
            EqualityError::SocketException => "SOCKET_EXCEPTION",
            EqualityError::RecordCount => "RECORD_COUNT",
            EqualityError::EncryptedAlert => "ENCRYPTED_ALERT",
            EqualityError::RecordClass => "RECORD_CLASS",
            EqualityError::RecordLength => "RECORD_LENGTH",
            EqualityError::RecordVersion => "RECORD_VERSION",
            EqualityError::RecordContentType => "RECORD_CONTENT_TYPE",
            EqualityError::AlertRecordContent => "ALERT_RECORD_CONTENT",
            EqualityError::AlertMessageContent => "ALERT_MESSAGE_CONTENT",
            EqualityError::MessageCount => "MESSAGE_COUNT",
            EqualityError::MessageClass => "MESSAGE_CLASS",
            EqualityError::SocketState => "SOCKET_STATE",
        };
        f.write_str(name)
    }
}

/// Compare two fingerprints.
///
/// Content checks (alert bytes, messages) run when `can_decrypt_alerts` is
/// set, or when `a` carries no encrypted alert.
pub fn compare(
    a: &ResponseFingerprint,
    b: &ResponseFingerprint,
    can_decrypt_alerts: bool,
) -> EqualityError {
    if a.received_transport_exception != b.received_transport_exception {
        return EqualityError::SocketException;
    }
    if a.number_records_received() != b.number_records_received() {
        return EqualityError::RecordCount;
    }
    if a.encrypted_alert != b.encrypted_alert {
        return EqualityError::EncryptedAlert;
    }
    if !a.record_classes().eq(b.record_classes()) {
        return EqualityError::RecordClass;
    }
    if !records_match(a, b, |x, y| x.length == y.length) {
        return EqualityError::RecordLength;
    }
    if !records_match(a, b, |x, y| x.version == y.version) {
        return EqualityError::RecordVersion;
    }
    if !records_match(a, b, |x, y| x.content_type == y.content_type) {
        return EqualityError::RecordContentType;
    }
    if can_decrypt_alerts || !a.encrypted_alert {
        if !records_match(a, b, alert_records_equal) {
            return EqualityError::AlertRecordContent;
        }
        if !records_match(a, b, alert_messages_equal) {
            return EqualityError::AlertMessageContent;
        }
        if a.number_messages_received() != b.number_messages_received() {
            return EqualityError::MessageCount;
        }
        if a.message_classes != b.message_classes {
            return EqualityError::MessageClass;
        }
    }
    if a.socket_state != b.socket_state {
        return EqualityError::SocketState;
    }
    EqualityError::None
}

/// Position-wise check over the records of `a`. Record counts are already
/// known to be equal when this runs.
fn records_match<F>(a: &ResponseFingerprint, b: &ResponseFingerprint, check: F) -> bool
where
    F: Fn(&RecordSnapshot, &RecordSnapshot) -> bool,
{
    a.records
        .iter()
        .zip(&b.records)
        .all(|(x, y)| check(x, y))
}

/// Short alert records are taken to be plaintext and compared byte for byte.
fn alert_records_equal(x: &RecordSnapshot, y: &RecordSnapshot) -> bool {
    if !x.is_alert() || x.length > tlsprobe_core::record::PLAINTEXT_ALERT_RECORD_MAX {
        return true;
    }
    x.protocol_message_bytes == y.protocol_message_bytes
}

fn alert_messages_equal(x: &RecordSnapshot, y: &RecordSnapshot) -> bool {
    !x.is_alert() || x.clean_bytes == y.clean_bytes
}
