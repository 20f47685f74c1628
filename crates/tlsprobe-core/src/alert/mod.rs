//! Alert levels and descriptions.
//!
//! Alerts are kept as raw bytes on [`AlertMessage`](crate::message::AlertMessage);
//! these enums only name the values the probe sends or reports.

use std::fmt;

use serde::Serialize;

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

impl AlertLevel {
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            _ => Err(v),
        }
    }
}

macro_rules! alert_descriptions {
    ($($variant:ident = $code:literal => $name:literal,)+) => {
        /// Alert description codes (RFC 5246 §7.2).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[repr(u8)]
        pub enum AlertDescription {
            $($variant = $code,)+
        }

        impl AlertDescription {
            pub fn from_u8(v: u8) -> Result<Self, u8> {
                match v {
                    $($code => Ok(AlertDescription::$variant),)+
                    _ => Err(v),
                }
            }

            /// Wire name, e.g. `bad_record_mac`.
            pub fn name(self) -> &'static str {
                match self {
                    $(AlertDescription::$variant => $name,)+
                }
            }
        }
    };
}

alert_descriptions! {
    CloseNotify = 0 => "close_notify",
    UnexpectedMessage = 10 => "unexpected_message",
    BadRecordMac = 20 => "bad_record_mac",
    DecryptionFailed = 21 => "decryption_failed",
    RecordOverflow = 22 => "record_overflow",
    HandshakeFailure = 40 => "handshake_failure",
    IllegalParameter = 47 => "illegal_parameter",
    DecodeError = 50 => "decode_error",
    DecryptError = 51 => "decrypt_error",
    ProtocolVersion = 70 => "protocol_version",
    InternalError = 80 => "internal_error",
    UnsupportedExtension = 110 => "unsupported_extension",
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
