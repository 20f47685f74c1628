#![forbid(unsafe_code)]
#![doc = "TLS record/message layer and workflow execution engine for tlsprobe."]

pub mod alert;
pub mod config;
pub mod context;
pub mod handshake;
pub mod message;
pub mod parallel;
pub mod parser;
pub mod receive;
pub mod record;
pub mod transport;
pub mod workflow;

#[cfg(feature = "async")]
pub mod parallel_async;

use serde::Serialize;

pub use tlsprobe_types::{ParserError, ProbeError};

/// Protocol version as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const SSL2: Self = Self(0x0002);
    pub const SSL3: Self = Self(0x0300);
    pub const TLS10: Self = Self(0x0301);
    pub const TLS11: Self = Self(0x0302);
    pub const TLS12: Self = Self(0x0303);
    pub const TLS13: Self = Self(0x0304);
    pub const DTLS10: Self = Self(0xFEFF);
    pub const DTLS12: Self = Self(0xFEFD);

    /// Returns true for the datagram variants.
    pub fn is_dtls(self) -> bool {
        self == Self::DTLS10 || self == Self::DTLS12
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }
}

/// Cipher suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    // CBC suites (the padding-oracle targets)
    pub const TLS_RSA_WITH_3DES_EDE_CBC_SHA: Self = Self(0x000A);
    pub const TLS_RSA_WITH_AES_128_CBC_SHA: Self = Self(0x002F);
    pub const TLS_RSA_WITH_AES_256_CBC_SHA: Self = Self(0x0035);
    pub const TLS_RSA_WITH_AES_128_CBC_SHA256: Self = Self(0x003C);
    pub const TLS_RSA_WITH_AES_256_CBC_SHA256: Self = Self(0x003D);
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA: Self = Self(0xC013);
    pub const TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA: Self = Self(0xC014);
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256: Self = Self(0xC027);
    pub const TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384: Self = Self(0xC028);

    // AEAD suites
    pub const TLS_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0x009C);
    pub const TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02F);
    pub const TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384: Self = Self(0xC030);
    pub const TLS_AES_128_GCM_SHA256: Self = Self(0x1301);
    pub const TLS_AES_256_GCM_SHA384: Self = Self(0x1302);

    /// Returns true if records under this suite use CBC block padding.
    pub fn is_cbc(self) -> bool {
        matches!(
            self,
            Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA
                | Self::TLS_RSA_WITH_AES_128_CBC_SHA
                | Self::TLS_RSA_WITH_AES_256_CBC_SHA
                | Self::TLS_RSA_WITH_AES_128_CBC_SHA256
                | Self::TLS_RSA_WITH_AES_256_CBC_SHA256
                | Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
                | Self::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA
                | Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256
                | Self::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384
        )
    }

    /// Returns true if the server sends an ECDHE ServerKeyExchange.
    pub fn is_ecdhe(self) -> bool {
        matches!(
            self,
            Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
                | Self::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA
                | Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256
                | Self::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384
                | Self::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
                | Self::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384
        )
    }

    /// Record MAC length in bytes (0 for AEAD suites).
    pub fn mac_length(self) -> usize {
        match self {
            Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA
            | Self::TLS_RSA_WITH_AES_128_CBC_SHA
            | Self::TLS_RSA_WITH_AES_256_CBC_SHA
            | Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
            | Self::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA => 20,
            Self::TLS_RSA_WITH_AES_128_CBC_SHA256
            | Self::TLS_RSA_WITH_AES_256_CBC_SHA256
            | Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256 => 32,
            Self::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384 => 48,
            _ => 0,
        }
    }

    /// Cipher block size in bytes (0 for AEAD suites).
    pub fn block_size(self) -> usize {
        match self {
            Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA => 8,
            s if s.is_cbc() => 16,
            _ => 0,
        }
    }
}

/// Which side of the connection is currently talking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionEnd {
    Client,
    Server,
}

impl ConnectionEnd {
    /// The opposite end of the connection.
    pub fn peer(self) -> Self {
        match self {
            ConnectionEnd::Client => ConnectionEnd::Server,
            ConnectionEnd::Server => ConnectionEnd::Client,
        }
    }
}
