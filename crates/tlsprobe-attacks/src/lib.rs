#![forbid(unsafe_code)]
#![doc = "Response fingerprinting, fingerprint comparison and padding-oracle detection for tlsprobe."]

pub mod padding;
pub mod padding_oracle;
pub mod response;

pub use padding_oracle::{PaddingOracleAttacker, PaddingOracleConfig, ResponseMap};
pub use response::{compare, fingerprint, EqualityError, ResponseFingerprint};
