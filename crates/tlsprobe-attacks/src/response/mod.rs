//! Response fingerprints and the equality oracle over them.

pub mod equality;
pub mod fingerprint;

pub use equality::{compare, EqualityError};
pub use fingerprint::{fingerprint, fingerprint_state, RecordSnapshot, ResponseFingerprint};
