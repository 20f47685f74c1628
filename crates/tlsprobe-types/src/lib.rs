#![forbid(unsafe_code)]
#![doc = "Common error types shared by the tlsprobe crates."]

pub mod error;

pub use error::*;
