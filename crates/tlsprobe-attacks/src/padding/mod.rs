//! Padding test vectors.
//!
//! [`record_generator`] builds the padding records for a suite and
//! [`vector_generator`] wraps each of them into a complete workflow trace.

pub mod record_generator;
pub mod vector_generator;

pub use record_generator::{
    padding_bytes, PaddingRecordGenerator, PaddingVector, RecordGeneratorType,
};
pub use vector_generator::{PaddingVectorGenerator, VectorGenerator, VectorGeneratorType};
