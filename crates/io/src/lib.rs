//! Binary serialization for the neo3 node.
//!
//! All on-wire and persisted encodings go through [`BinaryWriter`] and
//! [`MemoryReader`]. Integers are little-endian, variable-length integers use
//! the 1/3/5/9-byte scheme, strings and byte arrays are length-prefixed.

pub mod binary_writer;
pub mod memory_reader;
pub mod serializable;

pub use binary_writer::BinaryWriter;
pub use memory_reader::MemoryReader;
pub use serializable::{from_bytes, to_bytes, var_bytes_size, var_uint_size, Serializable};

/// Errors produced by the binary codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IoError {
    /// The reader ran past the end of its buffer.
    #[error("unexpected end of stream: need {needed} more bytes")]
    EndOfStream { needed: usize },

    /// The encoded data violates the format being decoded.
    #[error("format error: {0}")]
    Format(String),

    /// A length prefix exceeds the caller-supplied bound.
    #[error("length {length} exceeds maximum of {max}")]
    LengthExceeded { length: u64, max: u64 },
}

/// Result type for codec operations.
pub type IoResult<T> = std::result::Result<T, IoError>;
