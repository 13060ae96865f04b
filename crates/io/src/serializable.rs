//! The trait implemented by every on-wire and persisted type.

use crate::{BinaryWriter, IoResult, MemoryReader};

/// Canonical binary form of a node type.
///
/// `deserialize(serialize(x)) == x` must hold for every implementor.
pub trait Serializable: Sized {
    /// Writes the canonical encoding of `self`.
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()>;

    /// Reads one value from the reader.
    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self>;

    /// Exact encoded size in bytes.
    fn size(&self) -> usize;
}

/// Encodes a value into a fresh byte vector.
pub fn to_bytes<T: Serializable>(value: &T) -> IoResult<Vec<u8>> {
    let mut writer = BinaryWriter::with_capacity(value.size());
    value.serialize(&mut writer)?;
    Ok(writer.into_bytes())
}

/// Decodes a value from a byte slice, requiring full consumption.
pub fn from_bytes<T: Serializable>(bytes: &[u8]) -> IoResult<T> {
    let mut reader = MemoryReader::new(bytes);
    let value = T::deserialize(&mut reader)?;
    if reader.remaining() != 0 {
        return Err(crate::IoError::Format(format!(
            "{} trailing bytes after value",
            reader.remaining()
        )));
    }
    Ok(value)
}

/// Encoded size of a variable-length unsigned integer.
pub fn var_uint_size(value: u64) -> usize {
    match value {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

/// Encoded size of a length-prefixed byte string.
pub fn var_bytes_size(length: usize) -> usize {
    var_uint_size(length as u64) + length
}
