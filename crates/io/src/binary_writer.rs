//! Buffered writer for the node's binary encodings.

use bytes::{BufMut, BytesMut};

use crate::{IoResult, Serializable};

/// A writer that accumulates the little-endian binary form of node types.
pub struct BinaryWriter {
    buffer: BytesMut,
}

impl BinaryWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Creates a writer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) -> IoResult<()> {
        self.buffer.put_u8(value);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> IoResult<()> {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> IoResult<()> {
        self.buffer.put_u16_le(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> IoResult<()> {
        self.buffer.put_u32_le(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> IoResult<()> {
        self.buffer.put_u64_le(value);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> IoResult<()> {
        self.buffer.put_i32_le(value);
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> IoResult<()> {
        self.buffer.put_i64_le(value);
        Ok(())
    }

    /// Writes raw bytes without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> IoResult<()> {
        self.buffer.put_slice(bytes);
        Ok(())
    }

    /// Writes a variable-length unsigned integer.
    ///
    /// Values up to `0xFC` take one byte; larger values are prefixed with
    /// `0xFD`/`0xFE`/`0xFF` followed by the little-endian u16/u32/u64.
    pub fn write_var_uint(&mut self, value: u64) -> IoResult<()> {
        match value {
            0..=0xFC => self.write_u8(value as u8),
            0xFD..=0xFFFF => {
                self.write_u8(0xFD)?;
                self.write_u16(value as u16)
            }
            0x1_0000..=0xFFFF_FFFF => {
                self.write_u8(0xFE)?;
                self.write_u32(value as u32)
            }
            _ => {
                self.write_u8(0xFF)?;
                self.write_u64(value)
            }
        }
    }

    /// Writes a length-prefixed byte string.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) -> IoResult<()> {
        self.write_var_uint(bytes.len() as u64)?;
        self.write_bytes(bytes)
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_var_string(&mut self, value: &str) -> IoResult<()> {
        self.write_var_bytes(value.as_bytes())
    }

    /// Writes a serializable value in place.
    pub fn write_serializable<T: Serializable>(&mut self, value: &T) -> IoResult<()> {
        value.serialize(self)
    }

    /// Writes a count-prefixed list of serializable values.
    pub fn write_serializable_list<T: Serializable>(&mut self, values: &[T]) -> IoResult<()> {
        self.write_var_uint(values.len() as u64)?;
        for value in values {
            value.serialize(self)?;
        }
        Ok(())
    }

    /// Consumes the writer and returns the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Returns a copy of the accumulated bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.to_vec()
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_uint_boundaries() {
        let mut w = BinaryWriter::new();
        w.write_var_uint(0xFC).unwrap();
        w.write_var_uint(0xFD).unwrap();
        w.write_var_uint(0xFFFF).unwrap();
        w.write_var_uint(0x1_0000).unwrap();
        w.write_var_uint(u64::from(u32::MAX) + 1).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes[0], 0xFC);
        assert_eq!(bytes[1], 0xFD);
        assert_eq!(&bytes[2..4], &[0xFD, 0x00]);
        assert_eq!(bytes[4], 0xFD);
        assert_eq!(bytes[7], 0xFE);
        assert_eq!(bytes[12], 0xFF);
    }

    #[test]
    fn little_endian_layout() {
        let mut w = BinaryWriter::new();
        w.write_u32(0x0102_0304).unwrap();
        assert_eq!(w.into_bytes(), vec![0x04, 0x03, 0x02, 0x01]);
    }
}
