//! 160-bit account and contract identifier.

use std::fmt;
use std::str::FromStr;

use neo3_io::{BinaryWriter, IoResult, MemoryReader, Serializable};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};

/// The byte length of a [`UInt160`].
pub const UINT160_SIZE: usize = 20;

/// A 160-bit identifier for accounts and contracts.
///
/// Stored little-endian; the textual form is big-endian with a `0x` prefix.
/// Ordering is by raw little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UInt160(pub [u8; UINT160_SIZE]);

impl UInt160 {
    /// The all-zero identifier.
    pub fn zero() -> Self {
        Self([0u8; UINT160_SIZE])
    }

    /// Whether this is the all-zero identifier.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Builds an identifier from exactly 20 little-endian bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != UINT160_SIZE {
            return Err(CoreError::InvalidFormat(format!(
                "UInt160 requires {UINT160_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; UINT160_SIZE];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Raw little-endian bytes.
    pub fn as_bytes(&self) -> &[u8; UINT160_SIZE] {
        &self.0
    }

    /// Raw bytes copied out, little-endian.
    pub fn to_array(&self) -> [u8; UINT160_SIZE] {
        self.0
    }
}

impl fmt::Display for UInt160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut be = self.0;
        be.reverse();
        write!(f, "0x{}", hex::encode(be))
    }
}

impl FromStr for UInt160 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = hex::decode(trimmed)
            .map_err(|e| CoreError::InvalidFormat(format!("invalid hex: {e}")))?;
        bytes.reverse();
        Self::from_bytes(&bytes)
    }
}

impl Serializable for UInt160 {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_bytes(&self.0)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        Ok(Self(reader.read_array::<UINT160_SIZE>()?))
    }

    fn size(&self) -> usize {
        UINT160_SIZE
    }
}

impl Serialize for UInt160 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UInt160 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_is_big_endian() {
        let mut bytes = [0u8; UINT160_SIZE];
        bytes[0] = 0x01;
        let value = UInt160(bytes);
        let text = value.to_string();
        assert!(text.starts_with("0x"));
        assert!(text.ends_with("01"));
        assert_eq!(text.parse::<UInt160>().unwrap(), value);
    }

    #[test]
    fn ordering_is_by_raw_bytes() {
        let a = UInt160::from_bytes(&[0u8; 20]).unwrap();
        let mut high = [0u8; 20];
        high[19] = 1;
        let b = UInt160::from_bytes(&high).unwrap();
        assert!(a < b);
    }
}
