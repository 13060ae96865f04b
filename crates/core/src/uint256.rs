//! 256-bit block, transaction and state-root identifier.

use std::fmt;
use std::str::FromStr;

use neo3_io::{BinaryWriter, IoResult, MemoryReader, Serializable};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};

/// The byte length of a [`UInt256`].
pub const UINT256_SIZE: usize = 32;

/// A 256-bit identifier for blocks, transactions and state roots.
///
/// Stored little-endian; the textual form is big-endian with a `0x` prefix.
/// Ordering is by raw little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UInt256(pub [u8; UINT256_SIZE]);

impl UInt256 {
    /// The all-zero identifier.
    pub fn zero() -> Self {
        Self([0u8; UINT256_SIZE])
    }

    /// Whether this is the all-zero identifier.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Builds an identifier from exactly 32 little-endian bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != UINT256_SIZE {
            return Err(CoreError::InvalidFormat(format!(
                "UInt256 requires {UINT256_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; UINT256_SIZE];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Raw little-endian bytes.
    pub fn as_bytes(&self) -> &[u8; UINT256_SIZE] {
        &self.0
    }

    /// Raw bytes copied out, little-endian.
    pub fn to_array(&self) -> [u8; UINT256_SIZE] {
        self.0
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut be = self.0;
        be.reverse();
        write!(f, "0x{}", hex::encode(be))
    }
}

impl FromStr for UInt256 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = hex::decode(trimmed)
            .map_err(|e| CoreError::InvalidFormat(format!("invalid hex: {e}")))?;
        bytes.reverse();
        Self::from_bytes(&bytes)
    }
}

impl Serializable for UInt256 {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_bytes(&self.0)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        Ok(Self(reader.read_array::<UINT256_SIZE>()?))
    }

    fn size(&self) -> usize {
        UINT256_SIZE
    }
}

impl Serialize for UInt256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UInt256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_text() {
        let mut bytes = [0u8; UINT256_SIZE];
        bytes[31] = 0xAB;
        let value = UInt256(bytes);
        assert_eq!(value.to_string().parse::<UInt256>().unwrap(), value);
    }
}
