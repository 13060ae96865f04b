//! The per-height state root and its witnessed form.

use neo3_io::{BinaryWriter, IoResult, MemoryReader, Serializable};
use sha2::{Digest, Sha256};

use crate::uint256::UInt256;
use crate::witness::Witness;

/// The Merkle-Patricia state root for one block height.
///
/// Once enough validators sign, `witness` carries the aggregated multisig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MPTRoot {
    pub version: u8,
    /// Height the root summarizes.
    pub index: u32,
    /// Root hash of the state trie after applying block `index`.
    pub root: UInt256,
    /// Aggregated multisig witness; `None` until finalized.
    pub witness: Option<Witness>,
}

impl MPTRoot {
    pub fn new(index: u32, root: UInt256) -> Self {
        Self {
            version: 0,
            index,
            root,
            witness: None,
        }
    }

    /// The hash state validators sign: `SHA256(version ‖ index ‖ root)`.
    pub fn signed_hash(&self) -> UInt256 {
        let mut hasher = Sha256::new();
        hasher.update([self.version]);
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.root.as_bytes());
        UInt256(hasher.finalize().into())
    }
}

impl Serializable for MPTRoot {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.version)?;
        writer.write_u32(self.index)?;
        self.root.serialize(writer)?;
        match &self.witness {
            Some(witness) => {
                writer.write_var_uint(1)?;
                witness.serialize(writer)
            }
            None => writer.write_var_uint(0),
        }
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let version = reader.read_u8()?;
        let index = reader.read_u32()?;
        let root = UInt256::deserialize(reader)?;
        let witness = match reader.read_var_uint(1)? {
            0 => None,
            _ => Some(Witness::deserialize(reader)?),
        };
        Ok(Self {
            version,
            index,
            root,
            witness,
        })
    }

    fn size(&self) -> usize {
        1 + 4 + 32 + 1 + self.witness.as_ref().map_or(0, Serializable::size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_io::{from_bytes, to_bytes};

    #[test]
    fn round_trip_with_and_without_witness() {
        let mut root = MPTRoot::new(7, UInt256::from_bytes(&[9u8; 32]).unwrap());
        let bytes = to_bytes(&root).unwrap();
        assert_eq!(from_bytes::<MPTRoot>(&bytes).unwrap(), root);

        root.witness = Some(Witness::new(vec![1], vec![2]));
        let bytes = to_bytes(&root).unwrap();
        assert_eq!(bytes.len(), root.size());
        assert_eq!(from_bytes::<MPTRoot>(&bytes).unwrap(), root);
    }

    #[test]
    fn signed_hash_excludes_witness() {
        let mut root = MPTRoot::new(7, UInt256::from_bytes(&[9u8; 32]).unwrap());
        let base = root.signed_hash();
        root.witness = Some(Witness::new(vec![1], vec![2]));
        assert_eq!(root.signed_hash(), base);
    }
}
