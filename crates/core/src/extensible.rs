//! The generic witnessed broadcast envelope.

use neo3_io::{
    var_bytes_size, BinaryWriter, IoResult, MemoryReader, Serializable,
};
use sha2::{Digest, Sha256};

use crate::constants::MAX_EXTENSIBLE_DATA_SIZE;
use crate::uint160::UInt160;
use crate::uint256::UInt256;
use crate::witness::Witness;

/// A witnessed broadcast payload carrying state-root and consensus traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensiblePayload {
    /// Category tag routing the payload to its service.
    pub category: String,
    pub network: u32,
    /// First block height at which the payload is valid.
    pub valid_block_start: u32,
    /// Height at which the payload expires.
    pub valid_block_end: u32,
    pub sender: UInt160,
    pub data: Vec<u8>,
    pub witness: Witness,
}

impl ExtensiblePayload {
    /// The hash the sender's witness signs:
    /// `SHA256(network ‖ validBlockStart ‖ validBlockEnd ‖ sender ‖ data)`.
    pub fn signed_hash(&self) -> UInt256 {
        let mut hasher = Sha256::new();
        hasher.update(self.network.to_le_bytes());
        hasher.update(self.valid_block_start.to_le_bytes());
        hasher.update(self.valid_block_end.to_le_bytes());
        hasher.update(self.sender.as_bytes());
        hasher.update(&self.data);
        UInt256(hasher.finalize().into())
    }
}

impl Serializable for ExtensiblePayload {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_var_string(&self.category)?;
        writer.write_u32(self.valid_block_start)?;
        writer.write_u32(self.valid_block_end)?;
        self.sender.serialize(writer)?;
        writer.write_var_bytes(&self.data)?;
        self.witness.serialize(writer)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let category = reader.read_var_string(32)?;
        let valid_block_start = reader.read_u32()?;
        let valid_block_end = reader.read_u32()?;
        let sender = UInt160::deserialize(reader)?;
        let data = reader.read_var_bytes(MAX_EXTENSIBLE_DATA_SIZE)?;
        let witness = Witness::deserialize(reader)?;
        Ok(Self {
            category,
            network: 0,
            valid_block_start,
            valid_block_end,
            sender,
            data,
            witness,
        })
    }

    fn size(&self) -> usize {
        var_bytes_size(self.category.len())
            + 4
            + 4
            + 20
            + var_bytes_size(self.data.len())
            + self.witness.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_hash_covers_every_field() {
        let payload = ExtensiblePayload {
            category: "StateService".into(),
            network: 860_833_102,
            valid_block_start: 10,
            valid_block_end: 5770,
            sender: UInt160::from_bytes(&[3u8; 20]).unwrap(),
            data: vec![1, 2, 3],
            witness: Witness::default(),
        };
        let base = payload.signed_hash();

        let mut changed = payload.clone();
        changed.data = vec![1, 2, 4];
        assert_ne!(changed.signed_hash(), base);

        let mut changed = payload.clone();
        changed.valid_block_end += 1;
        assert_ne!(changed.signed_hash(), base);

        let mut changed = payload;
        changed.witness.invocation_script = vec![0xFF];
        assert_eq!(changed.signed_hash(), base);
    }
}
