//! Block headers and blocks.

use neo3_io::{
    var_uint_size, BinaryWriter, IoError, IoResult, MemoryReader, Serializable,
};

use crate::constants::MAX_TRANSACTIONS_PER_BLOCK;
use crate::crypto::hash256;
use crate::error::{CoreError, CoreResult};
use crate::merkle::compute_merkle_root;
use crate::transaction::Transaction;
use crate::uint160::UInt160;
use crate::uint256::UInt256;
use crate::witness::Witness;

/// The witnessed header that chains blocks together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: UInt256,
    /// Merkle root over the block's transaction hashes.
    pub merkle_root: UInt256,
    /// Milliseconds since the Unix epoch; strictly increasing along the chain.
    pub timestamp: u64,
    pub nonce: u64,
    /// Height of this block.
    pub index: u32,
    /// Index of the consensus member that proposed the block.
    pub primary_index: u8,
    /// Multisig address of the validators signing the next block.
    pub next_consensus: UInt160,
    /// Witness of the current validator set.
    pub witness: Witness,
}

impl BlockHeader {
    /// The header hash, double SHA-256 of the unsigned encoding.
    pub fn hash(&self) -> UInt256 {
        let mut writer = BinaryWriter::with_capacity(self.unsigned_size());
        let _ = self.serialize_unsigned(&mut writer);
        hash256(&writer.into_bytes())
    }

    /// The bytes block witnesses sign.
    pub fn sign_data(&self, network: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&network.to_le_bytes());
        data.extend_from_slice(self.hash().as_bytes());
        data
    }

    fn serialize_unsigned(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u32(self.version)?;
        self.prev_hash.serialize(writer)?;
        self.merkle_root.serialize(writer)?;
        writer.write_u64(self.timestamp)?;
        writer.write_u64(self.nonce)?;
        writer.write_u32(self.index)?;
        writer.write_u8(self.primary_index)?;
        self.next_consensus.serialize(writer)
    }

    fn unsigned_size(&self) -> usize {
        4 + 32 + 32 + 8 + 8 + 4 + 1 + 20
    }
}

impl Serializable for BlockHeader {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        self.serialize_unsigned(writer)?;
        // Headers always carry exactly one witness on the wire.
        writer.write_var_uint(1)?;
        self.witness.serialize(writer)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let version = reader.read_u32()?;
        if version != 0 {
            return Err(IoError::Format(format!(
                "unsupported block version {version}"
            )));
        }
        let prev_hash = UInt256::deserialize(reader)?;
        let merkle_root = UInt256::deserialize(reader)?;
        let timestamp = reader.read_u64()?;
        let nonce = reader.read_u64()?;
        let index = reader.read_u32()?;
        let primary_index = reader.read_u8()?;
        let next_consensus = UInt160::deserialize(reader)?;
        let witness_count = reader.read_var_uint(1)?;
        if witness_count != 1 {
            return Err(IoError::Format(format!(
                "header must have exactly one witness, got {witness_count}"
            )));
        }
        let witness = Witness::deserialize(reader)?;
        Ok(Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            nonce,
            index,
            primary_index,
            next_consensus,
            witness,
        })
    }

    fn size(&self) -> usize {
        self.unsigned_size() + 1 + self.witness.size()
    }
}

/// A header plus its transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block hash is the header hash.
    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }

    /// Recomputes the merkle root over the contained transactions.
    pub fn compute_merkle_root(&self) -> UInt256 {
        let hashes: Vec<UInt256> = self.transactions.iter().map(Transaction::hash).collect();
        compute_merkle_root(&hashes)
    }

    /// Checks that the header's merkle root matches the transactions.
    pub fn verify_merkle_root(&self) -> CoreResult<()> {
        let computed = self.compute_merkle_root();
        if computed != self.header.merkle_root {
            return Err(CoreError::InvalidFormat(format!(
                "merkle root mismatch: header {} computed {}",
                self.header.merkle_root, computed
            )));
        }
        Ok(())
    }
}

impl Serializable for Block {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        self.header.serialize(writer)?;
        writer.write_serializable_list(&self.transactions)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let header = BlockHeader::deserialize(reader)?;
        let transactions = reader.read_serializable_list(MAX_TRANSACTIONS_PER_BLOCK)?;
        Ok(Self {
            header,
            transactions,
        })
    }

    fn size(&self) -> usize {
        self.header.size()
            + var_uint_size(self.transactions.len() as u64)
            + self
                .transactions
                .iter()
                .map(Serializable::size)
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_io::{from_bytes, to_bytes};

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 0,
            prev_hash: UInt256::from_bytes(&[1u8; 32]).unwrap(),
            merkle_root: UInt256::zero(),
            timestamp: 1_468_595_301_000,
            nonce: 42,
            index: 9,
            primary_index: 1,
            next_consensus: UInt160::from_bytes(&[2u8; 20]).unwrap(),
            witness: Witness::new(vec![0x0c], vec![0x41]),
        }
    }

    #[test]
    fn header_round_trip() {
        let header = sample_header();
        let bytes = to_bytes(&header).unwrap();
        assert_eq!(bytes.len(), header.size());
        assert_eq!(from_bytes::<BlockHeader>(&bytes).unwrap(), header);
    }

    #[test]
    fn block_hash_is_header_hash() {
        let block = Block {
            header: sample_header(),
            transactions: Vec::new(),
        };
        assert_eq!(block.hash(), block.header.hash());
    }

    #[test]
    fn merkle_root_mismatch_detected() {
        let mut block = Block {
            header: sample_header(),
            transactions: Vec::new(),
        };
        block.header.merkle_root = UInt256::from_bytes(&[9u8; 32]).unwrap();
        assert!(block.verify_merkle_root().is_err());
        block.header.merkle_root = block.compute_merkle_root();
        assert!(block.verify_merkle_root().is_ok());
    }
}
