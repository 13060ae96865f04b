//! The transaction type and its canonical encodings.

mod attributes;

pub use attributes::{
    AttributeType, OracleResponseCode, TransactionAttribute, MAX_ORACLE_RESULT_SIZE,
};

use neo3_io::{
    var_bytes_size, var_uint_size, BinaryWriter, IoError, IoResult, MemoryReader, Serializable,
};

use crate::constants::{MAX_ATTRIBUTES, MAX_SIGNERS, MAX_TRANSACTION_SIZE};
use crate::crypto::hash256;
use crate::error::{CoreError, CoreResult};
use crate::signer::Signer;
use crate::uint160::UInt160;
use crate::uint256::UInt256;
use crate::witness::Witness;

/// A transaction as it travels the wire and rests in blocks.
///
/// Identity is the double SHA-256 of the canonical unsigned encoding. The
/// first signer is the sender and pays the fees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u8,
    pub nonce: u32,
    /// Execution cost paid to the network, in GAS fractions.
    pub system_fee: i64,
    /// Size and verification cost paid to the network, in GAS fractions.
    pub network_fee: i64,
    /// Last block index at which this transaction may be included.
    pub valid_until_block: u32,
    pub signers: Vec<Signer>,
    pub attributes: Vec<TransactionAttribute>,
    pub script: Vec<u8>,
    pub witnesses: Vec<Witness>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: 0,
            nonce: 0,
            system_fee: 0,
            network_fee: 0,
            valid_until_block: 0,
            signers: Vec::new(),
            attributes: Vec::new(),
            script: Vec::new(),
            witnesses: Vec::new(),
        }
    }
}

impl Transaction {
    /// The transaction hash, double SHA-256 of the unsigned encoding.
    pub fn hash(&self) -> UInt256 {
        let mut writer = BinaryWriter::with_capacity(self.unsigned_size());
        // Unsigned encoding cannot fail: it is pure buffer appends.
        let _ = self.serialize_unsigned(&mut writer);
        hash256(&writer.into_bytes())
    }

    /// The bytes that signatures cover: network magic followed by the hash.
    pub fn sign_data(&self, network: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&network.to_le_bytes());
        data.extend_from_slice(self.hash().as_bytes());
        data
    }

    /// The fee-paying account: the first signer.
    pub fn sender(&self) -> UInt160 {
        self.signers.first().map(|s| s.account).unwrap_or_default()
    }

    /// Whether `account` is among the signers.
    pub fn has_signer(&self, account: &UInt160) -> bool {
        self.signers.iter().any(|s| s.account == *account)
    }

    /// All attributes of the given kind, in order.
    pub fn get_attributes(&self, kind: AttributeType) -> Vec<&TransactionAttribute> {
        self.attributes
            .iter()
            .filter(|a| a.attribute_type() == kind)
            .collect()
    }

    /// Whether any attribute of the given kind is present.
    pub fn has_attribute(&self, kind: AttributeType) -> bool {
        self.attributes.iter().any(|a| a.attribute_type() == kind)
    }

    /// Network fee divided by encoded size, the primary mempool ordering key.
    pub fn fee_per_byte(&self) -> i64 {
        let size = self.size() as i64;
        if size == 0 {
            0
        } else {
            self.network_fee / size
        }
    }

    /// Structural checks that do not need chain state.
    ///
    /// Covers fee signs, signer uniqueness and scope validity, and attribute
    /// multiplicity; size and expiry windows are checked by the ledger.
    pub fn validate_structure(&self, sig_extensions_enabled: bool) -> CoreResult<()> {
        if self.system_fee < 0 || self.network_fee < 0 {
            return Err(CoreError::InvalidFormat("negative fee".into()));
        }
        if self.script.is_empty() {
            return Err(CoreError::InvalidFormat("empty script".into()));
        }
        if self.signers.is_empty() {
            return Err(CoreError::InvalidFormat("transaction has no signers".into()));
        }
        if self.signers.len() != self.witnesses.len() {
            return Err(CoreError::InvalidFormat(format!(
                "{} signers but {} witnesses",
                self.signers.len(),
                self.witnesses.len()
            )));
        }
        for (i, signer) in self.signers.iter().enumerate() {
            signer.validate()?;
            if self.signers[..i].iter().any(|s| s.account == signer.account) {
                return Err(CoreError::InvalidFormat(format!(
                    "duplicate signer {}",
                    signer.account
                )));
            }
        }
        for (i, attr) in self.attributes.iter().enumerate() {
            let kind = attr.attribute_type();
            if kind.requires_sig_extensions() && !sig_extensions_enabled {
                return Err(CoreError::InvalidAttribute(format!(
                    "{kind:?} requires P2P signature extensions"
                )));
            }
            if !kind.allow_multiple()
                && self.attributes[..i]
                    .iter()
                    .any(|a| a.attribute_type() == kind)
            {
                return Err(CoreError::InvalidAttribute(format!(
                    "duplicate {kind:?} attribute"
                )));
            }
        }
        Ok(())
    }

    fn serialize_unsigned(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.version)?;
        writer.write_u32(self.nonce)?;
        writer.write_i64(self.system_fee)?;
        writer.write_i64(self.network_fee)?;
        writer.write_u32(self.valid_until_block)?;
        writer.write_serializable_list(&self.signers)?;
        writer.write_serializable_list(&self.attributes)?;
        writer.write_var_bytes(&self.script)
    }

    fn unsigned_size(&self) -> usize {
        1 + 4
            + 8
            + 8
            + 4
            + var_uint_size(self.signers.len() as u64)
            + self.signers.iter().map(Serializable::size).sum::<usize>()
            + var_uint_size(self.attributes.len() as u64)
            + self.attributes.iter().map(Serializable::size).sum::<usize>()
            + var_bytes_size(self.script.len())
    }
}

impl Serializable for Transaction {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        self.serialize_unsigned(writer)?;
        writer.write_serializable_list(&self.witnesses)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let version = reader.read_u8()?;
        if version != 0 {
            return Err(IoError::Format(format!(
                "unsupported transaction version {version}"
            )));
        }
        let nonce = reader.read_u32()?;
        let system_fee = reader.read_i64()?;
        let network_fee = reader.read_i64()?;
        if system_fee < 0 || network_fee < 0 {
            return Err(IoError::Format("negative fee".into()));
        }
        let valid_until_block = reader.read_u32()?;
        let signers: Vec<Signer> = reader.read_serializable_list(MAX_SIGNERS)?;
        if signers.is_empty() {
            return Err(IoError::Format("transaction has no signers".into()));
        }
        let attributes = reader.read_serializable_list(MAX_ATTRIBUTES)?;
        let script = reader.read_var_bytes(MAX_TRANSACTION_SIZE)?;
        if script.is_empty() {
            return Err(IoError::Format("empty script".into()));
        }
        let witnesses: Vec<Witness> = reader.read_serializable_list(MAX_SIGNERS)?;
        if witnesses.len() != signers.len() {
            return Err(IoError::Format("witness count differs from signers".into()));
        }
        Ok(Self {
            version,
            nonce,
            system_fee,
            network_fee,
            valid_until_block,
            signers,
            attributes,
            script,
            witnesses,
        })
    }

    fn size(&self) -> usize {
        self.unsigned_size()
            + var_uint_size(self.witnesses.len() as u64)
            + self.witnesses.iter().map(Serializable::size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_io::{from_bytes, to_bytes};

    fn sample_tx() -> Transaction {
        Transaction {
            version: 0,
            nonce: 7,
            system_fee: 100,
            network_fee: 200,
            valid_until_block: 1000,
            signers: vec![Signer::called_by_entry(
                UInt160::from_bytes(&[1u8; 20]).unwrap(),
            )],
            attributes: vec![TransactionAttribute::HighPriority],
            script: vec![0x40],
            witnesses: vec![Witness::default()],
        }
    }

    #[test]
    fn wire_round_trip() {
        let tx = sample_tx();
        let bytes = to_bytes(&tx).unwrap();
        assert_eq!(bytes.len(), tx.size());
        let decoded = from_bytes::<Transaction>(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn hash_ignores_witnesses() {
        let mut tx = sample_tx();
        let before = tx.hash();
        tx.witnesses[0].invocation_script = vec![0x0c, 0x40, 0xAA];
        assert_eq!(tx.hash(), before);
    }

    #[test]
    fn duplicate_signers_rejected() {
        let mut tx = sample_tx();
        tx.signers.push(tx.signers[0].clone());
        tx.witnesses.push(Witness::default());
        assert!(tx.validate_structure(true).is_err());
    }

    #[test]
    fn duplicate_single_instance_attribute_rejected() {
        let mut tx = sample_tx();
        tx.attributes.push(TransactionAttribute::HighPriority);
        assert!(tx.validate_structure(true).is_err());
    }

    #[test]
    fn conflicts_attribute_needs_extensions() {
        let mut tx = sample_tx();
        tx.attributes = vec![TransactionAttribute::Conflicts {
            hash: UInt256::zero(),
        }];
        assert!(tx.validate_structure(false).is_err());
        assert!(tx.validate_structure(true).is_ok());
    }
}
