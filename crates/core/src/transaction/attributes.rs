//! Transaction attributes and their multiplicity rules.

use neo3_io::{
    var_bytes_size, BinaryWriter, IoError, IoResult, MemoryReader, Serializable,
};

use crate::uint256::UInt256;

/// Maximum size of an oracle response payload.
pub const MAX_ORACLE_RESULT_SIZE: usize = 0xFFFF;

/// Outcome codes an oracle can attach to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OracleResponseCode {
    Success = 0x00,
    ProtocolNotSupported = 0x10,
    ConsensusUnreachable = 0x12,
    NotFound = 0x14,
    Timeout = 0x16,
    Forbidden = 0x18,
    ResponseTooLarge = 0x1A,
    InsufficientFunds = 0x1C,
    Error = 0xFF,
}

impl OracleResponseCode {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Success),
            0x10 => Some(Self::ProtocolNotSupported),
            0x12 => Some(Self::ConsensusUnreachable),
            0x14 => Some(Self::NotFound),
            0x16 => Some(Self::Timeout),
            0x18 => Some(Self::Forbidden),
            0x1A => Some(Self::ResponseTooLarge),
            0x1C => Some(Self::InsufficientFunds),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Discriminant of a transaction attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeType {
    HighPriority = 0x01,
    OracleResponse = 0x11,
    NotValidBefore = 0x20,
    Conflicts = 0x21,
    NotaryAssisted = 0x22,
}

impl AttributeType {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::HighPriority),
            0x11 => Some(Self::OracleResponse),
            0x20 => Some(Self::NotValidBefore),
            0x21 => Some(Self::Conflicts),
            0x22 => Some(Self::NotaryAssisted),
            _ => None,
        }
    }

    /// Whether a transaction may carry more than one attribute of this kind.
    pub fn allow_multiple(&self) -> bool {
        matches!(self, Self::Conflicts)
    }

    /// Whether the kind is gated behind the P2P signature extensions.
    pub fn requires_sig_extensions(&self) -> bool {
        matches!(
            self,
            Self::NotValidBefore | Self::Conflicts | Self::NotaryAssisted
        )
    }
}

/// A transaction attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionAttribute {
    /// Marks the transaction for the priority class above fee ordering.
    HighPriority,
    /// Carries an oracle's answer; keyed uniquely by `id` in the mempool.
    OracleResponse {
        id: u64,
        code: OracleResponseCode,
        result: Vec<u8>,
    },
    /// The transaction is invalid before the given height.
    NotValidBefore { height: u32 },
    /// The transaction excludes the referenced one if cosigned by its sender.
    Conflicts { hash: UInt256 },
    /// The transaction was completed with the aid of a notary service.
    NotaryAssisted { n_keys: u8 },
}

impl TransactionAttribute {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            Self::HighPriority => AttributeType::HighPriority,
            Self::OracleResponse { .. } => AttributeType::OracleResponse,
            Self::NotValidBefore { .. } => AttributeType::NotValidBefore,
            Self::Conflicts { .. } => AttributeType::Conflicts,
            Self::NotaryAssisted { .. } => AttributeType::NotaryAssisted,
        }
    }
}

impl Serializable for TransactionAttribute {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u8(self.attribute_type() as u8)?;
        match self {
            Self::HighPriority => Ok(()),
            Self::OracleResponse { id, code, result } => {
                writer.write_u64(*id)?;
                writer.write_u8(*code as u8)?;
                writer.write_var_bytes(result)
            }
            Self::NotValidBefore { height } => writer.write_u32(*height),
            Self::Conflicts { hash } => hash.serialize(writer),
            Self::NotaryAssisted { n_keys } => writer.write_u8(*n_keys),
        }
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let tag = reader.read_u8()?;
        let kind = AttributeType::from_byte(tag)
            .ok_or_else(|| IoError::Format(format!("unknown attribute type {tag:#x}")))?;
        match kind {
            AttributeType::HighPriority => Ok(Self::HighPriority),
            AttributeType::OracleResponse => {
                let id = reader.read_u64()?;
                let code_byte = reader.read_u8()?;
                let code = OracleResponseCode::from_byte(code_byte).ok_or_else(|| {
                    IoError::Format(format!("unknown oracle response code {code_byte:#x}"))
                })?;
                let result = reader.read_var_bytes(MAX_ORACLE_RESULT_SIZE)?;
                if code != OracleResponseCode::Success && !result.is_empty() {
                    return Err(IoError::Format(
                        "oracle error response carries a result".into(),
                    ));
                }
                Ok(Self::OracleResponse { id, code, result })
            }
            AttributeType::NotValidBefore => Ok(Self::NotValidBefore {
                height: reader.read_u32()?,
            }),
            AttributeType::Conflicts => Ok(Self::Conflicts {
                hash: UInt256::deserialize(reader)?,
            }),
            AttributeType::NotaryAssisted => Ok(Self::NotaryAssisted {
                n_keys: reader.read_u8()?,
            }),
        }
    }

    fn size(&self) -> usize {
        1 + match self {
            Self::HighPriority => 0,
            Self::OracleResponse { result, .. } => 8 + 1 + var_bytes_size(result.len()),
            Self::NotValidBefore { .. } => 4,
            Self::Conflicts { .. } => 32,
            Self::NotaryAssisted { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_io::{from_bytes, to_bytes};

    #[test]
    fn attribute_round_trips() {
        let attrs = [
            TransactionAttribute::HighPriority,
            TransactionAttribute::OracleResponse {
                id: 42,
                code: OracleResponseCode::Success,
                result: vec![1, 2, 3],
            },
            TransactionAttribute::NotValidBefore { height: 100 },
            TransactionAttribute::Conflicts {
                hash: UInt256::from_bytes(&[5u8; 32]).unwrap(),
            },
            TransactionAttribute::NotaryAssisted { n_keys: 4 },
        ];
        for attr in attrs {
            let bytes = to_bytes(&attr).unwrap();
            assert_eq!(bytes.len(), attr.size());
            assert_eq!(from_bytes::<TransactionAttribute>(&bytes).unwrap(), attr);
        }
    }

    #[test]
    fn error_response_must_be_empty() {
        let attr = TransactionAttribute::OracleResponse {
            id: 1,
            code: OracleResponseCode::Timeout,
            result: vec![0xAA],
        };
        let bytes = to_bytes(&attr).unwrap();
        assert!(from_bytes::<TransactionAttribute>(&bytes).is_err());
    }

    #[test]
    fn only_conflicts_repeats() {
        assert!(AttributeType::Conflicts.allow_multiple());
        assert!(!AttributeType::HighPriority.allow_multiple());
        assert!(!AttributeType::OracleResponse.allow_multiple());
        assert!(!AttributeType::NotValidBefore.allow_multiple());
    }
}
