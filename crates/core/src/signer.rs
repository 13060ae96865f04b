//! Transaction signers and witness scopes.

use neo3_io::{
    var_uint_size, BinaryWriter, IoError, IoResult, MemoryReader, Serializable,
};

use crate::crypto::ECPoint;
use crate::error::{CoreError, CoreResult};
use crate::uint160::UInt160;

/// How far a signer's witness extends beyond the entry script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WitnessScope {
    /// Witness valid only for fee payment, usable by no contract.
    None = 0x00,
    /// Witness valid for the entry script and contracts it calls directly.
    CalledByEntry = 0x01,
    /// Witness valid for the contracts listed in `allowed_contracts`.
    CustomContracts = 0x10,
    /// Witness valid for contracts whose groups appear in `allowed_groups`.
    CustomGroups = 0x20,
    /// Witness valid everywhere.
    Global = 0x80,
}

impl WitnessScope {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::None),
            0x01 => Some(Self::CalledByEntry),
            0x10 => Some(Self::CustomContracts),
            0x20 => Some(Self::CustomGroups),
            0x80 => Some(Self::Global),
            _ => None,
        }
    }
}

/// Scope mask carried on the wire; scopes combine except `Global`.
fn decode_scopes(mask: u8) -> Option<Vec<WitnessScope>> {
    if mask == 0x00 {
        return Some(vec![WitnessScope::None]);
    }
    if mask == 0x80 {
        return Some(vec![WitnessScope::Global]);
    }
    let mut scopes = Vec::new();
    for bit in [0x01u8, 0x10, 0x20] {
        if mask & bit != 0 {
            scopes.push(WitnessScope::from_byte(bit)?);
        }
    }
    if mask & !0x31 != 0 {
        return None;
    }
    Some(scopes)
}

fn encode_scopes(scopes: &[WitnessScope]) -> u8 {
    scopes.iter().fold(0u8, |mask, s| mask | *s as u8)
}

/// An account that authorized a transaction, with its witness scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    /// The signing account.
    pub account: UInt160,
    /// Witness scopes in effect for this signer.
    pub scopes: Vec<WitnessScope>,
    /// Contracts the witness may be used by, for `CustomContracts`.
    pub allowed_contracts: Vec<UInt160>,
    /// Contract groups the witness may be used by, for `CustomGroups`.
    pub allowed_groups: Vec<ECPoint>,
}

const MAX_SUB_ITEMS: usize = 16;

impl Signer {
    /// A signer whose witness only covers the entry script.
    pub fn called_by_entry(account: UInt160) -> Self {
        Self {
            account,
            scopes: vec![WitnessScope::CalledByEntry],
            allowed_contracts: Vec::new(),
            allowed_groups: Vec::new(),
        }
    }

    /// A signer with a witness valid everywhere.
    pub fn global(account: UInt160) -> Self {
        Self {
            account,
            scopes: vec![WitnessScope::Global],
            allowed_contracts: Vec::new(),
            allowed_groups: Vec::new(),
        }
    }

    pub fn has_scope(&self, scope: WitnessScope) -> bool {
        self.scopes.contains(&scope)
    }

    /// Checks the scope combination rules.
    ///
    /// `Global` excludes every other scope; the custom scopes require their
    /// respective allow-lists to be non-empty and bounded.
    pub fn validate(&self) -> CoreResult<()> {
        if self.scopes.is_empty() {
            return Err(CoreError::InvalidScope("empty scope set".into()));
        }
        if self.has_scope(WitnessScope::Global) && self.scopes.len() > 1 {
            return Err(CoreError::InvalidScope(
                "Global cannot be combined with other scopes".into(),
            ));
        }
        if self.has_scope(WitnessScope::None) && self.scopes.len() > 1 {
            return Err(CoreError::InvalidScope(
                "None cannot be combined with other scopes".into(),
            ));
        }
        if self.has_scope(WitnessScope::CustomContracts) {
            if self.allowed_contracts.is_empty() || self.allowed_contracts.len() > MAX_SUB_ITEMS {
                return Err(CoreError::InvalidScope(
                    "CustomContracts requires 1..=16 allowed contracts".into(),
                ));
            }
        } else if !self.allowed_contracts.is_empty() {
            return Err(CoreError::InvalidScope(
                "allowed contracts present without CustomContracts scope".into(),
            ));
        }
        if self.has_scope(WitnessScope::CustomGroups) {
            if self.allowed_groups.is_empty() || self.allowed_groups.len() > MAX_SUB_ITEMS {
                return Err(CoreError::InvalidScope(
                    "CustomGroups requires 1..=16 allowed groups".into(),
                ));
            }
        } else if !self.allowed_groups.is_empty() {
            return Err(CoreError::InvalidScope(
                "allowed groups present without CustomGroups scope".into(),
            ));
        }
        Ok(())
    }
}

impl Serializable for Signer {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        self.account.serialize(writer)?;
        writer.write_u8(encode_scopes(&self.scopes))?;
        if self.has_scope(WitnessScope::CustomContracts) {
            writer.write_serializable_list(&self.allowed_contracts)?;
        }
        if self.has_scope(WitnessScope::CustomGroups) {
            writer.write_serializable_list(&self.allowed_groups)?;
        }
        Ok(())
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let account = UInt160::deserialize(reader)?;
        let mask = reader.read_u8()?;
        let scopes = decode_scopes(mask)
            .ok_or_else(|| IoError::Format(format!("invalid scope mask {mask:#x}")))?;
        let allowed_contracts = if scopes.contains(&WitnessScope::CustomContracts) {
            reader.read_serializable_list(MAX_SUB_ITEMS)?
        } else {
            Vec::new()
        };
        let allowed_groups = if scopes.contains(&WitnessScope::CustomGroups) {
            reader.read_serializable_list(MAX_SUB_ITEMS)?
        } else {
            Vec::new()
        };
        Ok(Self {
            account,
            scopes,
            allowed_contracts,
            allowed_groups,
        })
    }

    fn size(&self) -> usize {
        let mut size = self.account.size() + 1;
        if self.has_scope(WitnessScope::CustomContracts) {
            size += var_uint_size(self.allowed_contracts.len() as u64)
                + self.allowed_contracts.len() * 20;
        }
        if self.has_scope(WitnessScope::CustomGroups) {
            size += var_uint_size(self.allowed_groups.len() as u64)
                + self.allowed_groups.len() * 33;
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_io::{from_bytes, to_bytes};

    #[test]
    fn scope_rules() {
        let mut signer = Signer::global(UInt160::zero());
        assert!(signer.validate().is_ok());
        signer.scopes.push(WitnessScope::CalledByEntry);
        assert!(signer.validate().is_err());

        let custom = Signer {
            account: UInt160::zero(),
            scopes: vec![WitnessScope::CustomContracts],
            allowed_contracts: Vec::new(),
            allowed_groups: Vec::new(),
        };
        assert!(custom.validate().is_err());
    }

    #[test]
    fn wire_round_trip() {
        let signer = Signer {
            account: UInt160::from_bytes(&[7u8; 20]).unwrap(),
            scopes: vec![WitnessScope::CalledByEntry, WitnessScope::CustomContracts],
            allowed_contracts: vec![UInt160::from_bytes(&[9u8; 20]).unwrap()],
            allowed_groups: Vec::new(),
        };
        let bytes = to_bytes(&signer).unwrap();
        assert_eq!(bytes.len(), signer.size());
        assert_eq!(from_bytes::<Signer>(&bytes).unwrap(), signer);
    }
}
