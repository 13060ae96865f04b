//! Transaction and block witnesses.

use neo3_io::{
    var_bytes_size, BinaryWriter, IoResult, MemoryReader, Serializable,
};

use crate::constants::MAX_WITNESS_SCRIPT_SIZE;
use crate::crypto::hash160;
use crate::uint160::UInt160;

/// A pair of invocation and verification scripts authorizing an entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Witness {
    /// Script pushing the signatures.
    pub invocation_script: Vec<u8>,
    /// Script that consumes them and leaves a boolean on the stack.
    pub verification_script: Vec<u8>,
}

impl Witness {
    pub fn new(invocation_script: Vec<u8>, verification_script: Vec<u8>) -> Self {
        Self {
            invocation_script,
            verification_script,
        }
    }

    /// Hash of the verification script, the account this witness speaks for.
    pub fn script_hash(&self) -> UInt160 {
        hash160(&self.verification_script)
    }
}

impl Serializable for Witness {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_var_bytes(&self.invocation_script)?;
        writer.write_var_bytes(&self.verification_script)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let invocation_script = reader.read_var_bytes(MAX_WITNESS_SCRIPT_SIZE)?;
        let verification_script = reader.read_var_bytes(MAX_WITNESS_SCRIPT_SIZE)?;
        Ok(Self {
            invocation_script,
            verification_script,
        })
    }

    fn size(&self) -> usize {
        var_bytes_size(self.invocation_script.len())
            + var_bytes_size(self.verification_script.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_io::{from_bytes, to_bytes};

    #[test]
    fn wire_round_trip() {
        let witness = Witness::new(vec![0x0c, 0x40], vec![0x41, 0x56, 0xe7, 0xb3, 0x27]);
        let bytes = to_bytes(&witness).unwrap();
        assert_eq!(bytes.len(), witness.size());
        assert_eq!(from_bytes::<Witness>(&bytes).unwrap(), witness);
    }
}
