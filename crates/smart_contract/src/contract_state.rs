//! Deployed contract state and the NEF container.

use neo3_core::crypto::{hash160, sha256};
use neo3_core::{UInt160, UInt256};
use neo3_io::{
    from_bytes, to_bytes, var_bytes_size, BinaryWriter, IoError, IoResult, MemoryReader,
    Serializable,
};
use neo3_persistence::{DataCache, StoragePrefix};

use crate::manifest::ContractManifest;
use crate::{ContractError, ContractResult};

/// NEF magic: "NEF3" little-endian.
pub const NEF_MAGIC: u32 = 0x3346_454E;

/// Maximum contract script size inside a NEF.
pub const MAX_NEF_SCRIPT: usize = 512 * 1024;

/// The executable container: compiler stamp, script, checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NefFile {
    pub compiler: String,
    pub script: Vec<u8>,
    pub checksum: u32,
}

impl NefFile {
    /// Wraps a script, stamping the checksum.
    pub fn new(compiler: impl Into<String>, script: Vec<u8>) -> Self {
        let mut nef = Self {
            compiler: compiler.into(),
            script,
            checksum: 0,
        };
        nef.checksum = nef.compute_checksum();
        nef
    }

    /// First four bytes of the double SHA-256 of the header and script.
    pub fn compute_checksum(&self) -> u32 {
        let mut writer = BinaryWriter::new();
        let _ = writer.write_u32(NEF_MAGIC);
        let _ = writer.write_var_string(&self.compiler);
        let _ = writer.write_var_bytes(&self.script);
        let digest = sha256(&sha256(&writer.into_bytes()));
        u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

impl Serializable for NefFile {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_u32(NEF_MAGIC)?;
        writer.write_var_string(&self.compiler)?;
        writer.write_var_bytes(&self.script)?;
        writer.write_u32(self.checksum)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let magic = reader.read_u32()?;
        if magic != NEF_MAGIC {
            return Err(IoError::Format(format!("bad NEF magic {magic:#010x}")));
        }
        let compiler = reader.read_var_string(64)?;
        let script = reader.read_var_bytes(MAX_NEF_SCRIPT)?;
        if script.is_empty() {
            return Err(IoError::Format("empty NEF script".into()));
        }
        let checksum = reader.read_u32()?;
        let nef = Self {
            compiler,
            script,
            checksum,
        };
        if nef.compute_checksum() != checksum {
            return Err(IoError::Format("NEF checksum mismatch".into()));
        }
        Ok(nef)
    }

    fn size(&self) -> usize {
        4 + var_bytes_size(self.compiler.len()) + var_bytes_size(self.script.len()) + 4
    }
}

/// One deployed (or native) contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractState {
    /// Unique small integer; negative ids are reserved for natives.
    pub id: i32,
    /// Bumped on every update.
    pub update_counter: u16,
    pub hash: UInt160,
    pub nef: NefFile,
    pub manifest: ContractManifest,
}

impl ContractState {
    /// Derives the contract hash from the deploying sender, the NEF checksum
    /// and the manifest name.
    pub fn create_contract_hash(sender: &UInt160, nef_checksum: u32, name: &str) -> UInt160 {
        let mut preimage = Vec::with_capacity(24 + name.len());
        preimage.extend_from_slice(sender.as_bytes());
        preimage.extend_from_slice(&nef_checksum.to_le_bytes());
        preimage.extend_from_slice(name.as_bytes());
        hash160(&preimage)
    }
}

impl Serializable for ContractState {
    fn serialize(&self, writer: &mut BinaryWriter) -> IoResult<()> {
        writer.write_i32(self.id)?;
        writer.write_u16(self.update_counter)?;
        self.hash.serialize(writer)?;
        self.nef.serialize(writer)?;
        let manifest = self
            .manifest
            .to_json()
            .map_err(|e| IoError::Format(e.to_string()))?;
        writer.write_var_string(&manifest)
    }

    fn deserialize(reader: &mut MemoryReader<'_>) -> IoResult<Self> {
        let id = reader.read_i32()?;
        let update_counter = reader.read_u16()?;
        let hash = UInt160::deserialize(reader)?;
        let nef = NefFile::deserialize(reader)?;
        let manifest_json = reader.read_var_string(crate::manifest::MAX_MANIFEST_SIZE)?;
        let manifest = ContractManifest::from_json(&manifest_json)
            .map_err(|e| IoError::Format(e.to_string()))?;
        Ok(Self {
            id,
            update_counter,
            hash,
            nef,
            manifest,
        })
    }

    fn size(&self) -> usize {
        let manifest_len = self.manifest.to_json().map(|j| j.len()).unwrap_or(0);
        4 + 2 + 20 + self.nef.size() + var_bytes_size(manifest_len)
    }
}

fn contract_key(hash: &UInt160) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(StoragePrefix::StContract as u8);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn contract_id_key(id: i32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(StoragePrefix::StContractId as u8);
    key.extend_from_slice(&id.to_le_bytes());
    key
}

/// Stores a contract state under its hash and indexes the hash by id.
pub fn put_contract(dao: &mut DataCache, state: &ContractState) -> ContractResult<()> {
    let bytes = to_bytes(state)?;
    dao.put(contract_key(&state.hash), bytes);
    dao.put(contract_id_key(state.id), state.hash.as_bytes().to_vec());
    Ok(())
}

/// Loads a contract state by hash.
pub fn get_contract(dao: &DataCache, hash: &UInt160) -> ContractResult<Option<ContractState>> {
    match dao.get(&contract_key(hash))? {
        Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

/// Loads a contract state by id.
pub fn get_contract_by_id(dao: &DataCache, id: i32) -> ContractResult<Option<ContractState>> {
    match dao.get(&contract_id_key(id))? {
        Some(bytes) => {
            let hash = UInt160::from_bytes(&bytes)
                .map_err(|e| ContractError::InvalidOperation(e.to_string()))?;
            get_contract(dao, &hash)
        }
        None => Ok(None),
    }
}

/// Removes a contract's state and id index.
pub fn delete_contract(dao: &mut DataCache, state: &ContractState) {
    dao.delete(contract_key(&state.hash));
    dao.delete(contract_id_key(state.id));
}

/// Convenience check used by permission and witness-group evaluation.
pub fn get_manifest(dao: &DataCache, hash: &UInt160) -> ContractResult<Option<ContractManifest>> {
    Ok(get_contract(dao, hash)?.map(|c| c.manifest))
}

/// The id of the hash currently deployed at `hash`, if any. `None` also
/// covers native hashes, which the registry resolves first.
pub fn get_contract_id(dao: &DataCache, hash: &UInt160) -> ContractResult<Option<i32>> {
    Ok(get_contract(dao, hash)?.map(|c| c.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_persistence::MemoryStore;
    use std::sync::Arc;

    fn sample_state() -> ContractState {
        let nef = NefFile::new("neo3-rs-test", vec![0x40]);
        let hash = ContractState::create_contract_hash(&UInt160::zero(), nef.checksum, "demo");
        ContractState {
            id: 1,
            update_counter: 0,
            hash,
            nef,
            manifest: ContractManifest::new("demo"),
        }
    }

    #[test]
    fn nef_checksum_round_trip() {
        let nef = NefFile::new("compiler", vec![1, 2, 3]);
        let bytes = to_bytes(&nef).unwrap();
        assert_eq!(from_bytes::<NefFile>(&bytes).unwrap(), nef);

        let mut tampered = bytes.clone();
        let script_pos = bytes.len() - 5;
        tampered[script_pos] ^= 0xFF;
        assert!(from_bytes::<NefFile>(&tampered).is_err());
    }

    #[test]
    fn contract_hash_is_deterministic() {
        let a = ContractState::create_contract_hash(&UInt160::zero(), 7, "x");
        let b = ContractState::create_contract_hash(&UInt160::zero(), 7, "x");
        let c = ContractState::create_contract_hash(&UInt160::zero(), 7, "y");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn dao_round_trip_by_hash_and_id() {
        let mut dao = DataCache::new(Arc::new(MemoryStore::new()));
        let state = sample_state();
        put_contract(&mut dao, &state).unwrap();
        assert_eq!(get_contract(&dao, &state.hash).unwrap().unwrap(), state);
        assert_eq!(get_contract_by_id(&dao, 1).unwrap().unwrap(), state);
        delete_contract(&mut dao, &state);
        assert!(get_contract(&dao, &state.hash).unwrap().is_none());
        assert!(get_contract_by_id(&dao, 1).unwrap().is_none());
    }
}
