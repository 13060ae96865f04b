//! Typed state access with a stacked write overlay.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use neo3_core::{Block, Transaction, UInt256};
use neo3_io::{from_bytes, to_bytes, BinaryWriter, MemoryReader, Serializable};
use tracing::trace;

use crate::store::{BatchOp, Store};
use crate::{StorageError, StorageResult};

/// Stable single-byte key prefixes of the persisted layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoragePrefix {
    /// Block hash to block bytes.
    DataBlock = 0x01,
    /// Transaction hash to block index plus transaction bytes.
    DataTransaction = 0x02,
    /// Trie node hash to node bytes.
    DataMpt = 0x03,
    /// Block or transaction hash to execution result bytes.
    DataExecResult = 0x04,
    /// Block index to serialized state root.
    DataStateRoot = 0x05,
    /// Contract hash to contract state bytes.
    StContract = 0x50,
    /// Contract id to contract hash.
    StContractId = 0x51,
    /// Contract id plus contract key to stored value.
    StStorage = 0x70,
    /// Block index to block hash. Shares its byte with the legacy native-hash
    /// table, which this layout does not populate.
    IxHeaderHashList = 0x80,
    /// Current block pointer.
    SysCurrentBlock = 0xC0,
    /// Current header pointer.
    SysCurrentHeader = 0xC1,
    /// Storage format version.
    SysVersion = 0xF0,
}

/// Builds the persisted key for a contract storage item: prefix, the contract
/// id as little-endian i32, then the contract-specified bytes.
pub fn storage_key(contract_id: i32, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + key.len());
    out.push(StoragePrefix::StStorage as u8);
    out.extend_from_slice(&contract_id.to_le_bytes());
    out.extend_from_slice(key);
    out
}

fn prefixed(prefix: StoragePrefix, suffix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + suffix.len());
    out.push(prefix as u8);
    out.extend_from_slice(suffix);
    out
}

#[derive(Debug, Clone)]
enum Tracked {
    Updated(Vec<u8>),
    Deleted,
}

/// The DAO: a typed view over the store with a stacked write cache.
///
/// `begin` opens a speculative child; `commit` folds the child back into its
/// parent and `discard` drops it, which is how transaction execution rolls
/// back on a VM fault. Only the root cache talks to the driver; `persist`
/// flushes it as one atomic batch.
pub struct DataCache {
    store: Arc<dyn Store>,
    parent: Option<Box<DataCache>>,
    items: HashMap<Vec<u8>, Tracked>,
}

impl DataCache {
    /// A root cache over the given driver.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            parent: None,
            items: HashMap::new(),
        }
    }

    /// Opens a speculative child cache; `self` becomes its parent.
    pub fn begin(self) -> DataCache {
        DataCache {
            store: Arc::clone(&self.store),
            parent: Some(Box::new(self)),
            items: HashMap::new(),
        }
    }

    /// Folds this cache into its parent and returns the parent.
    pub fn commit(mut self) -> StorageResult<DataCache> {
        let mut parent = *self.parent.take().ok_or_else(|| {
            StorageError::Inconsistency("commit on the root cache".into())
        })?;
        for (key, tracked) in self.items {
            parent.items.insert(key, tracked);
        }
        Ok(parent)
    }

    /// Drops this cache's changes and returns the parent.
    pub fn discard(mut self) -> StorageResult<DataCache> {
        let parent = self.parent.take().ok_or_else(|| {
            StorageError::Inconsistency("discard on the root cache".into())
        })?;
        Ok(*parent)
    }

    /// Whether this cache writes straight to the driver on `persist`.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Reads through the overlay chain down to the driver.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.items.get(key) {
            Some(Tracked::Updated(value)) => Ok(Some(value.clone())),
            Some(Tracked::Deleted) => Ok(None),
            None => match &self.parent {
                Some(parent) => parent.get(key),
                None => self.store.get(key),
            },
        }
    }

    pub fn contains(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.items.insert(key, Tracked::Updated(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.items.insert(key, Tracked::Deleted);
    }

    /// Visits live entries under `prefix` in ascending key order.
    pub fn seek(
        &self,
        prefix: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()> {
        let merged = self.collect_prefix(prefix)?;
        for (key, value) in merged {
            if let Some(value) = value {
                if !callback(&key, &value) {
                    break;
                }
            }
        }
        Ok(())
    }

    fn collect_prefix(
        &self,
        prefix: &[u8],
    ) -> StorageResult<BTreeMap<Vec<u8>, Option<Vec<u8>>>> {
        let mut merged = match &self.parent {
            Some(parent) => parent.collect_prefix(prefix)?,
            None => {
                let mut base = BTreeMap::new();
                self.store.seek(prefix, &mut |key, value| {
                    base.insert(key.to_vec(), Some(value.to_vec()));
                    true
                })?;
                base
            }
        };
        for (key, tracked) in &self.items {
            if !key.starts_with(prefix) {
                continue;
            }
            match tracked {
                Tracked::Updated(value) => {
                    merged.insert(key.clone(), Some(value.clone()));
                }
                Tracked::Deleted => {
                    merged.insert(key.clone(), None);
                }
            }
        }
        Ok(merged)
    }

    /// The pending contract-storage mutations of this cache, sorted by key.
    ///
    /// Keys keep the contract-id envelope but drop the table prefix; the
    /// ordering makes the MPT advance deterministic.
    pub fn storage_changes(&self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        let mut changes = BTreeMap::new();
        for (key, tracked) in &self.items {
            if key.first() != Some(&(StoragePrefix::StStorage as u8)) {
                continue;
            }
            let value = match tracked {
                Tracked::Updated(value) => Some(value.clone()),
                Tracked::Deleted => None,
            };
            changes.insert(key[1..].to_vec(), value);
        }
        changes
    }

    /// Stores the serialized state root for a height.
    pub fn put_state_root(&mut self, index: u32, bytes: Vec<u8>) {
        self.put(
            prefixed(StoragePrefix::DataStateRoot, &index.to_be_bytes()),
            bytes,
        );
    }

    /// Loads the serialized state root for a height.
    pub fn get_state_root(&self, index: u32) -> StorageResult<Option<Vec<u8>>> {
        self.get(&prefixed(StoragePrefix::DataStateRoot, &index.to_be_bytes()))
    }

    /// Flushes the root cache to the driver as one atomic batch.
    pub fn persist(&mut self) -> StorageResult<usize> {
        if self.parent.is_some() {
            return Err(StorageError::Inconsistency(
                "persist on a non-root cache".into(),
            ));
        }
        let mut batch = Vec::with_capacity(self.items.len());
        for (key, tracked) in self.items.drain() {
            match tracked {
                Tracked::Updated(value) => batch.push(BatchOp::Put(key, value)),
                Tracked::Deleted => batch.push(BatchOp::Delete(key)),
            }
        }
        let count = batch.len();
        self.store.put_batch(batch)?;
        trace!(entries = count, "dao batch persisted");
        Ok(count)
    }

    // ---- typed accessors ----

    /// Stores a block under its hash and indexes the hash by height.
    pub fn put_block(&mut self, block: &Block) -> StorageResult<()> {
        let hash = block.hash();
        let bytes = to_bytes(block)?;
        self.put(prefixed(StoragePrefix::DataBlock, hash.as_bytes()), bytes);
        self.put(
            prefixed(
                StoragePrefix::IxHeaderHashList,
                &block.index().to_be_bytes(),
            ),
            hash.as_bytes().to_vec(),
        );
        Ok(())
    }

    pub fn get_block(&self, hash: &UInt256) -> StorageResult<Option<Block>> {
        match self.get(&prefixed(StoragePrefix::DataBlock, hash.as_bytes()))? {
            Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The hash of the block at `index`, if committed.
    pub fn get_block_hash(&self, index: u32) -> StorageResult<Option<UInt256>> {
        match self.get(&prefixed(
            StoragePrefix::IxHeaderHashList,
            &index.to_be_bytes(),
        ))? {
            Some(bytes) => UInt256::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corruption(e.to_string())),
            None => Ok(None),
        }
    }

    /// Stores a transaction with the index of the block including it.
    pub fn put_transaction(
        &mut self,
        block_index: u32,
        transaction: &Transaction,
    ) -> StorageResult<()> {
        let mut writer = BinaryWriter::with_capacity(4 + transaction.size());
        writer.write_u32(block_index)?;
        transaction.serialize(&mut writer)?;
        self.put(
            prefixed(StoragePrefix::DataTransaction, transaction.hash().as_bytes()),
            writer.into_bytes(),
        );
        Ok(())
    }

    /// The transaction and the height it was committed at.
    pub fn get_transaction(
        &self,
        hash: &UInt256,
    ) -> StorageResult<Option<(u32, Transaction)>> {
        match self.get(&prefixed(StoragePrefix::DataTransaction, hash.as_bytes()))? {
            Some(bytes) => {
                let mut reader = MemoryReader::new(&bytes);
                let block_index = reader.read_u32()?;
                let transaction = Transaction::deserialize(&mut reader)?;
                Ok(Some((block_index, transaction)))
            }
            None => Ok(None),
        }
    }

    pub fn contains_transaction(&self, hash: &UInt256) -> StorageResult<bool> {
        self.contains(&prefixed(StoragePrefix::DataTransaction, hash.as_bytes()))
    }

    /// Reads a contract storage item.
    pub fn get_storage_item(
        &self,
        contract_id: i32,
        key: &[u8],
    ) -> StorageResult<Option<Vec<u8>>> {
        self.get(&storage_key(contract_id, key))
    }

    pub fn put_storage_item(&mut self, contract_id: i32, key: &[u8], value: Vec<u8>) {
        self.put(storage_key(contract_id, key), value);
    }

    pub fn delete_storage_item(&mut self, contract_id: i32, key: &[u8]) {
        self.delete(storage_key(contract_id, key));
    }

    /// Visits a contract's storage items under `key_prefix`; the callback
    /// sees keys with the contract envelope stripped.
    pub fn seek_storage(
        &self,
        contract_id: i32,
        key_prefix: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()> {
        let full_prefix = storage_key(contract_id, key_prefix);
        let envelope = 5; // prefix byte + i32 contract id
        self.seek(&full_prefix, &mut |key, value| {
            callback(&key[envelope..], value)
        })
    }

    /// Stores a trie node by its hash.
    pub fn put_mpt_node(&mut self, hash: &UInt256, bytes: Vec<u8>) {
        self.put(prefixed(StoragePrefix::DataMpt, hash.as_bytes()), bytes);
    }

    pub fn get_mpt_node(&self, hash: &UInt256) -> StorageResult<Option<Vec<u8>>> {
        self.get(&prefixed(StoragePrefix::DataMpt, hash.as_bytes()))
    }

    /// Stores raw execution result bytes for a block or transaction hash.
    pub fn put_exec_result(&mut self, hash: &UInt256, bytes: Vec<u8>) {
        self.put(prefixed(StoragePrefix::DataExecResult, hash.as_bytes()), bytes);
    }

    pub fn get_exec_result(&self, hash: &UInt256) -> StorageResult<Option<Vec<u8>>> {
        self.get(&prefixed(StoragePrefix::DataExecResult, hash.as_bytes()))
    }

    /// Updates the current block pointer.
    pub fn put_current_block(&mut self, hash: &UInt256, index: u32) {
        let mut bytes = hash.as_bytes().to_vec();
        bytes.extend_from_slice(&index.to_le_bytes());
        self.put(vec![StoragePrefix::SysCurrentBlock as u8], bytes);
    }

    /// The hash and height of the latest committed block.
    pub fn get_current_block(&self) -> StorageResult<Option<(UInt256, u32)>> {
        match self.get(&[StoragePrefix::SysCurrentBlock as u8])? {
            Some(bytes) if bytes.len() == 36 => {
                let hash = UInt256::from_bytes(&bytes[..32])
                    .map_err(|e| StorageError::Corruption(e.to_string()))?;
                let index = u32::from_le_bytes(
                    bytes[32..36]
                        .try_into()
                        .expect("slice length checked above"),
                );
                Ok(Some((hash, index)))
            }
            Some(_) => Err(StorageError::Corruption(
                "current block pointer has wrong length".into(),
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn root() -> DataCache {
        DataCache::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn overlay_shadows_reads() {
        let mut cache = root();
        cache.put(b"k".to_vec(), b"1".to_vec());
        let mut child = cache.begin();
        assert_eq!(child.get(b"k").unwrap(), Some(b"1".to_vec()));
        child.put(b"k".to_vec(), b"2".to_vec());
        assert_eq!(child.get(b"k").unwrap(), Some(b"2".to_vec()));
        let cache = child.discard().unwrap();
        assert_eq!(cache.get(b"k").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn commit_merges_into_parent() {
        let cache = root();
        let mut child = cache.begin();
        child.put(b"a".to_vec(), b"1".to_vec());
        child.delete(b"b".to_vec());
        let cache = child.commit().unwrap();
        assert_eq!(cache.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(cache.get(b"b").unwrap(), None);
    }

    #[test]
    fn persist_writes_one_batch() {
        let store = Arc::new(MemoryStore::new());
        let mut cache = DataCache::new(store.clone());
        cache.put(b"a".to_vec(), b"1".to_vec());
        cache.put(b"b".to_vec(), b"2".to_vec());
        let written = cache.persist().unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn seek_merges_overlay_and_store() {
        let store = Arc::new(MemoryStore::new());
        store.put(b"p1", b"old").unwrap();
        store.put(b"p2", b"gone").unwrap();
        let mut cache = DataCache::new(store);
        cache.put(b"p1".to_vec(), b"new".to_vec());
        cache.delete(b"p2".to_vec());
        cache.put(b"p3".to_vec(), b"add".to_vec());

        let mut seen = Vec::new();
        cache
            .seek(b"p", &mut |k, v| {
                seen.push((k.to_vec(), v.to_vec()));
                true
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (b"p1".to_vec(), b"new".to_vec()),
                (b"p3".to_vec(), b"add".to_vec()),
            ]
        );
    }

    #[test]
    fn block_and_transaction_round_trip() {
        use neo3_core::{BlockHeader, Signer, UInt160, Witness};

        let tx = Transaction {
            nonce: 1,
            valid_until_block: 10,
            signers: vec![Signer::called_by_entry(UInt160::zero())],
            script: vec![0x40],
            witnesses: vec![Witness::default()],
            ..Transaction::default()
        };
        let block = Block {
            header: BlockHeader {
                version: 0,
                prev_hash: UInt256::zero(),
                merkle_root: UInt256::zero(),
                timestamp: 1,
                nonce: 2,
                index: 3,
                primary_index: 0,
                next_consensus: UInt160::zero(),
                witness: Witness::default(),
            },
            transactions: vec![tx.clone()],
        };

        let mut cache = root();
        cache.put_block(&block).unwrap();
        cache.put_transaction(3, &tx).unwrap();

        assert_eq!(cache.get_block(&block.hash()).unwrap().unwrap(), block);
        assert_eq!(cache.get_block_hash(3).unwrap().unwrap(), block.hash());
        let (height, stored) = cache.get_transaction(&tx.hash()).unwrap().unwrap();
        assert_eq!(height, 3);
        assert_eq!(stored, tx);
        assert!(cache.contains_transaction(&tx.hash()).unwrap());
    }

    #[test]
    fn storage_seek_strips_envelope() {
        let mut cache = root();
        cache.put_storage_item(-6, b"\x08abc", b"v1".to_vec());
        cache.put_storage_item(-6, b"\x08abd", b"v2".to_vec());
        cache.put_storage_item(-7, b"\x08abe", b"other".to_vec());

        let mut keys = Vec::new();
        cache
            .seek_storage(-6, b"\x08", &mut |k, _| {
                keys.push(k.to_vec());
                true
            })
            .unwrap();
        assert_eq!(keys, vec![b"\x08abc".to_vec(), b"\x08abd".to_vec()]);
    }
}
