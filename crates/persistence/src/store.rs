//! The key-value driver seam and the in-memory driver.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::StorageResult;

/// One operation of an atomic write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered key-value store.
///
/// Iteration is strictly ascending by `memcmp` of the raw key bytes; a batch
/// either persists completely or not at all.
pub trait Store: Send + Sync {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Visits entries with the given prefix in ascending key order until the
    /// callback returns `false`.
    fn seek(
        &self,
        prefix: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()>;

    /// Applies a batch atomically.
    fn put_batch(&self, batch: Vec<BatchOp>) -> StorageResult<()>;

    /// Releases driver resources; further calls may fail.
    fn close(&self) {}
}

/// The in-process driver, an ordered map behind a reader-writer lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn seek(
        &self,
        prefix: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()> {
        let entries = self.entries.read();
        let range = entries.range::<Vec<u8>, _>((Bound::Included(prefix.to_vec()), Bound::Unbounded));
        for (key, value) in range {
            if !key.starts_with(prefix) {
                break;
            }
            if !callback(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn put_batch(&self, batch: Vec<BatchOp>) -> StorageResult<()> {
        let mut entries = self.entries.write();
        for op in batch {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryStore::new();
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn seek_is_prefix_bounded_and_ordered() {
        let store = MemoryStore::new();
        store.put(b"aa", b"1").unwrap();
        store.put(b"ab", b"2").unwrap();
        store.put(b"b", b"3").unwrap();
        let mut seen = Vec::new();
        store
            .seek(b"a", &mut |k, _| {
                seen.push(k.to_vec());
                true
            })
            .unwrap();
        assert_eq!(seen, vec![b"aa".to_vec(), b"ab".to_vec()]);
    }

    #[test]
    fn seek_stops_on_false() {
        let store = MemoryStore::new();
        store.put(b"a1", b"1").unwrap();
        store.put(b"a2", b"2").unwrap();
        let mut count = 0;
        store
            .seek(b"a", &mut |_, _| {
                count += 1;
                false
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn batch_applies_all() {
        let store = MemoryStore::new();
        store.put(b"x", b"0").unwrap();
        store
            .put_batch(vec![
                BatchOp::Put(b"a".to_vec(), b"1".to_vec()),
                BatchOp::Delete(b"x".to_vec()),
            ])
            .unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"x").unwrap(), None);
    }
}
