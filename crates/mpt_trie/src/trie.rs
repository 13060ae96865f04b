//! Trie operations over the DAO-backed node store.

use neo3_core::UInt256;
use neo3_persistence::DataCache;

use crate::node::Node;
use crate::{to_nibbles, MptError, MptResult};

/// The pre-existing side of a divergence being split into a branch.
enum Split {
    Value(Vec<u8>),
    Child(UInt256),
}

/// A handle to one version of the state trie.
///
/// Nodes are immutable once written; mutation produces new nodes and moves
/// the root, so every committed height keeps a readable trie.
#[derive(Debug, Clone)]
pub struct Trie {
    root: Option<UInt256>,
}

impl Trie {
    /// Opens the trie at the given root; `None` is the empty trie.
    pub fn new(root: Option<UInt256>) -> Self {
        Self { root }
    }

    /// The current root hash; the zero hash for the empty trie.
    pub fn root_hash(&self) -> UInt256 {
        self.root.unwrap_or_default()
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, dao: &DataCache, key: &[u8]) -> MptResult<Option<Vec<u8>>> {
        let Some(root) = self.root else {
            return Ok(None);
        };
        self.get_at(dao, root, &to_nibbles(key))
    }

    fn get_at(
        &self,
        dao: &DataCache,
        node_hash: UInt256,
        path: &[u8],
    ) -> MptResult<Option<Vec<u8>>> {
        match resolve(dao, node_hash)? {
            Node::Leaf {
                path: leaf_path,
                value,
            } => Ok((leaf_path == path).then_some(value)),
            Node::Extension {
                path: ext_path,
                child,
            } => match path.strip_prefix(ext_path.as_slice()) {
                Some(rest) => self.get_at(dao, child, rest),
                None => Ok(None),
            },
            Node::Branch { children, value } => match path.split_first() {
                None => Ok(value),
                Some((nibble, rest)) => match children[*nibble as usize] {
                    Some(child) => self.get_at(dao, child, rest),
                    None => Ok(None),
                },
            },
        }
    }

    /// Inserts or replaces the value under `key`.
    pub fn put(&mut self, dao: &mut DataCache, key: &[u8], value: &[u8]) -> MptResult<()> {
        let path = to_nibbles(key);
        let new_root = self.insert_at(dao, self.root, &path, value)?;
        self.root = Some(new_root);
        Ok(())
    }

    fn insert_at(
        &self,
        dao: &mut DataCache,
        node_hash: Option<UInt256>,
        path: &[u8],
        value: &[u8],
    ) -> MptResult<UInt256> {
        let node = match node_hash {
            None => {
                return Ok(write(
                    dao,
                    Node::Leaf {
                        path: path.to_vec(),
                        value: value.to_vec(),
                    },
                ))
            }
            Some(hash) => resolve(dao, hash)?,
        };
        let new_node = match node {
            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                if leaf_path == path {
                    Node::Leaf {
                        path: path.to_vec(),
                        value: value.to_vec(),
                    }
                } else {
                    self.split(dao, &leaf_path, Split::Value(leaf_value), path, value)?
                }
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                if let Some(rest) = path.strip_prefix(ext_path.as_slice()) {
                    let new_child = self.insert_at(dao, Some(child), rest, value)?;
                    Node::Extension {
                        path: ext_path,
                        child: new_child,
                    }
                } else {
                    self.split(dao, &ext_path, Split::Child(child), path, value)?
                }
            }
            Node::Branch {
                mut children,
                value: branch_value,
            } => match path.split_first() {
                None => Node::Branch {
                    children,
                    value: Some(value.to_vec()),
                },
                Some((nibble, rest)) => {
                    let slot = *nibble as usize;
                    let new_child = self.insert_at(dao, children[slot], rest, value)?;
                    children[slot] = Some(new_child);
                    Node::Branch {
                        children,
                        value: branch_value,
                    }
                }
            },
        };
        Ok(write(dao, new_node))
    }

    /// Builds the branch (optionally behind an extension) that separates an
    /// existing path from the inserted one at their first divergence.
    fn split(
        &self,
        dao: &mut DataCache,
        existing_path: &[u8],
        existing: Split,
        path: &[u8],
        value: &[u8],
    ) -> MptResult<Node> {
        let common = existing_path
            .iter()
            .zip(path.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let mut children: [Option<UInt256>; 16] = Default::default();
        let mut branch_value: Option<Vec<u8>> = None;

        // Re-anchor the pre-existing side below the divergence point.
        match existing_path.get(common) {
            Some(nibble) => {
                let remainder = &existing_path[common + 1..];
                let reanchored = match &existing {
                    Split::Value(existing_value) => write(
                        dao,
                        Node::Leaf {
                            path: remainder.to_vec(),
                            value: existing_value.clone(),
                        },
                    ),
                    Split::Child(child) => {
                        if remainder.is_empty() {
                            *child
                        } else {
                            write(
                                dao,
                                Node::Extension {
                                    path: remainder.to_vec(),
                                    child: *child,
                                },
                            )
                        }
                    }
                };
                children[*nibble as usize] = Some(reanchored);
            }
            None => match existing {
                Split::Value(existing_value) => branch_value = Some(existing_value),
                Split::Child(child) => {
                    // The whole extension path is a prefix of the new key,
                    // which insert_at handles before calling split.
                    return Err(MptError::Malformed(format!(
                        "extension prefix not consumed before split at {child}"
                    )));
                }
            },
        }

        // Anchor the new value.
        match path.get(common) {
            Some(nibble) => {
                let leaf = write(
                    dao,
                    Node::Leaf {
                        path: path[common + 1..].to_vec(),
                        value: value.to_vec(),
                    },
                );
                children[*nibble as usize] = Some(leaf);
            }
            None => branch_value = Some(value.to_vec()),
        }

        let branch = Node::Branch {
            children,
            value: branch_value,
        };
        if common == 0 {
            Ok(branch)
        } else {
            let branch_hash = write(dao, branch);
            Ok(Node::Extension {
                path: path[..common].to_vec(),
                child: branch_hash,
            })
        }
    }

    /// Removes the value under `key`; absent keys are a no-op.
    pub fn delete(&mut self, dao: &mut DataCache, key: &[u8]) -> MptResult<()> {
        let Some(root) = self.root else {
            return Ok(());
        };
        let path = to_nibbles(key);
        self.root = match self.delete_at(dao, root, &path)? {
            Some(node) => Some(write(dao, node)),
            None => None,
        };
        Ok(())
    }

    fn delete_at(
        &self,
        dao: &mut DataCache,
        node_hash: UInt256,
        path: &[u8],
    ) -> MptResult<Option<Node>> {
        match resolve(dao, node_hash)? {
            Node::Leaf {
                path: leaf_path,
                value,
            } => {
                if leaf_path == path {
                    Ok(None)
                } else {
                    Ok(Some(Node::Leaf {
                        path: leaf_path,
                        value,
                    }))
                }
            }
            Node::Extension {
                path: ext_path,
                child,
            } => match path.strip_prefix(ext_path.as_slice()) {
                Some(rest) => match self.delete_at(dao, child, rest)? {
                    Some(new_child) => Ok(Some(self.join_extension(ext_path, new_child, dao)?)),
                    None => Ok(None),
                },
                None => Ok(Some(Node::Extension {
                    path: ext_path,
                    child,
                })),
            },
            Node::Branch {
                mut children,
                value,
            } => {
                match path.split_first() {
                    None => {
                        self.collapse_branch(dao, children, None)
                    }
                    Some((nibble, rest)) => {
                        let slot = *nibble as usize;
                        let Some(child) = children[slot] else {
                            return Ok(Some(Node::Branch { children, value }));
                        };
                        children[slot] = match self.delete_at(dao, child, rest)? {
                            Some(new_child) => Some(write(dao, new_child)),
                            None => None,
                        };
                        self.collapse_branch(dao, children, value)
                    }
                }
            }
        }
    }

    /// Rebuilds a branch after a removal, collapsing single-exit branches
    /// into extensions or leaves.
    fn collapse_branch(
        &self,
        dao: &mut DataCache,
        children: [Option<UInt256>; 16],
        value: Option<Vec<u8>>,
    ) -> MptResult<Option<Node>> {
        let occupied: Vec<usize> = children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|_| i))
            .collect();
        match (occupied.len(), &value) {
            (0, None) => Ok(None),
            (0, Some(v)) => Ok(Some(Node::Leaf {
                path: Vec::new(),
                value: v.clone(),
            })),
            (1, None) => {
                let slot = occupied[0];
                let child = children[slot].expect("slot listed as occupied");
                let prefix = vec![slot as u8];
                Ok(Some(self.join_extension(prefix, resolve(dao, child)?, dao)?))
            }
            _ => Ok(Some(Node::Branch { children, value })),
        }
    }

    /// Prepends `prefix` nibbles onto a node, merging adjacent shortcuts.
    fn join_extension(
        &self,
        prefix: Vec<u8>,
        node: Node,
        dao: &mut DataCache,
    ) -> MptResult<Node> {
        if prefix.is_empty() {
            return Ok(node);
        }
        Ok(match node {
            Node::Leaf { path, value } => {
                let mut joined = prefix;
                joined.extend_from_slice(&path);
                Node::Leaf {
                    path: joined,
                    value,
                }
            }
            Node::Extension { path, child } => {
                let mut joined = prefix;
                joined.extend_from_slice(&path);
                Node::Extension {
                    path: joined,
                    child,
                }
            }
            branch @ Node::Branch { .. } => {
                let child = write(dao, branch);
                Node::Extension {
                    path: prefix,
                    child,
                }
            }
        })
    }
}

fn resolve(dao: &DataCache, hash: UInt256) -> MptResult<Node> {
    let bytes = dao
        .get_mpt_node(&hash)?
        .ok_or(MptError::MissingNode(hash))?;
    Node::from_bytes(&bytes)
}

fn write(dao: &mut DataCache, node: Node) -> UInt256 {
    let hash = node.hash();
    dao.put_mpt_node(&hash, node.to_bytes());
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo3_persistence::MemoryStore;
    use std::sync::Arc;

    fn fresh() -> (Trie, DataCache) {
        (Trie::new(None), DataCache::new(Arc::new(MemoryStore::new())))
    }

    #[test]
    fn put_then_get() {
        let (mut trie, mut dao) = fresh();
        trie.put(&mut dao, b"alpha", b"1").unwrap();
        trie.put(&mut dao, b"alps", b"2").unwrap();
        trie.put(&mut dao, b"beta", b"3").unwrap();
        assert_eq!(trie.get(&dao, b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(trie.get(&dao, b"alps").unwrap(), Some(b"2".to_vec()));
        assert_eq!(trie.get(&dao, b"beta").unwrap(), Some(b"3".to_vec()));
        assert_eq!(trie.get(&dao, b"alp").unwrap(), None);
    }

    #[test]
    fn overwrite_moves_root() {
        let (mut trie, mut dao) = fresh();
        trie.put(&mut dao, b"k", b"v1").unwrap();
        let first = trie.root_hash();
        trie.put(&mut dao, b"k", b"v2").unwrap();
        assert_ne!(trie.root_hash(), first);
        assert_eq!(trie.get(&dao, b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn root_is_insertion_order_independent() {
        let (mut a, mut dao_a) = fresh();
        a.put(&mut dao_a, b"one", b"1").unwrap();
        a.put(&mut dao_a, b"two", b"2").unwrap();
        a.put(&mut dao_a, b"three", b"3").unwrap();

        let (mut b, mut dao_b) = fresh();
        b.put(&mut dao_b, b"three", b"3").unwrap();
        b.put(&mut dao_b, b"one", b"1").unwrap();
        b.put(&mut dao_b, b"two", b"2").unwrap();

        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn delete_restores_previous_root() {
        let (mut trie, mut dao) = fresh();
        trie.put(&mut dao, b"stay", b"1").unwrap();
        let before = trie.root_hash();
        trie.put(&mut dao, b"gone", b"2").unwrap();
        assert_ne!(trie.root_hash(), before);
        trie.delete(&mut dao, b"gone").unwrap();
        assert_eq!(trie.root_hash(), before);
        assert_eq!(trie.get(&dao, b"stay").unwrap(), Some(b"1".to_vec()));
        assert_eq!(trie.get(&dao, b"gone").unwrap(), None);
    }

    #[test]
    fn delete_to_empty() {
        let (mut trie, mut dao) = fresh();
        trie.put(&mut dao, b"only", b"1").unwrap();
        trie.delete(&mut dao, b"only").unwrap();
        assert_eq!(trie.root_hash(), UInt256::zero());
    }

    #[test]
    fn missing_delete_is_noop() {
        let (mut trie, mut dao) = fresh();
        trie.put(&mut dao, b"k", b"v").unwrap();
        let root = trie.root_hash();
        trie.delete(&mut dao, b"absent").unwrap();
        assert_eq!(trie.root_hash(), root);
    }
}
