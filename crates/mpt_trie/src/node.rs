//! Trie node taxonomy and its content-addressed encoding.

use neo3_core::crypto::sha256;
use neo3_core::UInt256;
use neo3_io::{BinaryWriter, MemoryReader};

use crate::{MptError, MptResult};

const TAG_LEAF: u8 = 0x01;
const TAG_EXTENSION: u8 = 0x02;
const TAG_BRANCH: u8 = 0x03;

/// Longest nibble path a node can carry: a full storage key.
const MAX_PATH_NIBBLES: usize = 2 * (1 + 4 + 64);

/// Largest stored value; mirrors the contract storage bound.
const MAX_NODE_VALUE: usize = 65_535;

/// One node of the trie. Children are referenced by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Terminal node holding a value at the end of `path`.
    Leaf { path: Vec<u8>, value: Vec<u8> },
    /// Shared-prefix shortcut to a single child.
    Extension { path: Vec<u8>, child: UInt256 },
    /// Sixteen-way fork, optionally holding the value terminating here.
    Branch {
        children: [Option<UInt256>; 16],
        value: Option<Vec<u8>>,
    },
}

impl Node {
    /// Canonical encoding, the preimage of the node hash.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        // Buffer appends cannot fail.
        let _ = match self {
            Node::Leaf { path, value } => {
                let _ = writer.write_u8(TAG_LEAF);
                let _ = writer.write_var_bytes(path);
                writer.write_var_bytes(value)
            }
            Node::Extension { path, child } => {
                let _ = writer.write_u8(TAG_EXTENSION);
                let _ = writer.write_var_bytes(path);
                writer.write_bytes(child.as_bytes())
            }
            Node::Branch { children, value } => {
                let _ = writer.write_u8(TAG_BRANCH);
                for child in children {
                    match child {
                        Some(hash) => {
                            let _ = writer.write_u8(1);
                            let _ = writer.write_bytes(hash.as_bytes());
                        }
                        None => {
                            let _ = writer.write_u8(0);
                        }
                    }
                }
                match value {
                    Some(value) => {
                        let _ = writer.write_u8(1);
                        writer.write_var_bytes(value)
                    }
                    None => writer.write_u8(0),
                }
            }
        };
        writer.into_bytes()
    }

    /// Decodes a node from its canonical encoding.
    pub fn from_bytes(bytes: &[u8]) -> MptResult<Node> {
        let mut reader = MemoryReader::new(bytes);
        let tag = reader.read_u8().map_err(|e| MptError::Malformed(e.to_string()))?;
        let node = match tag {
            TAG_LEAF => Node::Leaf {
                path: reader
                    .read_var_bytes(MAX_PATH_NIBBLES)
                    .map_err(|e| MptError::Malformed(e.to_string()))?,
                value: reader
                    .read_var_bytes(MAX_NODE_VALUE)
                    .map_err(|e| MptError::Malformed(e.to_string()))?,
            },
            TAG_EXTENSION => {
                let path = reader
                    .read_var_bytes(MAX_PATH_NIBBLES)
                    .map_err(|e| MptError::Malformed(e.to_string()))?;
                let child = reader
                    .read_array::<32>()
                    .map_err(|e| MptError::Malformed(e.to_string()))?;
                Node::Extension {
                    path,
                    child: UInt256(child),
                }
            }
            TAG_BRANCH => {
                let mut children: [Option<UInt256>; 16] = Default::default();
                for slot in children.iter_mut() {
                    let present = reader
                        .read_u8()
                        .map_err(|e| MptError::Malformed(e.to_string()))?;
                    if present == 1 {
                        let hash = reader
                            .read_array::<32>()
                            .map_err(|e| MptError::Malformed(e.to_string()))?;
                        *slot = Some(UInt256(hash));
                    }
                }
                let has_value = reader
                    .read_u8()
                    .map_err(|e| MptError::Malformed(e.to_string()))?;
                let value = if has_value == 1 {
                    Some(
                        reader
                            .read_var_bytes(MAX_NODE_VALUE)
                            .map_err(|e| MptError::Malformed(e.to_string()))?,
                    )
                } else {
                    None
                };
                Node::Branch { children, value }
            }
            other => {
                return Err(MptError::Malformed(format!("unknown node tag {other:#x}")))
            }
        };
        Ok(node)
    }

    /// Content hash of the node.
    pub fn hash(&self) -> UInt256 {
        UInt256(sha256(&self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_kinds() {
        let leaf = Node::Leaf {
            path: vec![1, 2, 3],
            value: b"value".to_vec(),
        };
        let extension = Node::Extension {
            path: vec![0xA],
            child: leaf.hash(),
        };
        let mut children: [Option<UInt256>; 16] = Default::default();
        children[3] = Some(extension.hash());
        let branch = Node::Branch {
            children,
            value: Some(b"at-branch".to_vec()),
        };

        for node in [leaf, extension, branch] {
            let decoded = Node::from_bytes(&node.to_bytes()).unwrap();
            assert_eq!(decoded, node);
            assert_eq!(decoded.hash(), node.hash());
        }
    }

    #[test]
    fn hash_depends_on_content() {
        let a = Node::Leaf {
            path: vec![1],
            value: b"x".to_vec(),
        };
        let b = Node::Leaf {
            path: vec![1],
            value: b"y".to_vec(),
        };
        assert_ne!(a.hash(), b.hash());
    }
}
