//! Persistent state access for the neo3 node.
//!
//! The [`Store`] trait is the seam to the on-disk key-value backend; the node
//! ships the in-memory driver and treats embedded databases as external
//! collaborators. The DAO ([`DataCache`]) layers typed accessors and a
//! stacked write overlay on top of whatever driver is plugged in.

pub mod dao;
pub mod store;

pub use dao::{storage_key, DataCache, StoragePrefix};
pub use store::{BatchOp, MemoryStore, Store};

use thiserror::Error;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing driver failed; fatal for the current operation.
    #[error("storage failure: {0}")]
    Backend(String),

    /// Persisted bytes do not decode as the expected type.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A commit was attempted on a cache with no parent.
    #[error("state inconsistency: {0}")]
    Inconsistency(String),
}

impl From<neo3_io::IoError> for StorageError {
    fn from(err: neo3_io::IoError) -> Self {
        StorageError::Corruption(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
