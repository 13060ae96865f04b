//! Primitive chain types for the neo3 node.
//!
//! Hashes, keys, witnesses, transactions, blocks and the broadcast payloads
//! shared by every other crate in the workspace.

pub mod block;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod extensible;
pub mod merkle;
pub mod signer;
pub mod state_root;
pub mod transaction;
pub mod uint160;
pub mod uint256;
pub mod witness;

pub use block::{Block, BlockHeader};
pub use crypto::ECPoint;
pub use error::{CoreError, CoreResult};
pub use extensible::ExtensiblePayload;
pub use signer::{Signer, WitnessScope};
pub use state_root::MPTRoot;
pub use transaction::{
    AttributeType, OracleResponseCode, Transaction, TransactionAttribute,
};
pub use uint160::UInt160;
pub use uint256::UInt256;
pub use witness::Witness;
