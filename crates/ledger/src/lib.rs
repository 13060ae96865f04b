//! The ledger: mempool, blockchain orchestrator and state-root service.

pub mod blockchain;
pub mod mempool;
pub mod stateroot;

pub use blockchain::{Blockchain, ChainError, ChainEvent, ChainResult, VerifyError};
pub use mempool::{Feer, MempoolError, Pool};
pub use stateroot::{RelayCallback, StateRootError, StateRootService};
