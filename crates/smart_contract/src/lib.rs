//! Contract model and execution host for the neo3 node.
//!
//! Everything above the raw VM and below the ledger: manifests, contract
//! state, the application engine that resolves syscalls, and the native
//! contracts dispatched through the same interop table as deployed code.

pub mod application_engine;
pub mod contract;
pub mod contract_state;
pub mod exec_result;
pub mod interop;
pub mod manifest;
pub mod native;

pub use application_engine::{ApplicationEngine, Trigger};
pub use contract::{
    create_default_multisig_script, create_majority_multisig_script,
    create_signature_script, default_multisig_address, majority_multisig_address,
};
pub use contract_state::{ContractState, NefFile};
pub use exec_result::{AppExecResult, AppStackItem, NotificationEvent};
pub use interop::InteropContext;
pub use manifest::ContractManifest;
pub use native::{NativeContract, NativeMethod, NativeRegistry, Role};

use thiserror::Error;

/// Errors raised by the contract layer.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("storage failure: {0}")]
    Storage(#[from] neo3_persistence::StorageError),

    #[error("codec error: {0}")]
    Io(#[from] neo3_io::IoError),

    #[error("vm error: {0}")]
    Vm(#[from] neo3_vm::VmError),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unknown contract {0}")]
    UnknownContract(neo3_core::UInt160),

    #[error("contract {0} has no method {1}/{2}")]
    UnknownMethod(neo3_core::UInt160, String, usize),

    #[error("witness check failed for {0}")]
    WitnessFailed(neo3_core::UInt160),

    #[error("{0}")]
    InvalidOperation(String),
}

/// Result type for contract-layer operations.
pub type ContractResult<T> = std::result::Result<T, ContractError>;
