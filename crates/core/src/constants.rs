//! Protocol constants that never vary between networks.

/// Maximum encoded size of a transaction in bytes.
pub const MAX_TRANSACTION_SIZE: usize = 102_400;

/// Maximum number of blocks a transaction may stay valid after submission.
pub const MAX_VALID_UNTIL_BLOCK_INCREMENT: u32 = 5760;

/// Maximum number of signers (and therefore witnesses) per transaction.
pub const MAX_SIGNERS: usize = 16;

/// Maximum number of attributes per transaction.
pub const MAX_ATTRIBUTES: usize = 16;

/// Maximum number of transactions in one block.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 512;

/// Maximum size of a contract-specified storage key.
pub const MAX_STORAGE_KEY_SIZE: usize = 64;

/// Maximum size of a stored value.
pub const MAX_STORAGE_VALUE_SIZE: usize = 65_535;

/// Maximum size of the data field of an extensible payload.
pub const MAX_EXTENSIBLE_DATA_SIZE: usize = 0xFFFF;

/// Upper bound on invocation/verification script sizes inside a witness.
pub const MAX_WITNESS_SCRIPT_SIZE: usize = 1024;
