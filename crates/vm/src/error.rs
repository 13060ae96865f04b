//! Virtual machine errors.

use thiserror::Error;

/// Errors that fault the executing context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),

    #[error("instruction pointer {0} out of script bounds")]
    InvalidInstructionPointer(usize),

    #[error("evaluation stack underflow")]
    StackUnderflow,

    #[error("stack size limit exceeded: {0} reachable items")]
    StackOverflow(usize),

    #[error("invocation depth limit exceeded")]
    InvocationOverflow,

    #[error("item does not support {0}")]
    InvalidCast(&'static str),

    #[error("integer out of the 256-bit range")]
    IntegerOverflow,

    #[error("item size limit exceeded")]
    ItemTooLarge,

    #[error("gas limit of {limit} exceeded at {consumed}")]
    GasExhausted { limit: i64, consumed: i64 },

    #[error("unknown interop service {0:#010x}")]
    UnknownSyscall(u32),

    #[error("syscall requires call flags {required:#04x}, current {current:#04x}")]
    MissingCallFlags { required: u8, current: u8 },

    #[error("ABORT executed")]
    Abort,

    #[error("ASSERT failed")]
    AssertFailed,

    #[error("division by zero")]
    DivisionByZero,

    #[error("key not found in map")]
    KeyNotFound,

    #[error("index {0} out of range")]
    IndexOutOfRange(i64),

    #[error("{0}")]
    InvalidOperation(String),
}

/// Result type for VM operations.
pub type VmResult<T> = std::result::Result<T, VmError>;
