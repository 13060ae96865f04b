//! The deterministic stack machine executing compiled contract bytecode.
//!
//! The machine has no I/O of its own: every interaction with the host goes
//! through the interop hook table, and a `SYSCALL` yields control back to the
//! embedding engine after gas and call-flag checks have passed.

pub mod call_flags;
pub mod error;
pub mod evaluation_stack;
pub mod execution_context;
pub mod execution_engine;
pub mod interop_service;
pub mod op_code;
pub mod reference_counter;
pub mod script;
pub mod stack_item;

pub use call_flags::CallFlags;
pub use error::{VmError, VmResult};
pub use evaluation_stack::EvaluationStack;
pub use execution_context::{ExecutionContext, TryState};
pub use execution_engine::{ExecutionEngine, ExecutionLimits, StepOutcome, VMState};
pub use interop_service::{interop_id, InteropDescriptor, InteropService};
pub use op_code::OpCode;
pub use reference_counter::ReferenceCounter;
pub use script::{Instruction, Script, ScriptBuilder};
pub use stack_item::{StackItem, StackItemType};
