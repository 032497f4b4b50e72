//! WebAssembly runtime
//!
//! Linear memory, tables, globals, the interpreter and the instantiation
//! pipeline that ties them to a decoded [`Module`](crate::parser::module::Module).

pub mod control;
pub mod executor;
pub mod frame;
pub mod imports;
pub mod instance;
pub mod memory;
pub mod ops;
pub mod stack;
pub mod store;
pub mod table;
pub(crate) mod test_utils;
pub mod value;

pub use imports::{Caller, Extern, HostError, HostFunction, ImportDescriptor, Imports};
pub use instance::Instance;
pub use memory::Memory;
pub use table::Table;
pub use value::Value;

use crate::parser::module::ValueType;

/// Failures raised while allocating or running an instance.
///
/// Everything except the allocation variants is a trap: guest execution
/// stops and the error surfaces to the caller of `invoke`.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("unreachable executed")]
    Unreachable,

    #[error("integer divide by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("invalid conversion to integer")]
    InvalidConversion,

    #[error("out of bounds memory access")]
    MemoryOutOfBounds,

    #[error("out of bounds table access")]
    TableOutOfBounds,

    #[error("undefined element {0}")]
    UndefinedElement(u32),

    #[error("uninitialized element {0}")]
    UninitializedElement(u32),

    #[error("indirect call type mismatch: expected {expected}, got {actual}")]
    IndirectCallTypeMismatch { expected: String, actual: String },

    #[error("call stack exhausted")]
    CallStackExhausted,

    /// A host import reported failure; `message` is the host's own text.
    #[error("{function}: {message}")]
    HostTrap { function: String, message: String },

    #[error("stack underflow")]
    StackUnderflow,

    /// An index that validation should have rejected
    #[error("invalid {0} index {1}")]
    InvalidIndex(&'static str, u32),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: ValueType, actual: ValueType },

    #[error("memory of {requested} pages exceeds the limit of {limit} pages")]
    MemoryLimitExceeded { requested: u32, limit: u32 },

    #[error("failed to allocate {0} bytes of linear memory")]
    AllocationFailed(usize),
}

impl RuntimeError {
    /// Allocation failures are reported as resource errors rather than traps.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            RuntimeError::MemoryLimitExceeded { .. } | RuntimeError::AllocationFailed(_)
        )
    }
}
