//! DSL error types.
//!
//! Only conditions the caller can act on are errors.  Misuse of the DSL
//! itself (unused expressions, unbalanced scopes, leaked local bits) is a
//! bug in the generator and is caught by debug assertions instead.

use thiserror::Error;

use qwasm_ir::IrError;

#[derive(Debug, Error)]
pub enum DslError {
    #[error("a module is already active on this thread")]
    ModuleAlreadyActive,

    #[error("function `{0}` is still being generated")]
    FunctionStillOpen(String),

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown exception kind: {0}")]
    UnknownExceptionKind(u64),

    #[error("garbage-collected data was registered with a different type")]
    GarbageTypeMismatch,

    #[error("pre-allocation of {bytes} bytes exceeds the 32-bit address space")]
    AddressSpaceExhausted { bytes: u64 },

    #[error("{required} pages of memory needed, maximum is {maximum:?}")]
    MemoryLimit { required: u64, maximum: Option<u64> },
}

/// Convenience alias used throughout the DSL crate.
pub type DslResult<T> = Result<T, DslError>;
