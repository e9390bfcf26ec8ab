//! IR lowering error types.

use thiserror::Error;

/// Errors raised while lowering an IR module to a WASM binary.
#[derive(Debug, Error)]
pub enum IrError {
    /// A call, global access or branch names something that does not exist.
    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    /// Malformed tree, e.g. an operator applied to a type it has no
    /// instruction for.
    #[error("internal IR error: {0}")]
    Internal(String),

    /// The produced binary was rejected by `wasmparser`.
    #[error("WASM validation failed: {0}")]
    ValidationFailed(String),
}

/// Convenience alias used throughout the IR crate.
pub type IrResult<T> = Result<T, IrError>;
