//! Errors raised while running a generated module.

use thiserror::Error;

use qwasm_dsl::ExceptionKind;

#[derive(Debug, Error)]
pub enum InterpError {
    #[error(transparent)]
    Wasmi(#[from] wasmi::Error),

    /// A host import could not be defined.
    #[error("link error: {0}")]
    Link(String),

    /// The binary could not be parsed.
    #[error("malformed module: {0}")]
    Parse(#[from] wasmparser::BinaryReaderError),

    /// The embedded message table is unreadable.
    #[error("bad message table: {0}")]
    Messages(#[from] qwasm_dsl::DslError),

    /// A runtime check failed.
    #[error("insist failed at {file}:{line}{}", fmt_message(.message))]
    Insist {
        file: String,
        line: u32,
        message: Option<String>,
    },

    /// Generated code threw an exception.
    #[error("{kind} thrown at {file}:{line}{}", fmt_message(.message))]
    Exception {
        kind: ExceptionKind,
        file: String,
        line: u32,
        message: Option<String>,
    },

    /// Execution trapped without a report from generated code.
    #[error("trap: {0}")]
    Trap(String),

    #[error("missing export `{0}`")]
    MissingExport(String),

    #[error("memory access out of bounds: {len} bytes at {offset}")]
    MemoryAccess { offset: usize, len: usize },
}

fn fmt_message(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}

/// Convenience alias used throughout the interpreter crate.
pub type InterpResult<T> = Result<T, InterpError>;
