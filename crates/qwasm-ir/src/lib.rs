//! Owned WebAssembly IR for the `qwasm` code generator.
//!
//! # Architecture
//!
//! The DSL crate builds programs as trees of [`Expression`]s and
//! [`Statement`]s grouped into labelled [`Block`]s.  Trees are owned values:
//! cloning one deep-copies it, and nothing refers to a node by index until
//! the module is lowered.
//!
//! [`ModuleBuilder`] collects functions, imports, globals, the linear memory,
//! exports and custom sections.  [`ModuleBuilder::finish`] resolves names to
//! indices, turns labelled branches into relative depths, encodes the module
//! with `wasm-encoder` and validates it with `wasmparser`.
//!
//! ## Name resolution
//! - functions: imports first (declaration order), then definitions
//! - globals: imports first, then definitions
//! - branch labels: innermost enclosing block/loop with that label

pub mod error;
pub mod lower;
pub mod module;
pub mod node;
pub mod optimize;

pub use error::{IrError, IrResult};
pub use module::{FunctionDef, MemoryDef, ModuleBuilder};
pub use node::{Access, BinaryOp, Block, Expression, Literal, NumType, Statement, UnaryOp};
pub use wasm_encoder::ValType;
