//! Typed embedded DSL for generating WebAssembly.
//!
//! # Architecture
//!
//! Generation code builds a program by calling into a [`Module`], the
//! compilation context that every construction call receives explicitly.
//! Values are typed expressions over the primitive types `bool`, `i8`..`i64`,
//! `u8`..`u64`, `f32` and `f64`, plus typed pointers into linear memory:
//!
//! - [`PrimitiveExpr<T>`]: one IR node of type `T`, consumed by use
//! - [`Expr<T>`]: a value plus an optional NULL flag (SQL three-valued logic)
//! - [`PtrExpr<T>`], [`Reference<T>`], [`ConstReference<T>`]: memory access
//!
//! Statements are appended to the active block in call order.  Control flow
//! ([`If`], [`Loop`], [`DoWhile`], [`While`]) takes its bodies as closures,
//! so scopes are balanced on every exit path.
//!
//! ## Storage
//! - `Var<bool>` is one bit of a shared `i64` local (see [`local_bit`])
//! - other locals get their own slot; nullable locals add a NULL bit
//! - [`Global<T>`] is a module global addressed by name
//!
//! ## Runtime errors
//! Generated code reports failures through two host imports from the
//! `imports` module: `insist(message_index)` and `throw(kind, message_index)`.
//! The message table is embedded as the custom section `qwasm.messages`.
//!
//! ```ignore
//! let mut m = Module::new()?;
//! let add = Function::<(i32, i32), i32>::build(&mut m, "add", |m, f| {
//!     let (a, b) = f.parameters();
//!     f.emit_return(m, a.val() + b.val());
//! });
//! add.export(&mut m);
//! let wasm = m.binary()?;
//! ```

pub mod allocator;
pub mod config;
pub mod control;
pub mod error;
pub mod exception;
pub mod expr;
pub mod function;
pub mod local_bit;
pub mod messages;
pub mod module;
pub mod types;
pub mod variable;

pub use allocator::{memory_grow, memory_size, Allocator, BumpAllocator};
pub use config::ModuleConfig;
pub use control::{DoWhile, If, IntoCondition, Loop, While};
pub use error::{DslError, DslResult};
pub use exception::ExceptionKind;
pub use expr::{select, ConstReference, Expr, IntoExpr, IntoPrimitive, PrimitiveExpr, PtrExpr, Reference};
pub use function::{Function, FunctionProxy};
pub use messages::{Message, MessageTable, MESSAGES_SECTION};
pub use module::{GcHandle, Module, IMPORT_MODULE};
pub use types::{Ptr, Void};
pub use variable::{Global, NullableVar, Parameter, Var};

/// Check `cond` at runtime when debug checks are enabled.  A failure calls
/// the host's `insist` with the location of the macro call and the
/// optional message, then traps.
///
/// ```ignore
/// wasm_insist!(m, len.val().le(capacity), "buffer overflow");
/// ```
#[macro_export]
macro_rules! wasm_insist {
    (@emit $m:expr, $cond:expr, $msg:expr) => {{
        let m: &mut $crate::Module = $m;
        let cond = $crate::IntoCondition::into_condition($cond, m);
        if m.config().debug_checks {
            m.emit_insist(cond, file!(), line!(), $msg);
        } else {
            cond.discard(m);
        }
    }};
    ($m:expr, $cond:expr $(,)?) => {
        $crate::wasm_insist!(@emit $m, $cond, None)
    };
    ($m:expr, $cond:expr, $msg:expr $(,)?) => {
        $crate::wasm_insist!(@emit $m, $cond, Some($msg))
    };
}

/// Throw an exception of the given [`ExceptionKind`] through the host's
/// `throw` callback.
///
/// ```ignore
/// wasm_throw!(m, ExceptionKind::OutOfBounds, "index out of range");
/// ```
#[macro_export]
macro_rules! wasm_throw {
    ($m:expr, $kind:expr $(,)?) => {{
        let m: &mut $crate::Module = $m;
        m.emit_throw($kind, file!(), line!(), None)
    }};
    ($m:expr, $kind:expr, $msg:expr $(,)?) => {{
        let m: &mut $crate::Module = $m;
        m.emit_throw($kind, file!(), line!(), Some($msg))
    }};
}
