//! Typed expressions.
//!
//! - [`PrimitiveExpr<T>`] wraps one IR node of a scalar type
//! - [`PtrExpr<T>`] is a pointer: an address plus a static byte offset
//! - [`Expr<T>`] adds an optional NULL flag (SQL three-valued logic)
//!
//! All three are single-use: every operation consumes its operands, and
//! [`Clone`] is the only way to duplicate the underlying tree.

mod convert;
mod nullable;
mod pointer;
mod primitive;

use std::rc::Rc;

use qwasm_ir::Expression;

use crate::local_bit::LocalBit;

pub use nullable::{Expr, NULL_HASH};
pub use pointer::{ConstReference, PtrExpr, Reference};
pub use primitive::PrimitiveExpr;

pub(crate) use convert::{convert, normalize};

/// Local bits an expression reads.  Holding them keeps the bits allocated
/// until the expression has been emitted.
pub type Bits = Vec<Rc<LocalBit>>;

/// Conversion between a typed expression and its raw IR node.
pub trait RawExpr: Sized {
    /// Give up the typed wrapper, yielding the node and the bits it reads.
    fn into_raw(self) -> (Expression, Bits);

    /// Wrap an IR node producing a value of the right stack type.
    fn from_raw(expr: Expression, bits: Bits) -> Self;
}

/// Values usable where a [`PrimitiveExpr`] is expected: expressions and
/// host constants.
pub trait IntoPrimitive {
    type Ty: crate::types::Primitive;

    fn into_primitive(self) -> PrimitiveExpr<Self::Ty>;
}

/// Values usable where an [`Expr`] is expected: nullable expressions,
/// primitive expressions and host constants.
pub trait IntoExpr {
    type Ty: crate::types::Primitive;

    fn into_expr(self) -> Expr<Self::Ty>;
}

/// Expressions that can be chosen between with a `select` instruction.
pub trait Selectable: Sized {
    fn select(cond: PrimitiveExpr<bool>, if_true: Self, if_false: Self) -> Self;
}

/// `cond ? if_true : if_false` without control flow.  Both arms are always
/// evaluated.
pub fn select<S: Selectable>(cond: PrimitiveExpr<bool>, if_true: S, if_false: S) -> S {
    S::select(cond, if_true, if_false)
}
