//! Nullable expressions with SQL three-valued logic.

use std::fmt;
use std::ops;

use qwasm_ir::BinaryOp;

use super::primitive::{signed_op, Common};
use super::{IntoExpr, PrimitiveExpr, Selectable};
use crate::module::Module;
use crate::types::{Arithmetic, Bitwise, CommonType, ConvertTo, Integral, Kind, Primitive};

/// Hash reserved for NULL.
pub const NULL_HASH: u64 = 1 << 63;

/// A value plus an optional NULL flag.
///
/// `is_null == None` means the value is statically known not to be NULL.
/// When the flag is set at runtime the value is unspecified.
pub struct Expr<T> {
    value: PrimitiveExpr<T>,
    is_null: Option<PrimitiveExpr<bool>>,
}

impl<T: Primitive> Expr<T> {
    /// A value that is never NULL.
    pub fn new(value: PrimitiveExpr<T>) -> Self {
        Self { value, is_null: None }
    }

    pub fn with_null(value: PrimitiveExpr<T>, is_null: PrimitiveExpr<bool>) -> Self {
        Self {
            value,
            is_null: Some(is_null),
        }
    }

    /// The NULL literal.
    pub fn null() -> Self {
        Self::with_null(PrimitiveExpr::new(T::default()), PrimitiveExpr::new(true))
    }

    /// Whether the expression may be NULL at runtime.
    pub fn can_be_null(&self) -> bool {
        self.is_null.is_some()
    }

    /// Value and NULL flag; the flag is the constant `false` if the
    /// expression cannot be NULL.
    pub fn split(self) -> (PrimitiveExpr<T>, PrimitiveExpr<bool>) {
        let is_null = self.is_null.unwrap_or_else(|| PrimitiveExpr::new(false));
        (self.value, is_null)
    }

    /// Value and NULL flag as stored.
    pub fn split_unsafe(self) -> (PrimitiveExpr<T>, Option<PrimitiveExpr<bool>>) {
        (self.value, self.is_null)
    }

    /// Whether the value is NULL.  The value itself is discarded.
    pub fn is_null(self, m: &mut Module) -> PrimitiveExpr<bool> {
        let (value, is_null) = self.split();
        value.discard(m);
        is_null
    }

    /// Whether the value is not NULL.  The value itself is discarded.
    pub fn not_null(self, m: &mut Module) -> PrimitiveExpr<bool> {
        !self.is_null(m)
    }

    /// The plain value.  With debug checks enabled a runtime check that the
    /// value is not NULL is emitted first.
    #[track_caller]
    pub fn insist_not_null(self, m: &mut Module) -> PrimitiveExpr<T> {
        let location = std::panic::Location::caller();
        let (value, is_null) = self.split_unsafe();
        if let Some(is_null) = is_null {
            if m.config().debug_checks {
                m.emit_insist(!is_null, location.file(), location.line(), Some("value must not be NULL"));
            } else {
                is_null.discard(m);
            }
        }
        value
    }

    /// Mark the expression as used.
    pub fn discard(self, m: &mut Module) {
        self.value.discard(m);
        if let Some(is_null) = self.is_null {
            is_null.discard(m);
        }
    }

    /// Apply `f` to the value, keeping the NULL flag.
    pub fn map<U: Primitive>(self, f: impl FnOnce(PrimitiveExpr<T>) -> PrimitiveExpr<U>) -> Expr<U> {
        Expr {
            value: f(self.value),
            is_null: self.is_null,
        }
    }

    /// Explicit conversion; NULL stays NULL.
    pub fn to<U: Primitive>(self) -> Expr<U>
    where
        T: ConvertTo<U>,
    {
        self.map(PrimitiveExpr::to)
    }

    /// Hash into a `u64`; NULL hashes to [`NULL_HASH`].
    pub fn hash(self) -> PrimitiveExpr<u64> {
        let (value, is_null) = self.split_unsafe();
        let hash = value.hash();
        match is_null {
            Some(is_null) => super::select(is_null, PrimitiveExpr::new(NULL_HASH), hash),
            None => hash,
        }
    }

    /// Combine two operands: the value by `f`, the NULL flags by OR.
    fn zip<U, O>(self, rhs: Expr<U>, f: impl FnOnce(PrimitiveExpr<T>, PrimitiveExpr<U>) -> PrimitiveExpr<O>) -> Expr<O>
    where
        U: Primitive,
        O: Primitive,
    {
        let is_null = match (self.is_null, rhs.is_null) {
            (None, None) => None,
            (Some(n), None) | (None, Some(n)) => Some(n),
            (Some(lhs), Some(rhs)) => Some(lhs.or(rhs)),
        };
        Expr {
            value: f(self.value, rhs.value),
            is_null,
        }
    }

    fn compare<R>(self, rhs: R, op: fn(Kind) -> BinaryOp) -> Expr<bool>
    where
        R: IntoExpr,
        T: CommonType<R::Ty>,
    {
        self.zip(rhs.into_expr(), |a, b| a.combine(b, op, false))
    }

    // ── Comparisons ──────────────────────────────────────────────────────

    pub fn eq<R>(self, rhs: R) -> Expr<bool>
    where
        R: IntoExpr,
        T: CommonType<R::Ty>,
    {
        self.compare(rhs, |_| BinaryOp::Eq)
    }

    pub fn ne<R>(self, rhs: R) -> Expr<bool>
    where
        R: IntoExpr,
        T: CommonType<R::Ty>,
    {
        self.compare(rhs, |_| BinaryOp::Ne)
    }

    pub fn lt<R>(self, rhs: R) -> Expr<bool>
    where
        R: IntoExpr,
        T: CommonType<R::Ty>,
    {
        self.compare(rhs, |k| signed_op(k, BinaryOp::LtS, BinaryOp::LtU))
    }

    pub fn le<R>(self, rhs: R) -> Expr<bool>
    where
        R: IntoExpr,
        T: CommonType<R::Ty>,
    {
        self.compare(rhs, |k| signed_op(k, BinaryOp::LeS, BinaryOp::LeU))
    }

    pub fn gt<R>(self, rhs: R) -> Expr<bool>
    where
        R: IntoExpr,
        T: CommonType<R::Ty>,
    {
        self.compare(rhs, |k| signed_op(k, BinaryOp::GtS, BinaryOp::GtU))
    }

    pub fn ge<R>(self, rhs: R) -> Expr<bool>
    where
        R: IntoExpr,
        T: CommonType<R::Ty>,
    {
        self.compare(rhs, |k| signed_op(k, BinaryOp::GeS, BinaryOp::GeU))
    }
}

// ── Kleene logic ────────────────────────────────────────────────────────────

impl Expr<bool> {
    /// Three-valued `AND`: FALSE wins over NULL.
    pub fn and(self, rhs: impl IntoExpr<Ty = bool>) -> Self {
        let rhs = rhs.into_expr();
        let (tv, tn) = self.split_unsafe();
        let (ov, on) = rhs.split_unsafe();
        let is_null = match (tn, on) {
            (None, None) => None,
            // NULL unless the other side is FALSE
            (Some(tn), None) => Some(tn.and(ov.clone())),
            (None, Some(on)) => Some(on.and(tv.clone())),
            (Some(tn), Some(on)) => {
                let either = tn.clone().or(on.clone());
                let this_not_false = tv.clone().or(tn);
                let other_not_false = ov.clone().or(on);
                Some(either.and(this_not_false).and(other_not_false))
            }
        };
        Expr {
            value: tv.and(ov),
            is_null,
        }
    }

    /// Three-valued `OR`: TRUE wins over NULL.
    pub fn or(self, rhs: impl IntoExpr<Ty = bool>) -> Self {
        let rhs = rhs.into_expr();
        let (tv, tn) = self.split_unsafe();
        let (ov, on) = rhs.split_unsafe();
        let is_null = match (tn, on) {
            (None, None) => None,
            // NULL unless the other side is TRUE
            (Some(tn), None) => Some(tn.and(!ov.clone())),
            (None, Some(on)) => Some(on.and(!tv.clone())),
            (Some(tn), Some(on)) => {
                let either = tn.clone().or(on.clone());
                let this_not_true = (!tv.clone()).or(tn);
                let other_not_true = (!ov.clone()).or(on);
                Some(either.and(this_not_true).and(other_not_true))
            }
        };
        Expr {
            value: tv.or(ov),
            is_null,
        }
    }

    /// TRUE and not NULL.
    pub fn is_true_and_not_null(self) -> PrimitiveExpr<bool> {
        match self.split_unsafe() {
            (value, None) => value,
            (value, Some(is_null)) => value.and(!is_null),
        }
    }

    /// FALSE and not NULL.
    pub fn is_false_and_not_null(self) -> PrimitiveExpr<bool> {
        match self.split_unsafe() {
            (value, None) => !value,
            (value, Some(is_null)) => (!value).and(!is_null),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Operators
// ══════════════════════════════════════════════════════════════════════════════

macro_rules! binary_operator {
    ($($trait:ident, $method:ident, $bound:ident;)*) => {$(
        impl<T, R> ops::$trait<R> for Expr<T>
        where
            R: IntoExpr,
            T: CommonType<R::Ty>,
            Common<T, R::Ty>: $bound,
        {
            type Output = Expr<Common<T, R::Ty>>;

            fn $method(self, rhs: R) -> Self::Output {
                self.zip(rhs.into_expr(), |a, b| ops::$trait::$method(a, b))
            }
        }
    )*};
}

binary_operator! {
    Add, add, Arithmetic;
    Sub, sub, Arithmetic;
    Mul, mul, Arithmetic;
    Div, div, Arithmetic;
    Rem, rem, Integral;
    Shl, shl, Integral;
    Shr, shr, Integral;
    BitAnd, bitand, Bitwise;
    BitOr, bitor, Bitwise;
    BitXor, bitxor, Bitwise;
}

impl<T: Arithmetic> ops::Neg for Expr<T> {
    type Output = Self;

    fn neg(self) -> Self {
        self.map(|v| -v)
    }
}

impl<T: Bitwise> ops::Not for Expr<T> {
    type Output = Self;

    /// NOT NULL is NULL.
    fn not(self) -> Self {
        self.map(|v| !v)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Plumbing
// ══════════════════════════════════════════════════════════════════════════════

impl<T> Clone for Expr<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            is_null: self.is_null.clone(),
        }
    }
}

impl<T: Primitive> fmt::Debug for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expr")
            .field("value", &self.value)
            .field("is_null", &self.is_null)
            .finish()
    }
}

impl<T: Primitive> From<PrimitiveExpr<T>> for Expr<T> {
    fn from(value: PrimitiveExpr<T>) -> Self {
        Self::new(value)
    }
}

impl<T: Primitive> IntoExpr for Expr<T> {
    type Ty = T;

    fn into_expr(self) -> Self {
        self
    }
}

impl<T: Primitive> Selectable for Expr<T> {
    /// Values and NULL flags are selected separately.
    fn select(cond: PrimitiveExpr<bool>, if_true: Self, if_false: Self) -> Self {
        if !if_true.can_be_null() && !if_false.can_be_null() {
            return Expr::new(PrimitiveExpr::select(cond, if_true.value, if_false.value));
        }
        let (tv, tnull) = if_true.split();
        let (fv, fnull) = if_false.split();
        let is_null = PrimitiveExpr::select(cond.clone(), tnull, fnull);
        Expr::with_null(PrimitiveExpr::select(cond, tv, fv), is_null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qwasm_ir::Expression;

    fn local<T: Primitive>(index: u32) -> PrimitiveExpr<T> {
        PrimitiveExpr::from_ir(Expression::LocalGet(index), Vec::new())
    }

    fn nullable<T: Primitive>(value: u32, null: u32) -> Expr<T> {
        Expr::with_null(local(value), local(null))
    }

    fn finish<T: Primitive>(e: Expr<T>) -> (Expression, Option<Expression>) {
        let (value, is_null) = e.split_unsafe();
        (value.into_parts().0, is_null.map(|n| n.into_parts().0))
    }

    #[test]
    fn non_nullable_operands_stay_non_nullable() {
        let sum = Expr::new(local::<i32>(0)) + 5;
        assert!(!sum.can_be_null());
        finish(sum);
    }

    #[test]
    fn single_null_flag_passes_through() {
        let sum = nullable::<i32>(0, 1) + Expr::new(local::<i32>(2));
        let (_, is_null) = finish(sum);
        assert_eq!(is_null, Some(Expression::LocalGet(1)));
    }

    #[test]
    fn two_null_flags_are_or_ed() {
        let sum = nullable::<i64>(0, 1) * nullable::<i64>(2, 3);
        let (_, is_null) = finish(sum);
        assert_eq!(
            is_null,
            Some(Expression::binary(
                BinaryOp::Or,
                qwasm_ir::NumType::I32,
                Expression::LocalGet(1),
                Expression::LocalGet(3)
            ))
        );
    }

    #[test]
    fn comparison_of_nullable_is_nullable() {
        let cmp = nullable::<u16>(0, 1).lt(7u16);
        assert!(cmp.can_be_null());
        finish(cmp);
    }

    #[test]
    fn and_without_nulls_is_plain_and() {
        let e = Expr::new(local::<bool>(0)).and(local::<bool>(1));
        assert!(!e.can_be_null());
        finish(e);
    }
}
