//! Single-use scalar expressions.

use std::fmt;
use std::marker::PhantomData;
use std::ops;

use qwasm_ir::{BinaryOp, Expression, Literal, NumType, Statement, UnaryOp};

use super::{convert, normalize, Bits, Expr, IntoExpr, IntoPrimitive, RawExpr, Selectable};
use crate::module::Module;
use crate::types::{Arithmetic, Bitwise, CommonType, ConvertTo, Float, Integral, Kind, Primitive, Unsigned};

/// One IR node producing a value of type `T`, plus the local bits it reads.
///
/// A `PrimitiveExpr` must be used exactly once: by an operation, by being
/// stored or returned, or by [`discard`](Self::discard).  Dropping an unused
/// expression is a generator bug and trips a debug assertion.
pub struct PrimitiveExpr<T> {
    expr: Option<Expression>,
    bits: Bits,
    _ty: PhantomData<T>,
}

/// Result type of a binary operator on `T` and `U`.
pub(crate) type Common<T, U> = <T as CommonType<U>>::Output;

impl<T: Primitive> PrimitiveExpr<T> {
    /// A constant.
    pub fn new(value: T) -> Self {
        Self::from_ir(Expression::Const(T::literal(value)), Vec::new())
    }

    /// Wrap an existing node.  `expr` must produce a canonical value of `T`.
    pub fn from_ir(expr: Expression, bits: Bits) -> Self {
        Self {
            expr: Some(expr),
            bits,
            _ty: PhantomData,
        }
    }

    /// Consume the expression, yielding the node and the bits it reads.  The
    /// bits must be kept alive until the node has been emitted.
    pub fn into_parts(mut self) -> (Expression, Bits) {
        let bits = std::mem::take(&mut self.bits);
        match self.expr.take() {
            Some(expr) => (expr, bits),
            // moved-from values cannot be reached in safe code
            None => (Expression::Const(Literal::zero(T::KIND.num_type())), bits),
        }
    }

    /// The underlying node.
    pub fn ir(&self) -> Option<&Expression> {
        self.expr.as_ref()
    }

    /// The constant value, if the expression is a literal.
    pub fn constant(&self) -> Option<Literal> {
        self.expr.as_ref().and_then(Expression::as_const)
    }

    pub fn has_side_effects(&self) -> bool {
        self.expr.as_ref().is_some_and(Expression::has_side_effects)
    }

    /// Mark the expression as used.  Side effects are still executed.
    pub fn discard(self, m: &mut Module) {
        let (expr, _bits) = self.into_parts();
        if expr.has_side_effects() {
            m.emit(Statement::Drop(expr));
        }
    }

    /// Explicit conversion.
    pub fn to<U: Primitive>(self) -> PrimitiveExpr<U>
    where
        T: ConvertTo<U>,
    {
        self.convert()
    }

    /// Conversion without the type-level check; used where the rules
    /// are enforced elsewhere.
    pub(crate) fn convert<U: Primitive>(self) -> PrimitiveExpr<U> {
        let (expr, bits) = self.into_parts();
        PrimitiveExpr::from_ir(convert(expr, T::KIND, U::KIND), bits)
    }

    /// Hash into a `u64`: unsigned values pass through, signed values are
    /// reinterpreted as unsigned, floats by their bit pattern, `bool` as 0/1.
    pub fn hash(self) -> PrimitiveExpr<u64> {
        let (expr, bits) = self.into_parts();
        let hashed = match T::KIND {
            Kind::Float { bytes: 4 } => Expression::unary(
                UnaryOp::ExtendU,
                NumType::I32,
                Expression::unary(UnaryOp::Reinterpret, NumType::F32, expr),
            ),
            Kind::Float { .. } => Expression::unary(UnaryOp::Reinterpret, NumType::F64, expr),
            Kind::Int { bytes: 8, .. } => expr,
            Kind::Int { bytes, signed: true } => {
                let unsigned = Kind::Int { bytes, signed: false };
                convert(convert(expr, T::KIND, unsigned), unsigned, u64::KIND)
            }
            _ => convert(expr, T::KIND, u64::KIND),
        };
        PrimitiveExpr::from_ir(hashed, bits)
    }

    fn unary(self, op: UnaryOp) -> Self {
        let (expr, bits) = self.into_parts();
        Self::from_ir(Expression::unary(op, T::KIND.num_type(), expr), bits)
    }

    /// Apply `op` to both operands converted to their common type.
    pub(crate) fn combine<V, U>(self, rhs: PrimitiveExpr<V>, op: fn(Kind) -> BinaryOp, canonicalize: bool) -> PrimitiveExpr<U>
    where
        V: Primitive,
        T: CommonType<V>,
        U: Primitive,
    {
        let kind = <Common<T, V> as Primitive>::KIND;
        let (lhs, mut bits) = self.into_parts();
        let (rhs, rhs_bits) = rhs.into_parts();
        bits.extend(rhs_bits);
        let lhs = convert(lhs, T::KIND, kind);
        let rhs = convert(rhs, V::KIND, kind);
        let mut expr = Expression::binary(op(kind), kind.num_type(), lhs, rhs);
        if canonicalize {
            expr = normalize(expr, U::KIND);
        }
        PrimitiveExpr::from_ir(expr, bits)
    }

    // ── Comparisons ──────────────────────────────────────────────────────

    pub fn eq<R>(self, rhs: R) -> PrimitiveExpr<bool>
    where
        R: IntoPrimitive,
        T: CommonType<R::Ty>,
    {
        self.combine(rhs.into_primitive(), |_| BinaryOp::Eq, false)
    }

    pub fn ne<R>(self, rhs: R) -> PrimitiveExpr<bool>
    where
        R: IntoPrimitive,
        T: CommonType<R::Ty>,
    {
        self.combine(rhs.into_primitive(), |_| BinaryOp::Ne, false)
    }

    pub fn lt<R>(self, rhs: R) -> PrimitiveExpr<bool>
    where
        R: IntoPrimitive,
        T: CommonType<R::Ty>,
    {
        self.combine(rhs.into_primitive(), |k| signed_op(k, BinaryOp::LtS, BinaryOp::LtU), false)
    }

    pub fn le<R>(self, rhs: R) -> PrimitiveExpr<bool>
    where
        R: IntoPrimitive,
        T: CommonType<R::Ty>,
    {
        self.combine(rhs.into_primitive(), |k| signed_op(k, BinaryOp::LeS, BinaryOp::LeU), false)
    }

    pub fn gt<R>(self, rhs: R) -> PrimitiveExpr<bool>
    where
        R: IntoPrimitive,
        T: CommonType<R::Ty>,
    {
        self.combine(rhs.into_primitive(), |k| signed_op(k, BinaryOp::GtS, BinaryOp::GtU), false)
    }

    pub fn ge<R>(self, rhs: R) -> PrimitiveExpr<bool>
    where
        R: IntoPrimitive,
        T: CommonType<R::Ty>,
    {
        self.combine(rhs.into_primitive(), |k| signed_op(k, BinaryOp::GeS, BinaryOp::GeU), false)
    }
}

pub(crate) fn signed_op(kind: Kind, signed: BinaryOp, unsigned: BinaryOp) -> BinaryOp {
    if kind.is_signed() {
        signed
    } else {
        unsigned
    }
}

// ── Type-specific operations ────────────────────────────────────────────────

impl PrimitiveExpr<bool> {
    /// Logical and.  Both operands are evaluated.
    pub fn and(self, rhs: impl Into<PrimitiveExpr<bool>>) -> Self {
        self.combine(rhs.into(), |_| BinaryOp::And, false)
    }

    /// Logical or.  Both operands are evaluated.
    pub fn or(self, rhs: impl Into<PrimitiveExpr<bool>>) -> Self {
        self.combine(rhs.into(), |_| BinaryOp::Or, false)
    }
}

impl<T: Integral> PrimitiveExpr<T> {
    /// Same width, reinterpreted as signed.
    pub fn make_signed(self) -> PrimitiveExpr<T::Signed> {
        self.convert()
    }

    /// Same width, reinterpreted as unsigned.
    pub fn make_unsigned(self) -> PrimitiveExpr<T::Unsigned> {
        self.convert()
    }

    /// Rotate left.  Only meaningful for 32- and 64-bit integers.
    pub fn rotl(self, rhs: impl Into<PrimitiveExpr<T>>) -> Self
    where
        T: CommonType<T>,
    {
        debug_assert!(T::KIND.bytes() >= 4, "rotation of a sub-word integer");
        self.combine(rhs.into(), |_| BinaryOp::Rotl, false)
    }

    /// Rotate right.  Only meaningful for 32- and 64-bit integers.
    pub fn rotr(self, rhs: impl Into<PrimitiveExpr<T>>) -> Self
    where
        T: CommonType<T>,
    {
        debug_assert!(T::KIND.bytes() >= 4, "rotation of a sub-word integer");
        self.combine(rhs.into(), |_| BinaryOp::Rotr, false)
    }
}

impl<T: Unsigned> PrimitiveExpr<T> {
    /// Count leading zeros at the width of `T`.
    pub fn clz(self) -> Self {
        let bytes = T::KIND.bytes();
        let counted = self.unary(UnaryOp::Clz);
        if bytes >= 4 {
            return counted;
        }
        // the zero-extended value has 32 - 8 * bytes extra leading zeros
        let (expr, bits) = counted.into_parts();
        let extra = 32 - 8 * bytes as i32;
        Self::from_ir(Expression::binary(BinaryOp::Sub, NumType::I32, expr, Expression::i32(extra)), bits)
    }

    /// Count trailing zeros at the width of `T`.
    pub fn ctz(self) -> Self {
        let bytes = T::KIND.bytes();
        if bytes >= 4 {
            return self.unary(UnaryOp::Ctz);
        }
        // a sentinel bit just above the width caps the count for zero
        let (expr, bits) = self.into_parts();
        let capped = Expression::binary(BinaryOp::Or, NumType::I32, expr, Expression::i32(1 << (8 * bytes)));
        Self::from_ir(Expression::unary(UnaryOp::Ctz, NumType::I32, capped), bits)
    }

    /// Number of set bits.
    pub fn popcnt(self) -> Self {
        self.unary(UnaryOp::Popcnt)
    }
}

impl<T: Float> PrimitiveExpr<T> {
    pub fn abs(self) -> Self {
        self.unary(UnaryOp::Abs)
    }

    pub fn ceil(self) -> Self {
        self.unary(UnaryOp::Ceil)
    }

    pub fn floor(self) -> Self {
        self.unary(UnaryOp::Floor)
    }

    pub fn sqrt(self) -> Self {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn trunc(self) -> Self {
        self.unary(UnaryOp::Trunc)
    }

    /// Round to nearest, ties to even.
    pub fn nearest(self) -> Self {
        self.unary(UnaryOp::Nearest)
    }

    pub fn min(self, rhs: impl Into<PrimitiveExpr<T>>) -> Self
    where
        T: CommonType<T>,
    {
        self.combine(rhs.into(), |_| BinaryOp::Min, false)
    }

    pub fn max(self, rhs: impl Into<PrimitiveExpr<T>>) -> Self
    where
        T: CommonType<T>,
    {
        self.combine(rhs.into(), |_| BinaryOp::Max, false)
    }

    /// Magnitude of `self` with the sign of `rhs`.
    pub fn copy_sign(self, rhs: impl Into<PrimitiveExpr<T>>) -> Self
    where
        T: CommonType<T>,
    {
        self.combine(rhs.into(), |_| BinaryOp::CopySign, false)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Operators
// ══════════════════════════════════════════════════════════════════════════════

macro_rules! binary_operator {
    ($($trait:ident, $method:ident, $bound:ident, $canonicalize:expr, $op:expr;)*) => {$(
        impl<T, R> ops::$trait<R> for PrimitiveExpr<T>
        where
            R: IntoPrimitive,
            T: CommonType<R::Ty>,
            Common<T, R::Ty>: $bound,
        {
            type Output = PrimitiveExpr<Common<T, R::Ty>>;

            fn $method(self, rhs: R) -> Self::Output {
                self.combine(rhs.into_primitive(), $op, $canonicalize)
            }
        }
    )*};
}

binary_operator! {
    Add, add, Arithmetic, true, |_| BinaryOp::Add;
    Sub, sub, Arithmetic, true, |_| BinaryOp::Sub;
    Mul, mul, Arithmetic, true, |_| BinaryOp::Mul;
    Div, div, Arithmetic, true, |k| signed_op(k, BinaryOp::DivS, BinaryOp::DivU);
    Rem, rem, Integral, false, |k| signed_op(k, BinaryOp::RemS, BinaryOp::RemU);
    Shl, shl, Integral, true, |_| BinaryOp::Shl;
    Shr, shr, Integral, false, |k| signed_op(k, BinaryOp::ShrS, BinaryOp::ShrU);
    BitAnd, bitand, Bitwise, false, |_| BinaryOp::And;
    BitOr, bitor, Bitwise, false, |_| BinaryOp::Or;
    BitXor, bitxor, Bitwise, false, |_| BinaryOp::Xor;
}

impl<T: Arithmetic> ops::Neg for PrimitiveExpr<T> {
    type Output = Self;

    fn neg(self) -> Self {
        if T::KIND.is_float() {
            return self.unary(UnaryOp::Neg);
        }
        let ty = T::KIND.num_type();
        let (expr, bits) = self.into_parts();
        let negated = Expression::binary(BinaryOp::Sub, ty, Expression::Const(Literal::zero(ty)), expr);
        Self::from_ir(normalize(negated, T::KIND), bits)
    }
}

impl<T: Bitwise> ops::Not for PrimitiveExpr<T> {
    type Output = Self;

    /// Logical negation for `bool`, bitwise complement otherwise.
    fn not(self) -> Self {
        if T::KIND == Kind::Bool {
            return self.unary(UnaryOp::Eqz);
        }
        let ty = T::KIND.num_type();
        let ones = match ty {
            NumType::I64 => Expression::i64(-1),
            _ => Expression::i32(-1),
        };
        let (expr, bits) = self.into_parts();
        Self::from_ir(normalize(Expression::binary(BinaryOp::Xor, ty, expr, ones), T::KIND), bits)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Plumbing
// ══════════════════════════════════════════════════════════════════════════════

impl<T> Drop for PrimitiveExpr<T> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.expr.is_none(),
                "expression dropped without being used: {:?}",
                self.expr
            );
        }
    }
}

impl<T> Clone for PrimitiveExpr<T> {
    /// Deep copy of the node.  Evaluating both copies evaluates the tree
    /// twice.
    fn clone(&self) -> Self {
        Self {
            expr: self.expr.clone(),
            bits: self.bits.clone(),
            _ty: PhantomData,
        }
    }
}

impl<T: Primitive> fmt::Debug for PrimitiveExpr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrimitiveExpr<{}>({:?})", T::NAME, self.expr)
    }
}

impl<T: Primitive> RawExpr for PrimitiveExpr<T> {
    fn into_raw(self) -> (Expression, Bits) {
        self.into_parts()
    }

    fn from_raw(expr: Expression, bits: Bits) -> Self {
        Self::from_ir(expr, bits)
    }
}

impl<T: Primitive> IntoPrimitive for PrimitiveExpr<T> {
    type Ty = T;

    fn into_primitive(self) -> Self {
        self
    }
}

impl<T: Primitive> IntoExpr for PrimitiveExpr<T> {
    type Ty = T;

    fn into_expr(self) -> Expr<T> {
        Expr::new(self)
    }
}

impl<T: Primitive> Selectable for PrimitiveExpr<T> {
    fn select(cond: PrimitiveExpr<bool>, if_true: Self, if_false: Self) -> Self {
        let (cond, mut bits) = cond.into_parts();
        let (if_true, true_bits) = if_true.into_parts();
        let (if_false, false_bits) = if_false.into_parts();
        bits.extend(true_bits);
        bits.extend(false_bits);
        Self::from_ir(Expression::select(cond, if_true, if_false), bits)
    }
}

macro_rules! literal_conversions {
    ($($t:ty),*) => {$(
        impl From<$t> for PrimitiveExpr<$t> {
            fn from(value: $t) -> Self {
                PrimitiveExpr::new(value)
            }
        }

        impl IntoPrimitive for $t {
            type Ty = $t;

            fn into_primitive(self) -> PrimitiveExpr<$t> {
                PrimitiveExpr::new(self)
            }
        }

        impl IntoExpr for $t {
            type Ty = $t;

            fn into_expr(self) -> Expr<$t> {
                Expr::new(PrimitiveExpr::new(self))
            }
        }
    )*};
}

literal_conversions!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

/// Implicit conversions: widening without a change of signedness.
macro_rules! widening {
    ($($from:ty => $($to:ty),+;)*) => {$($(
        impl From<PrimitiveExpr<$from>> for PrimitiveExpr<$to> {
            fn from(value: PrimitiveExpr<$from>) -> Self {
                value.convert()
            }
        }
    )+)*};
}

widening! {
    i8 => i16, i32, i64;
    i16 => i32, i64;
    i32 => i64;
    u8 => u16, u32, u64;
    u16 => u32, u64;
    u32 => u64;
    f32 => f64;
}
