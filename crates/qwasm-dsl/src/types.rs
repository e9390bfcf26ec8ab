//! Value types of generated code.
//!
//! Every type that can live in a local, a global, a parameter or a return
//! slot implements [`DslType`].  Scalars additionally implement
//! [`Primitive`]; pointers are [`Ptr<T>`] for a [`Pointee`] `T`.
//!
//! Type rules that C-like languages check at compile time are expressed as
//! marker traits so that unsupported combinations fail to compile:
//!
//! - [`CommonType`]: the result type of a binary operator (the wider of two
//!   same-signedness operands)
//! - [`ConvertTo`]: which explicit conversions `to::<U>()` accepts
//! - [`Integral`], [`Signed`], [`Unsigned`], [`Float`], [`Arithmetic`],
//!   [`Bitwise`]: operator availability

use std::fmt;
use std::marker::PhantomData;

use qwasm_ir::{Literal, NumType, ValType};

use crate::expr::{PrimitiveExpr, PtrExpr, RawExpr};
use crate::variable::{BitStorage, LocalStorage, SlotStorage};

// ══════════════════════════════════════════════════════════════════════════════
// Kinds
// ══════════════════════════════════════════════════════════════════════════════

/// Runtime description of a primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Bool,
    Int { bytes: u8, signed: bool },
    Float { bytes: u8 },
}

impl Kind {
    /// Stack type used to hold a value of this kind.  Everything up to
    /// 32 bits lives in an `i32`.
    pub const fn num_type(self) -> NumType {
        match self {
            Kind::Bool => NumType::I32,
            Kind::Int { bytes: 8, .. } => NumType::I64,
            Kind::Int { .. } => NumType::I32,
            Kind::Float { bytes: 4 } => NumType::F32,
            Kind::Float { .. } => NumType::F64,
        }
    }

    /// Size in linear memory.
    pub const fn bytes(self) -> u8 {
        match self {
            Kind::Bool => 1,
            Kind::Int { bytes, .. } | Kind::Float { bytes } => bytes,
        }
    }

    /// Floats count as signed, booleans as unsigned.
    pub const fn is_signed(self) -> bool {
        match self {
            Kind::Bool => false,
            Kind::Int { signed, .. } => signed,
            Kind::Float { .. } => true,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Kind::Float { .. })
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Core traits
// ══════════════════════════════════════════════════════════════════════════════

mod sealed {
    pub trait Sealed {}
}

/// A type that generated code can store and pass around.
pub trait DslType: Sized + 'static {
    /// Expression type produced when reading a value of this type.
    type Expr: RawExpr;
    /// Storage used by function-local variables of this type.
    type Local: LocalStorage<Self>;
    /// Host-side constant used to initialise globals.
    type Literal: Copy;

    const VAL_TYPE: ValType;
    const NAME: &'static str;

    fn literal(value: Self::Literal) -> Literal;
}

/// A scalar: `bool`, the fixed-width integers, `f32` or `f64`.
pub trait Primitive:
    DslType<Expr = PrimitiveExpr<Self>, Literal = Self>
    + Pointee
    + Copy
    + Default
    + fmt::Debug
    + sealed::Sealed
{
    const KIND: Kind;
}

/// Anything a pointer may point to: a primitive, or [`Void`] for untyped
/// memory.
pub trait Pointee: 'static {
    /// Element size; pointer arithmetic scales by it.
    const SIZE: u32;
}

/// Untyped memory.  Arithmetic on `Ptr<Void>` is byte-wise.
#[derive(Debug, Clone, Copy)]
pub struct Void;

impl Pointee for Void {
    const SIZE: u32 = 1;
}

/// Marker for a 32-bit pointer into linear memory.
pub struct Ptr<T>(PhantomData<T>);

impl<T: Pointee> DslType for Ptr<T> {
    type Expr = PtrExpr<T>;
    type Local = SlotStorage<Ptr<T>>;
    /// A pointer constant is its address.
    type Literal = u32;

    const VAL_TYPE: ValType = ValType::I32;
    const NAME: &'static str = "ptr";

    fn literal(value: u32) -> Literal {
        Literal::I32(value as i32)
    }
}

/// log2 of a power-of-two size.
pub(crate) const fn log2(size: u32) -> u32 {
    size.trailing_zeros()
}

// ── Primitive implementations ───────────────────────────────────────────────

macro_rules! primitive {
    ($($t:ty => $kind:expr, $val:ident, $local:ty, |$v:ident| $lit:expr;)*) => {$(
        impl sealed::Sealed for $t {}

        impl DslType for $t {
            type Expr = PrimitiveExpr<$t>;
            type Local = $local;
            type Literal = $t;

            const VAL_TYPE: ValType = ValType::$val;
            const NAME: &'static str = stringify!($t);

            fn literal($v: $t) -> Literal {
                $lit
            }
        }

        impl Pointee for $t {
            const SIZE: u32 = $kind.bytes() as u32;
        }

        impl Primitive for $t {
            const KIND: Kind = $kind;
        }
    )*};
}

primitive! {
    bool => Kind::Bool, I32, BitStorage, |v| Literal::I32(v as i32);
    i8 => Kind::Int { bytes: 1, signed: true }, I32, SlotStorage<i8>, |v| Literal::I32(v as i32);
    i16 => Kind::Int { bytes: 2, signed: true }, I32, SlotStorage<i16>, |v| Literal::I32(v as i32);
    i32 => Kind::Int { bytes: 4, signed: true }, I32, SlotStorage<i32>, |v| Literal::I32(v);
    i64 => Kind::Int { bytes: 8, signed: true }, I64, SlotStorage<i64>, |v| Literal::I64(v);
    u8 => Kind::Int { bytes: 1, signed: false }, I32, SlotStorage<u8>, |v| Literal::I32(v as i32);
    u16 => Kind::Int { bytes: 2, signed: false }, I32, SlotStorage<u16>, |v| Literal::I32(v as i32);
    u32 => Kind::Int { bytes: 4, signed: false }, I32, SlotStorage<u32>, |v| Literal::I32(v as i32);
    u64 => Kind::Int { bytes: 8, signed: false }, I64, SlotStorage<u64>, |v| Literal::I64(v as i64);
    f32 => Kind::Float { bytes: 4 }, F32, SlotStorage<f32>, |v| Literal::F32(v);
    f64 => Kind::Float { bytes: 8 }, F64, SlotStorage<f64>, |v| Literal::F64(v);
}

// ══════════════════════════════════════════════════════════════════════════════
// Operator categories
// ══════════════════════════════════════════════════════════════════════════════

/// Integers and floats.
pub trait Arithmetic: Primitive {}

/// Integers and `bool`; the operand types of `&`, `|` and `^`.
pub trait Bitwise: Primitive {}

/// Fixed-width integers.
pub trait Integral: Arithmetic + Bitwise {
    /// Same width, signed.
    type Signed: Integral;
    /// Same width, unsigned.
    type Unsigned: Integral;
}

pub trait Signed: Integral {}

pub trait Unsigned: Integral {}

pub trait Float: Arithmetic {}

macro_rules! integral {
    ($($t:ty => $signed:ty, $unsigned:ty, $sign:ident;)*) => {$(
        impl Arithmetic for $t {}
        impl Bitwise for $t {}
        impl Integral for $t {
            type Signed = $signed;
            type Unsigned = $unsigned;
        }
        impl $sign for $t {}
    )*};
}

integral! {
    i8 => i8, u8, Signed;
    i16 => i16, u16, Signed;
    i32 => i32, u32, Signed;
    i64 => i64, u64, Signed;
    u8 => i8, u8, Unsigned;
    u16 => i16, u16, Unsigned;
    u32 => i32, u32, Unsigned;
    u64 => i64, u64, Unsigned;
}

impl Bitwise for bool {}
impl Arithmetic for f32 {}
impl Arithmetic for f64 {}
impl Float for f32 {}
impl Float for f64 {}

// ══════════════════════════════════════════════════════════════════════════════
// Type relations
// ══════════════════════════════════════════════════════════════════════════════

/// The type both operands of a binary operator are converted to.
///
/// Defined only for operands of the same signedness and the same
/// integral-ness; the result is the wider of the two.
pub trait CommonType<U: Primitive>: Primitive {
    type Output: Primitive;
}

macro_rules! common_type {
    ($($a:ty, $b:ty => $out:ty;)*) => {$(
        impl CommonType<$b> for $a {
            type Output = $out;
        }
    )*};
}

common_type! {
    bool, bool => bool;

    i8, i8 => i8;     i8, i16 => i16;   i8, i32 => i32;   i8, i64 => i64;
    i16, i8 => i16;   i16, i16 => i16;  i16, i32 => i32;  i16, i64 => i64;
    i32, i8 => i32;   i32, i16 => i32;  i32, i32 => i32;  i32, i64 => i64;
    i64, i8 => i64;   i64, i16 => i64;  i64, i32 => i64;  i64, i64 => i64;

    u8, u8 => u8;     u8, u16 => u16;   u8, u32 => u32;   u8, u64 => u64;
    u16, u8 => u16;   u16, u16 => u16;  u16, u32 => u32;  u16, u64 => u64;
    u32, u8 => u32;   u32, u16 => u32;  u32, u32 => u32;  u32, u64 => u64;
    u64, u8 => u64;   u64, u16 => u64;  u64, u32 => u64;  u64, u64 => u64;

    f32, f32 => f32;  f32, f64 => f64;
    f64, f32 => f64;  f64, f64 => f64;
}

/// Explicit conversions accepted by `to::<U>()`: between types of the same
/// signedness (floats are signed), and between `bool` and anything.
pub trait ConvertTo<U: Primitive>: Primitive {}

macro_rules! convert_group {
    ($($t:ty),*) => {
        convert_group!(@outer [$($t),*] $($t),*);
    };
    (@outer $all:tt $($from:ty),*) => {
        $( convert_group!(@inner $from $all); )*
    };
    (@inner $from:ty [$($to:ty),*]) => {
        $( impl ConvertTo<$to> for $from {} )*
    };
}

convert_group!(i8, i16, i32, i64, f32, f64);
convert_group!(u8, u16, u32, u64);

macro_rules! convert_bool {
    ($($t:ty),*) => {$(
        impl ConvertTo<$t> for bool {}
        impl ConvertTo<bool> for $t {}
    )*};
}

impl ConvertTo<bool> for bool {}
convert_bool!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
