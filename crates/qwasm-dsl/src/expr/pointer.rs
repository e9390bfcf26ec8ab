//! Pointers into linear memory and the references they dereference to.

use std::fmt;
use std::marker::PhantomData;
use std::ops;

use qwasm_ir::{Access, BinaryOp, Expression, NumType, Statement};

use super::{Bits, PrimitiveExpr, RawExpr, Selectable};
use crate::module::Module;
use crate::types::{log2, Pointee, Primitive, Void};

/// A typed 32-bit address plus a static byte offset.
///
/// Constant deltas accumulate in `offset` and are only folded into the
/// address when the pointer is read, or used as the memarg offset of a
/// load or store.
pub struct PtrExpr<T> {
    addr: PrimitiveExpr<u32>,
    offset: i32,
    _ty: PhantomData<T>,
}

impl<T: Pointee> PtrExpr<T> {
    pub fn new(addr: PrimitiveExpr<u32>) -> Self {
        Self::with_offset(addr, 0)
    }

    pub fn with_offset(addr: PrimitiveExpr<u32>, offset: i32) -> Self {
        Self {
            addr,
            offset,
            _ty: PhantomData,
        }
    }

    /// The null pointer.
    pub fn nullptr() -> Self {
        Self::new(PrimitiveExpr::new(0))
    }

    /// Static byte offset not yet folded into the address.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// The address with the static offset applied.
    pub fn to_u32(self) -> PrimitiveExpr<u32> {
        if self.offset == 0 {
            return self.addr;
        }
        let (addr, bits) = self.addr.into_parts();
        PrimitiveExpr::from_ir(
            Expression::binary(BinaryOp::Add, NumType::I32, addr, Expression::i32(self.offset)),
            bits,
        )
    }

    pub fn is_nullptr(self) -> PrimitiveExpr<bool> {
        self.to_u32().eq(0u32)
    }

    pub fn is_not_nullptr(self) -> PrimitiveExpr<bool> {
        self.to_u32().ne(0u32)
    }

    /// Forget the pointee type.
    pub fn to_void(self) -> PtrExpr<Void> {
        PtrExpr::with_offset(self.addr, self.offset)
    }

    /// Reinterpret as a pointer to `U` without any check.
    pub fn cast_unchecked<U: Pointee>(self) -> PtrExpr<U> {
        PtrExpr::with_offset(self.addr, self.offset)
    }

    pub fn hash(self) -> PrimitiveExpr<u64> {
        self.to_u32().hash()
    }

    pub fn discard(self, m: &mut Module) {
        self.addr.discard(m);
    }

    fn compare(self, other: Self, f: fn(PrimitiveExpr<u32>, PrimitiveExpr<u32>) -> PrimitiveExpr<bool>) -> PrimitiveExpr<bool> {
        f(self.to_u32(), other.to_u32())
    }

    pub fn eq(self, other: Self) -> PrimitiveExpr<bool> {
        self.compare(other, |a, b| a.eq(b))
    }

    pub fn ne(self, other: Self) -> PrimitiveExpr<bool> {
        self.compare(other, |a, b| a.ne(b))
    }

    pub fn lt(self, other: Self) -> PrimitiveExpr<bool> {
        self.compare(other, |a, b| a.lt(b))
    }

    pub fn le(self, other: Self) -> PrimitiveExpr<bool> {
        self.compare(other, |a, b| a.le(b))
    }

    pub fn gt(self, other: Self) -> PrimitiveExpr<bool> {
        self.compare(other, |a, b| a.gt(b))
    }

    pub fn ge(self, other: Self) -> PrimitiveExpr<bool> {
        self.compare(other, |a, b| a.ge(b))
    }

    /// Address and offset to use for a memory access.  Negative offsets
    /// cannot be encoded in a memarg and are folded into the address.
    fn access_parts(self) -> (Expression, u32, Bits) {
        if self.offset >= 0 {
            let offset = self.offset as u32;
            let (addr, bits) = self.addr.into_parts();
            (addr, offset, bits)
        } else {
            let (addr, bits) = self.to_u32().into_parts();
            (addr, 0, bits)
        }
    }

    /// Debug-mode check that the pointer is not null.
    fn insist_not_nullptr(&self, m: &mut Module, file: &str, line: u32) {
        if m.config().debug_checks {
            let check = self.clone().is_not_nullptr();
            m.emit_insist(check, file, line, Some("dereference of a null pointer"));
        }
    }
}

impl<T: Primitive> PtrExpr<T> {
    fn access() -> Access {
        Access {
            ty: T::KIND.num_type(),
            bytes: T::KIND.bytes(),
            signed: T::KIND.is_signed(),
        }
    }

    /// Load the pointee.
    pub fn load(self) -> PrimitiveExpr<T> {
        let (addr, offset, bits) = self.access_parts();
        PrimitiveExpr::from_ir(Expression::load(Self::access(), offset, log2(T::SIZE), addr), bits)
    }

    /// Store `value` at the pointee.
    pub fn store(self, m: &mut Module, value: impl Into<PrimitiveExpr<T>>) {
        let (addr, offset, _addr_bits) = self.access_parts();
        let (value, _value_bits) = value.into().into_parts();
        m.emit(Statement::Store {
            access: Self::access(),
            offset,
            align: log2(T::SIZE),
            addr,
            value,
        });
    }

    /// A mutable reference to the pointee, checking for null in debug mode.
    #[track_caller]
    pub fn deref(self, m: &mut Module) -> Reference<T> {
        let location = std::panic::Location::caller();
        self.insist_not_nullptr(m, location.file(), location.line());
        Reference { ptr: self }
    }

    /// A read-only reference to the pointee, checking for null in debug mode.
    #[track_caller]
    pub fn deref_const(self, m: &mut Module) -> ConstReference<T> {
        let location = std::panic::Location::caller();
        self.insist_not_nullptr(m, location.file(), location.line());
        ConstReference { ptr: self }
    }
}

impl PtrExpr<Void> {
    /// Reinterpret untyped memory as `U`, checking alignment in debug mode.
    #[track_caller]
    pub fn cast<U: Pointee>(self, m: &mut Module) -> PtrExpr<U> {
        if U::SIZE > 1 && m.config().debug_checks {
            let location = std::panic::Location::caller();
            let aligned = (self.clone().to_u32() & (U::SIZE - 1)).eq(0u32);
            m.emit_insist(aligned, location.file(), location.line(), Some("misaligned pointer"));
        }
        self.cast_unchecked()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Arithmetic
// ══════════════════════════════════════════════════════════════════════════════

impl<T: Pointee> ops::Add<i32> for PtrExpr<T> {
    type Output = Self;

    /// Advance by `delta` elements; folded into the static offset.
    fn add(mut self, delta: i32) -> Self {
        self.offset = self.offset.wrapping_add(delta.wrapping_mul(T::SIZE as i32));
        self
    }
}

impl<T: Pointee> ops::Sub<i32> for PtrExpr<T> {
    type Output = Self;

    fn sub(mut self, delta: i32) -> Self {
        self.offset = self.offset.wrapping_sub(delta.wrapping_mul(T::SIZE as i32));
        self
    }
}

impl<T: Pointee> ops::Add<PrimitiveExpr<i32>> for PtrExpr<T> {
    type Output = Self;

    /// Advance by a dynamic number of elements.
    fn add(self, delta: PrimitiveExpr<i32>) -> Self {
        let bytes = scale(delta, T::SIZE);
        Self::with_offset(self.addr + bytes, self.offset)
    }
}

impl<T: Pointee> ops::Sub<PrimitiveExpr<i32>> for PtrExpr<T> {
    type Output = Self;

    fn sub(self, delta: PrimitiveExpr<i32>) -> Self {
        let bytes = scale(delta, T::SIZE);
        Self::with_offset(self.addr - bytes, self.offset)
    }
}

impl<T: Pointee> ops::Sub for PtrExpr<T> {
    type Output = PrimitiveExpr<i32>;

    /// Distance in elements.
    fn sub(self, other: Self) -> PrimitiveExpr<i32> {
        let offset = self.offset.wrapping_sub(other.offset);
        let bytes = (self.addr - other.addr).make_signed();
        let bytes = if offset == 0 { bytes } else { bytes + offset };
        match log2(T::SIZE) {
            0 => bytes,
            shift => bytes >> shift as i32,
        }
    }
}

/// `delta * size` as an unsigned byte count.
fn scale(delta: PrimitiveExpr<i32>, size: u32) -> PrimitiveExpr<u32> {
    let delta = delta.make_unsigned();
    match log2(size) {
        0 => delta,
        shift => delta << shift,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// References
// ══════════════════════════════════════════════════════════════════════════════

/// A dereferenced pointer: reading loads, assigning stores.
pub struct Reference<T> {
    ptr: PtrExpr<T>,
}

impl<T: Primitive> Reference<T> {
    pub fn load(self) -> PrimitiveExpr<T> {
        self.ptr.load()
    }

    pub fn store(self, m: &mut Module, value: impl Into<PrimitiveExpr<T>>) {
        self.ptr.store(m, value);
    }

    /// Load, apply `f`, store back.
    pub fn update(self, m: &mut Module, f: impl FnOnce(PrimitiveExpr<T>) -> PrimitiveExpr<T>) {
        let value = f(self.ptr.clone().load());
        self.ptr.store(m, value);
    }

    pub fn as_const(self) -> ConstReference<T> {
        ConstReference { ptr: self.ptr }
    }

    pub fn discard(self, m: &mut Module) {
        self.ptr.discard(m);
    }
}

/// A dereferenced pointer that can only be read.
pub struct ConstReference<T> {
    ptr: PtrExpr<T>,
}

impl<T: Primitive> ConstReference<T> {
    pub fn load(self) -> PrimitiveExpr<T> {
        self.ptr.load()
    }

    pub fn discard(self, m: &mut Module) {
        self.ptr.discard(m);
    }
}

impl<T: Primitive> From<Reference<T>> for PrimitiveExpr<T> {
    fn from(reference: Reference<T>) -> Self {
        reference.load()
    }
}

impl<T: Primitive> From<ConstReference<T>> for PrimitiveExpr<T> {
    fn from(reference: ConstReference<T>) -> Self {
        reference.load()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Plumbing
// ══════════════════════════════════════════════════════════════════════════════

impl<T> Clone for PtrExpr<T> {
    fn clone(&self) -> Self {
        Self {
            addr: self.addr.clone(),
            offset: self.offset,
            _ty: PhantomData,
        }
    }
}

impl<T> fmt::Debug for PtrExpr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtrExpr")
            .field("addr", &self.addr.ir())
            .field("offset", &self.offset)
            .finish()
    }
}

impl<T: Pointee> RawExpr for PtrExpr<T> {
    fn into_raw(self) -> (Expression, Bits) {
        self.to_u32().into_parts()
    }

    fn from_raw(expr: Expression, bits: Bits) -> Self {
        Self::new(PrimitiveExpr::from_ir(expr, bits))
    }
}

impl<T: Pointee> Selectable for PtrExpr<T> {
    fn select(cond: PrimitiveExpr<bool>, if_true: Self, if_false: Self) -> Self {
        Self::new(PrimitiveExpr::select(cond, if_true.to_u32(), if_false.to_u32()))
    }
}
