//! Boolean locals packed into shared `i64` locals.
//!
//! A [`LocalBitmap`] is one `i64` local with a mask of free bit positions.
//! Each function owns a [`BitmapPool`]; the pool keeps a stack of bitmaps
//! that still have free bits (the *discoverable* ones).  A bitmap whose
//! last free bit is handed out leaves that stack and re-enters it as soon as
//! one of its bits is released.
//!
//! A [`LocalBit`] is shared through `Rc`: the variable that owns it and every
//! pending expression that reads it hold a reference, and the bit returns to
//! its bitmap when the last one is dropped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use qwasm_ir::{BinaryOp, Expression, NumType, Statement, UnaryOp};

use crate::expr::PrimitiveExpr;
use crate::module::Module;

// ══════════════════════════════════════════════════════════════════════════════
// Bitmaps
// ══════════════════════════════════════════════════════════════════════════════

/// One `i64` local used as 64 boolean slots.
pub struct LocalBitmap {
    local: u32,
    free: Cell<u64>,
    pool: Weak<BitmapPool>,
}

impl LocalBitmap {
    /// Index of the backing local.
    pub fn local(&self) -> u32 {
        self.local
    }

    /// Mask of unallocated bit positions.
    pub fn free_mask(&self) -> u64 {
        self.free.get()
    }
}

impl fmt::Debug for LocalBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalBitmap(local {}, free {:#018x})", self.local, self.free.get())
    }
}

/// Occupancy of a function's bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitmapStats {
    /// Bitmaps created so far in the function.
    pub bitmaps: usize,
    /// Bitmaps that still have free bits.
    pub discoverable: usize,
    /// Bits currently allocated across all bitmaps.
    pub allocated_bits: u32,
}

/// The bitmaps of one function.
#[derive(Default)]
pub struct BitmapPool {
    discoverable: RefCell<Vec<Rc<LocalBitmap>>>,
    all: RefCell<Vec<Rc<LocalBitmap>>>,
}

impl BitmapPool {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Hand out a free bit, creating a bitmap in a fresh local from
    /// `new_local` if no discoverable one is left.
    pub(crate) fn allocate(self: &Rc<Self>, new_local: impl FnOnce() -> u32) -> Rc<LocalBit> {
        let top = self.discoverable.borrow().last().cloned();
        let bitmap = match top {
            Some(bitmap) => bitmap,
            None => {
                let bitmap = Rc::new(LocalBitmap {
                    local: new_local(),
                    free: Cell::new(u64::MAX),
                    pool: Rc::downgrade(self),
                });
                trace!(local = bitmap.local, "created local bitmap");
                self.discoverable.borrow_mut().push(Rc::clone(&bitmap));
                self.all.borrow_mut().push(Rc::clone(&bitmap));
                bitmap
            }
        };

        let free = bitmap.free.get();
        let offset = free.trailing_zeros() as u8;
        let rest = free & !(1u64 << offset);
        bitmap.free.set(rest);
        if rest == 0 {
            self.discoverable.borrow_mut().pop();
            trace!(local = bitmap.local, "local bitmap exhausted");
        }
        Rc::new(LocalBit { bitmap, offset })
    }

    pub fn stats(&self) -> BitmapStats {
        let all = self.all.borrow();
        BitmapStats {
            bitmaps: all.len(),
            discoverable: self.discoverable.borrow().len(),
            allocated_bits: all.iter().map(|b| (!b.free.get()).count_ones()).sum(),
        }
    }

    /// Whether every bit of every bitmap has been released.
    pub fn all_free(&self) -> bool {
        self.all.borrow().iter().all(|b| b.free.get() == u64::MAX)
    }

    fn release(&self, bitmap: &Rc<LocalBitmap>) {
        self.discoverable.borrow_mut().push(Rc::clone(bitmap));
        trace!(local = bitmap.local, "local bitmap discoverable again");
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Bits
// ══════════════════════════════════════════════════════════════════════════════

/// One allocated bit of a [`LocalBitmap`].
pub struct LocalBit {
    bitmap: Rc<LocalBitmap>,
    offset: u8,
}

impl LocalBit {
    pub fn local(&self) -> u32 {
        self.bitmap.local
    }

    pub fn offset(&self) -> u8 {
        self.offset
    }

    pub fn mask(&self) -> u64 {
        1u64 << self.offset
    }

    /// Read the bit.  The expression keeps the bit alive until it is used.
    pub fn is_set(self: &Rc<Self>) -> PrimitiveExpr<bool> {
        let masked = Expression::binary(
            BinaryOp::And,
            NumType::I64,
            Expression::LocalGet(self.local()),
            Expression::i64(self.mask() as i64),
        );
        let expr = Expression::binary(BinaryOp::Ne, NumType::I64, masked, Expression::i64(0));
        PrimitiveExpr::from_ir(expr, vec![Rc::clone(self)])
    }

    /// `local = (local & !mask) | (value << offset)`, without branching.
    pub fn set(&self, m: &mut Module, value: PrimitiveExpr<bool>) {
        let (value, _bits) = value.into_parts();
        let widened = Expression::unary(UnaryOp::ExtendU, NumType::I32, value);
        let shifted = shift(widened, self.offset as i64, 0);
        self.write(m, shifted);
    }

    /// Copy the value of `other` into this bit.
    pub fn assign_from(&self, m: &mut Module, other: &LocalBit) {
        if Rc::ptr_eq(&self.bitmap, &other.bitmap) && self.offset == other.offset {
            return;
        }
        let extracted = Expression::binary(
            BinaryOp::And,
            NumType::I64,
            Expression::LocalGet(other.local()),
            Expression::i64(other.mask() as i64),
        );
        let shifted = shift(extracted, self.offset as i64, other.offset as i64);
        self.write(m, shifted);
    }

    fn write(&self, m: &mut Module, bit: Expression) {
        let cleared = Expression::binary(
            BinaryOp::And,
            NumType::I64,
            Expression::LocalGet(self.local()),
            Expression::i64(!self.mask() as i64),
        );
        m.emit(Statement::LocalSet {
            index: self.local(),
            value: Expression::binary(BinaryOp::Or, NumType::I64, cleared, bit),
        });
    }
}

/// Move a single bit from position `from` to position `to`.
fn shift(expr: Expression, to: i64, from: i64) -> Expression {
    match to.cmp(&from) {
        std::cmp::Ordering::Equal => expr,
        std::cmp::Ordering::Greater => {
            Expression::binary(BinaryOp::Shl, NumType::I64, expr, Expression::i64(to - from))
        }
        std::cmp::Ordering::Less => {
            Expression::binary(BinaryOp::ShrU, NumType::I64, expr, Expression::i64(from - to))
        }
    }
}

impl Drop for LocalBit {
    fn drop(&mut self) {
        let free = self.bitmap.free.get();
        debug_assert_eq!(free & self.mask(), 0, "local bit released twice");
        if free == 0 {
            if let Some(pool) = self.bitmap.pool.upgrade() {
                pool.release(&self.bitmap);
            }
        }
        self.bitmap.free.set(free | self.mask());
    }
}

impl fmt::Debug for LocalBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalBit(local {}, bit {})", self.local(), self.offset)
    }
}
