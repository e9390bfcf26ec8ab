//! Allocation of linear memory for the generated program.
//!
//! An [`Allocator`] hands out memory in two ways: *pre-allocations* are
//! decided while generating and yield constant addresses, *allocations*
//! run inside the generated program.  [`BumpAllocator`] is the stock
//! implementation.

use qwasm_ir::Expression;
use tracing::debug;

use crate::control::If;
use crate::error::{DslError, DslResult};
use crate::expr::{select, PrimitiveExpr, PtrExpr};
use crate::module::Module;
use crate::types::{Pointee, Ptr, Primitive, Void};
use crate::variable::{Global, Var};

/// Bytes per page of linear memory.
pub const PAGE_SIZE: u32 = 64 * 1024;

/// Current memory size in pages.
pub fn memory_size() -> PrimitiveExpr<u32> {
    PrimitiveExpr::from_ir(Expression::MemorySize, Vec::new())
}

/// Grow memory by `pages`; yields the previous size in pages, or
/// `u32::MAX` if memory cannot grow.
pub fn memory_grow(pages: PrimitiveExpr<u32>) -> PrimitiveExpr<u32> {
    let (pages, bits) = pages.into_parts();
    PrimitiveExpr::from_ir(Expression::MemoryGrow(Box::new(pages)), bits)
}

/// Memory arena of the generated program.
pub trait Allocator {
    /// Reserve `bytes` bytes aligned to `align` at generation time.  The
    /// memory becomes usable once [`perform_pre_allocations`] ran.  Fails if
    /// the reservation does not fit the address space.
    ///
    /// [`perform_pre_allocations`]: Allocator::perform_pre_allocations
    fn pre_allocate(&mut self, bytes: u32, align: u32) -> DslResult<PtrExpr<Void>>;

    /// Emit code allocating `bytes` bytes aligned to `align`.
    fn allocate(&mut self, m: &mut Module, bytes: PrimitiveExpr<u32>, align: u32) -> Var<Ptr<Void>>;

    /// Emit code releasing `bytes` bytes at `ptr`.
    fn deallocate(&mut self, m: &mut Module, ptr: PtrExpr<Void>, bytes: PrimitiveExpr<u32>);

    /// Commit all pre-allocations.  Called once, after the last one.  Linear
    /// memory is sized to hold them from the start.
    fn perform_pre_allocations(&mut self, m: &mut Module) -> DslResult<()>;

    /// Bytes reserved by pre-allocations so far.
    fn pre_allocated_memory_consumption(&self) -> u32;

    /// Pre-allocate `count` values of `T`.
    fn pre_malloc<T: Primitive>(&mut self, count: u32) -> DslResult<PtrExpr<T>>
    where
        Self: Sized,
    {
        let bytes = T::SIZE.checked_mul(count).ok_or(DslError::AddressSpaceExhausted {
            bytes: u64::from(T::SIZE) * u64::from(count),
        })?;
        Ok(self.pre_allocate(bytes, T::SIZE)?.cast_unchecked())
    }

    /// Allocate `count` values of `T`.
    fn malloc<T: Primitive>(&mut self, m: &mut Module, count: impl Into<PrimitiveExpr<u32>>) -> Var<Ptr<T>>
    where
        Self: Sized,
    {
        let ptr = self.allocate(m, count.into() * T::SIZE, T::SIZE);
        Var::with(m, ptr.val().cast_unchecked::<T>())
    }

    /// Free `count` values of `T` at `ptr`.
    fn free<T: Pointee>(&mut self, m: &mut Module, ptr: PtrExpr<T>, count: impl Into<PrimitiveExpr<u32>>)
    where
        Self: Sized,
    {
        self.deallocate(m, ptr.to_void(), count.into() * T::SIZE);
    }
}

fn align_up(value: u32, align: u32) -> Option<u32> {
    debug_assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
    Some(value.checked_add(align - 1)? & !(align - 1))
}

/// Allocates upwards from a heap pointer kept in a global.
///
/// Pre-allocations occupy the bottom of memory; the heap starts behind
/// them.  Memory grows on demand.  Deallocation only reclaims the most
/// recent allocation.  Address `0` is never handed out.
#[derive(Debug)]
pub struct BumpAllocator {
    heap: Global<u32>,
    pre_allocated: u32,
    committed: bool,
}

impl BumpAllocator {
    /// First address handed out.
    pub const BASE: u32 = 8;

    pub fn new(m: &mut Module) -> Self {
        let name = m.unique_global_name("heap");
        Self {
            heap: Global::named(m, name, Self::BASE),
            pre_allocated: 0,
            committed: false,
        }
    }

    /// The heap pointer.
    pub fn heap(&self) -> &Global<u32> {
        &self.heap
    }
}

impl Allocator for BumpAllocator {
    fn pre_allocate(&mut self, bytes: u32, align: u32) -> DslResult<PtrExpr<Void>> {
        debug_assert!(!self.committed, "pre-allocation after perform_pre_allocations");
        let used = Self::BASE + self.pre_allocated;
        let span = align_up(used, align.max(1)).and_then(|addr| Some((addr, addr.checked_add(bytes)?)));
        let Some((addr, end)) = span else {
            return Err(DslError::AddressSpaceExhausted {
                bytes: u64::from(used) + u64::from(bytes),
            });
        };
        self.pre_allocated = end - Self::BASE;
        Ok(PtrExpr::new(PrimitiveExpr::new(addr)))
    }

    fn allocate(&mut self, m: &mut Module, bytes: PrimitiveExpr<u32>, align: u32) -> Var<Ptr<Void>> {
        if align > 1 {
            let mask = !(align - 1);
            self.heap.update(m, |heap| (heap + (align - 1)) & mask);
        }
        let ptr = Var::<Ptr<Void>>::with(m, PtrExpr::new(self.heap.val()));
        self.heap.update(m, |heap| heap + bytes);

        let pages = (self.heap.val() + (PAGE_SIZE - 1)) >> 16u32;
        let short = pages.clone().gt(memory_size());
        If::new(m, short)
            .then(|m| {
                let grown = memory_grow(pages - memory_size()).ne(u32::MAX);
                m.emit_insist(grown, file!(), line!(), Some("out of memory"));
            })
            .emit(m);
        ptr
    }

    fn deallocate(&mut self, m: &mut Module, ptr: PtrExpr<Void>, bytes: PrimitiveExpr<u32>) {
        let addr = Var::<u32>::with(m, ptr.to_u32());
        let latest = (addr.val() + bytes).eq(self.heap.val());
        self.heap.set(m, select(latest, addr.val(), self.heap.val()));
    }

    fn perform_pre_allocations(&mut self, m: &mut Module) -> DslResult<()> {
        debug_assert!(!self.committed, "pre-allocations performed twice");
        let end = Self::BASE + self.pre_allocated;
        let start = align_up(end, 8).ok_or(DslError::AddressSpaceExhausted { bytes: u64::from(end) + 8 })?;
        let pages = u64::from(end).div_ceil(u64::from(PAGE_SIZE));
        m.reserve_memory_pages(pages)?;
        self.heap.init(m, start);
        self.committed = true;
        debug!(bytes = self.pre_allocated, heap = start, pages, "pre-allocations performed");
        Ok(())
    }

    fn pre_allocated_memory_consumption(&self) -> u32 {
        self.pre_allocated
    }
}
