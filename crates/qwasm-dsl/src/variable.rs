//! Variables: function locals, parameters and module globals.
//!
//! | type | storage |
//! |---|---|
//! | [`Var<bool>`] | one bit of a shared `i64` local |
//! | [`Var<T>`] | one local of `T`'s stack type |
//! | [`Var<Ptr<T>>`] | one `i32` local holding the address |
//! | [`NullableVar<T>`] | a `Var<T>` plus a `Var<bool>` NULL flag |
//! | [`Parameter<T>`] | the parameter's own local, no allocation |
//! | [`Global<T>`] | a named module global; never nullable |

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use qwasm_ir::{Expression, Literal, Statement, ValType};

use crate::expr::{Expr, IntoExpr, PrimitiveExpr, RawExpr};
use crate::local_bit::LocalBit;
use crate::module::Module;
use crate::types::{DslType, Primitive};

/// How a function-local variable of type `T` is stored.
pub trait LocalStorage<T: DslType>: Sized {
    fn allocate(m: &mut Module) -> Self;

    fn load(&self) -> T::Expr;

    fn store(&self, m: &mut Module, value: T::Expr);
}

/// A dedicated local slot.
pub struct SlotStorage<T> {
    index: u32,
    _ty: PhantomData<T>,
}

impl<T> SlotStorage<T> {
    /// Use an existing local, e.g. a parameter.
    pub fn bind(index: u32) -> Self {
        Self {
            index,
            _ty: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl<T: DslType> LocalStorage<T> for SlotStorage<T> {
    fn allocate(m: &mut Module) -> Self {
        Self::bind(m.allocate_local(T::VAL_TYPE))
    }

    fn load(&self) -> T::Expr {
        T::Expr::from_raw(Expression::LocalGet(self.index), Vec::new())
    }

    fn store(&self, m: &mut Module, value: T::Expr) {
        let (value, _bits) = value.into_raw();
        m.emit(Statement::LocalSet {
            index: self.index,
            value,
        });
    }
}

/// A single bit of a local bitmap.
pub struct BitStorage {
    bit: Rc<LocalBit>,
}

impl BitStorage {
    pub fn bit(&self) -> &Rc<LocalBit> {
        &self.bit
    }
}

impl LocalStorage<bool> for BitStorage {
    fn allocate(m: &mut Module) -> Self {
        Self { bit: m.allocate_bit() }
    }

    fn load(&self) -> PrimitiveExpr<bool> {
        self.bit.is_set()
    }

    fn store(&self, m: &mut Module, value: PrimitiveExpr<bool>) {
        self.bit.set(m, value);
    }
}

/// The all-zero value of `T`: `0`, `false`, `0.0` or the null pointer.
fn zero<T: DslType>() -> T::Expr {
    let literal = match T::VAL_TYPE {
        ValType::I64 => Literal::I64(0),
        ValType::F32 => Literal::F32(0.0),
        ValType::F64 => Literal::F64(0.0),
        _ => Literal::I32(0),
    };
    T::Expr::from_raw(Expression::Const(literal), Vec::new())
}

// ══════════════════════════════════════════════════════════════════════════════
// Locals
// ══════════════════════════════════════════════════════════════════════════════

/// A function-local variable.  Lives as long as the function being
/// generated; must not be used from another function.
pub struct Var<T: DslType> {
    storage: T::Local,
}

impl<T: DslType> Var<T> {
    /// A new variable initialised to zero.
    pub fn new(m: &mut Module) -> Self {
        Self::with(m, zero::<T>())
    }

    pub fn with(m: &mut Module, init: impl Into<T::Expr>) -> Self {
        let var = Self {
            storage: T::Local::allocate(m),
        };
        var.set(m, init);
        var
    }

    /// Read the variable.
    pub fn val(&self) -> T::Expr {
        self.storage.load()
    }

    pub fn set(&self, m: &mut Module, value: impl Into<T::Expr>) {
        self.storage.store(m, value.into());
    }

    /// `var = f(var)`
    pub fn update(&self, m: &mut Module, f: impl FnOnce(T::Expr) -> T::Expr) {
        let value = f(self.val());
        self.storage.store(m, value);
    }
}

impl Var<bool> {
    /// Copy another boolean variable bit-to-bit.
    pub fn assign(&self, m: &mut Module, other: &Var<bool>) {
        self.storage.bit().assign_from(m, other.storage.bit());
    }
}

impl<T: DslType> fmt::Debug for Var<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var<{}>", T::NAME)
    }
}

/// A function-local variable that can hold NULL.
pub struct NullableVar<T: Primitive> {
    value: Var<T>,
    is_null: Var<bool>,
}

impl<T: Primitive> NullableVar<T> {
    /// A new variable holding NULL.
    pub fn new(m: &mut Module) -> Self {
        Self::with(m, Expr::<T>::null())
    }

    pub fn with(m: &mut Module, init: impl IntoExpr<Ty = T>) -> Self {
        let var = Self {
            value: Var::new(m),
            is_null: Var::new(m),
        };
        var.set(m, init);
        var
    }

    pub fn val(&self) -> Expr<T> {
        Expr::with_null(self.value.val(), self.is_null.val())
    }

    pub fn set(&self, m: &mut Module, value: impl IntoExpr<Ty = T>) {
        let (value, is_null) = value.into_expr().split();
        self.value.set(m, value);
        self.is_null.set(m, is_null);
    }

    pub fn set_null(&self, m: &mut Module) {
        self.is_null.set(m, true);
    }

    pub fn update(&self, m: &mut Module, f: impl FnOnce(Expr<T>) -> Expr<T>) {
        let value = f(self.val());
        self.set(m, value);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Parameters
// ══════════════════════════════════════════════════════════════════════════════

/// A parameter of the function being generated.  Booleans are passed as
/// `0`/`1` in an `i32`.
pub struct Parameter<T> {
    index: u32,
    _ty: PhantomData<T>,
}

impl<T: DslType> Parameter<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _ty: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn val(&self) -> T::Expr {
        T::Expr::from_raw(Expression::LocalGet(self.index), Vec::new())
    }

    pub fn set(&self, m: &mut Module, value: impl Into<T::Expr>) {
        let (value, _bits) = value.into().into_raw();
        m.emit(Statement::LocalSet {
            index: self.index,
            value,
        });
    }
}

impl<T> Clone for Parameter<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            _ty: PhantomData,
        }
    }
}

impl<T: DslType> fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parameter<{}>({})", T::NAME, self.index)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Globals
// ══════════════════════════════════════════════════════════════════════════════

/// A module global, addressed by name.
pub struct Global<T> {
    name: String,
    _ty: PhantomData<T>,
}

impl<T: DslType> Global<T> {
    /// Define a mutable global under a fresh name.
    pub fn new(m: &mut Module, init: T::Literal) -> Self {
        let name = m.unique_global_name("global");
        Self::named(m, name, init)
    }

    /// Define a mutable global.
    pub fn named(m: &mut Module, name: impl Into<String>, init: T::Literal) -> Self {
        let name = name.into();
        m.emit_global::<T>(&name, init, true);
        Self::wrap(name)
    }

    /// Import a mutable global of the host under its own name.
    pub fn import(m: &mut Module, name: impl Into<String>) -> Self {
        let name = name.into();
        m.emit_import::<T>(&name, &name);
        Self::wrap(name)
    }

    /// Import the host's global `extern_name`, known in the module as
    /// `intern_name`.
    pub fn import_as(m: &mut Module, extern_name: &str, intern_name: impl Into<String>) -> Self {
        let name = intern_name.into();
        m.emit_import::<T>(extern_name, &name);
        Self::wrap(name)
    }

    pub(crate) fn wrap(name: String) -> Self {
        Self {
            name,
            _ty: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn val(&self) -> T::Expr {
        T::Expr::from_raw(Expression::GlobalGet(self.name.clone()), Vec::new())
    }

    pub fn set(&self, m: &mut Module, value: impl Into<T::Expr>) {
        let (value, _bits) = value.into().into_raw();
        m.emit(Statement::GlobalSet {
            name: self.name.clone(),
            value,
        });
    }

    pub fn update(&self, m: &mut Module, f: impl FnOnce(T::Expr) -> T::Expr) {
        let value = f(self.val());
        self.set(m, value);
    }

    /// Change the initial value.  Has no effect on imported globals.
    pub fn init(&self, m: &mut Module, value: T::Literal) {
        m.set_global_init::<T>(&self.name, value);
    }
}

impl<T> Clone for Global<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _ty: PhantomData,
        }
    }
}

impl<T: DslType> fmt::Debug for Global<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Global<{}>({})", T::NAME, self.name)
    }
}
