//! Functions of the generated module.
//!
//! A [`FunctionProxy`] names a function with a fixed signature and can emit
//! calls before the body exists, which is what recursive and mutually
//! recursive functions need.  [`FunctionProxy::define`] generates the body;
//! while it runs the function is the module's active function.

use std::fmt;
use std::marker::PhantomData;

use qwasm_ir::{Expression, Statement, ValType};

use crate::expr::{Bits, IntoExpr, PrimitiveExpr, PtrExpr, RawExpr};
use crate::module::Module;
use crate::types::{DslType, Pointee, Primitive, Ptr};
use crate::variable::Parameter;

// ══════════════════════════════════════════════════════════════════════════════
// Signatures
// ══════════════════════════════════════════════════════════════════════════════

/// A tuple of parameter types, `()` to `(A, B, C, D, E, F)`.
pub trait ParamList: 'static {
    /// The matching tuple of [`Parameter`]s.
    type Params;

    fn val_types() -> Vec<ValType>;

    fn parameters() -> Self::Params;
}

/// Call arguments for a parameter list `P`: a tuple of values convertible
/// to the parameter expressions.
pub trait IntoArgs<P: ParamList> {
    fn into_args(self) -> (Vec<Expression>, Bits);
}

macro_rules! param_list {
    ($(($($p:ident $x:ident $idx:tt),*);)*) => {$(
        impl<$($p: DslType),*> ParamList for ($($p,)*) {
            type Params = ($(Parameter<$p>,)*);

            fn val_types() -> Vec<ValType> {
                vec![$(<$p as DslType>::VAL_TYPE),*]
            }

            fn parameters() -> Self::Params {
                ($(Parameter::<$p>::new($idx),)*)
            }
        }

        impl<$($p: DslType, $x: Into<<$p as DslType>::Expr>),*> IntoArgs<($($p,)*)> for ($($x,)*) {
            #[allow(unused_mut, unused_variables)]
            fn into_args(self) -> (Vec<Expression>, Bits) {
                let mut args = Vec::new();
                let mut bits = Vec::new();
                $(
                    let (arg, arg_bits) = self.$idx.into().into_raw();
                    args.push(arg);
                    bits.extend(arg_bits);
                )*
                (args, bits)
            }
        }
    )*};
}

param_list! {
    ();
    (A XA 0);
    (A XA 0, B XB 1);
    (A XA 0, B XB 1, C XC 2);
    (A XA 0, B XB 1, C XC 2, D XD 3);
    (A XA 0, B XB 1, C XC 2, D XD 3, E XE 4);
    (A XA 0, B XB 1, C XC 2, D XD 3, E XE 4, F XF 5);
}

/// A return type: `()` or a [`DslType`].
pub trait ReturnType: 'static {
    /// What a call evaluates to.
    type Value;

    const VAL_TYPE: Option<ValType>;

    /// Emit a call; a void call is emitted as a statement right away.
    fn call(m: &mut Module, func: String, args: Vec<Expression>, bits: Bits) -> Self::Value;

    fn emit_return(m: &mut Module, value: Self::Value);
}

impl ReturnType for () {
    type Value = ();

    const VAL_TYPE: Option<ValType> = None;

    fn call(m: &mut Module, func: String, args: Vec<Expression>, _bits: Bits) {
        m.emit(Statement::Call { func, args });
    }

    fn emit_return(m: &mut Module, _value: ()) {
        m.emit_return();
    }
}

macro_rules! value_return {
    ($($t:ty),*) => {$(
        impl ReturnType for $t {
            type Value = PrimitiveExpr<$t>;

            const VAL_TYPE: Option<ValType> = Some(<$t as DslType>::VAL_TYPE);

            fn call(_m: &mut Module, func: String, args: Vec<Expression>, bits: Bits) -> Self::Value {
                PrimitiveExpr::from_ir(Expression::Call { func, args }, bits)
            }

            fn emit_return(m: &mut Module, value: Self::Value) {
                m.emit_return_value(value);
            }
        }
    )*};
}

value_return!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl<T: Pointee> ReturnType for Ptr<T> {
    type Value = PtrExpr<T>;

    const VAL_TYPE: Option<ValType> = Some(ValType::I32);

    fn call(_m: &mut Module, func: String, args: Vec<Expression>, bits: Bits) -> PtrExpr<T> {
        PtrExpr::from_raw(Expression::Call { func, args }, bits)
    }

    fn emit_return(m: &mut Module, value: PtrExpr<T>) {
        m.emit_return_value(value);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Proxies and functions
// ══════════════════════════════════════════════════════════════════════════════

/// A callable handle to a function named `name` with parameters `P` and
/// return type `R`.
pub struct FunctionProxy<P, R> {
    name: String,
    _sig: PhantomData<fn(P) -> R>,
}

impl<P: ParamList, R: ReturnType> FunctionProxy<P, R> {
    /// A handle to a function that is defined (or imported) separately.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _sig: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emit a call.  For void functions the call is emitted as a statement;
    /// otherwise the call expression is returned and evaluated where it is
    /// used.
    pub fn call(&self, m: &mut Module, args: impl IntoArgs<P>) -> R::Value {
        let (args, bits) = args.into_args();
        R::call(m, self.name.clone(), args, bits)
    }

    /// Generate the function's body.  `body` receives the function, which
    /// gives access to the parameters and to `RETURN`.
    pub fn define(&self, m: &mut Module, body: impl FnOnce(&mut Module, &Function<P, R>)) {
        m.open_function(self.name.clone(), P::val_types(), R::VAL_TYPE);
        let function = Function { proxy: self.clone() };
        body(m, &function);
        m.close_function();
    }

    /// Export the function under its own name.
    pub fn export(&self, m: &mut Module) {
        m.emit_function_export(&self.name);
    }
}

impl<P, R> Clone for FunctionProxy<P, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _sig: PhantomData,
        }
    }
}

impl<P, R> fmt::Debug for FunctionProxy<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionProxy({})", self.name)
    }
}

/// A function whose body is being generated.
pub struct Function<P, R> {
    proxy: FunctionProxy<P, R>,
}

impl<P: ParamList, R: ReturnType> Function<P, R> {
    /// Define a new function and return a proxy to call it with.
    pub fn build(m: &mut Module, name: impl Into<String>, body: impl FnOnce(&mut Module, &Function<P, R>)) -> FunctionProxy<P, R> {
        let proxy = FunctionProxy::new(name);
        proxy.define(m, body);
        proxy
    }

    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// The parameters, as a tuple of [`Parameter`]s.
    pub fn parameters(&self) -> P::Params {
        P::parameters()
    }

    /// `RETURN value`.  Void functions pass `()`.
    pub fn emit_return(&self, m: &mut Module, value: impl Into<R::Value>) {
        R::emit_return(m, value.into());
    }

    pub fn proxy(&self) -> FunctionProxy<P, R> {
        self.proxy.clone()
    }
}

impl<P: ParamList, R: Primitive + ReturnType<Value = PrimitiveExpr<R>>> Function<P, R> {
    /// `RETURN value` for a value that may be NULL.  With debug checks
    /// enabled, returning NULL fails an insist at the caller's location.
    #[track_caller]
    pub fn emit_return_expr(&self, m: &mut Module, value: impl IntoExpr<Ty = R>) {
        let value = value.into_expr().insist_not_null(m);
        R::emit_return(m, value);
    }
}

impl<P, R> fmt::Debug for Function<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.proxy.name)
    }
}
