//! IR nodes: expressions, statements and labelled blocks.
//!
//! Every node owns its children.  `Clone` is therefore a deep copy, which is
//! exactly what duplicating a generated expression requires.

use wasm_encoder::ValType;

// ══════════════════════════════════════════════════════════════════════════════
// Types and constants
// ══════════════════════════════════════════════════════════════════════════════

/// Numeric type of a value on the WASM operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumType {
    I32,
    I64,
    F32,
    F64,
}

impl NumType {
    /// The matching `wasm-encoder` value type.
    pub fn val_type(self) -> ValType {
        match self {
            NumType::I32 => ValType::I32,
            NumType::I64 => ValType::I64,
            NumType::F32 => ValType::F32,
            NumType::F64 => ValType::F64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumType::F32 | NumType::F64)
    }
}

/// A constant operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Literal {
    pub fn ty(&self) -> NumType {
        match self {
            Literal::I32(_) => NumType::I32,
            Literal::I64(_) => NumType::I64,
            Literal::F32(_) => NumType::F32,
            Literal::F64(_) => NumType::F64,
        }
    }

    /// The all-zero constant of `ty`.
    pub fn zero(ty: NumType) -> Self {
        match ty {
            NumType::I32 => Literal::I32(0),
            NumType::I64 => Literal::I64(0),
            NumType::F32 => Literal::F32(0.0),
            NumType::F64 => Literal::F64(0.0),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Operators
// ══════════════════════════════════════════════════════════════════════════════

/// Unary operators.  The operand type is stored next to the operator in
/// [`Expression::Unary`]; conversions additionally name their target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Clz,
    Ctz,
    Popcnt,
    Eqz,
    Neg,
    Abs,
    Ceil,
    Floor,
    Sqrt,
    Trunc,
    Nearest,
    /// `i64 -> i32`
    Wrap,
    /// `i32 -> i64`, sign-extending.
    ExtendS,
    /// `i32 -> i64`, zero-extending.
    ExtendU,
    /// Sign-extend the low byte of an `i32` in place.
    Extend8S,
    /// Sign-extend the low half-word of an `i32` in place.
    Extend16S,
    /// Signed integer to the given float type.
    ConvertS(NumType),
    /// Unsigned integer to the given float type.
    ConvertU(NumType),
    /// Float to the given integer type, signed, trapping.
    TruncS(NumType),
    /// Float to the given integer type, unsigned, trapping.
    TruncU(NumType),
    /// `f32 -> f64`
    Promote,
    /// `f64 -> f32`
    Demote,
    /// Bit-cast between the same-width integer and float types.
    Reinterpret,
}

/// Binary operators.  For float operands only the signed comparison variants
/// and `DivS` are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
    Eq,
    Ne,
    LtS,
    LtU,
    LeS,
    LeU,
    GtS,
    GtU,
    GeS,
    GeU,
    Min,
    Max,
    CopySign,
}

impl BinaryOp {
    /// Whether the operator produces an `i32` truth value.
    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Eq | Ne | LtS | LtU | LeS | LeU | GtS | GtU | GeS | GeU
        )
    }
}

/// Shape of a memory access: stack type, bytes touched, and for narrow
/// loads whether to sign-extend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub ty: NumType,
    pub bytes: u8,
    pub signed: bool,
}

// ══════════════════════════════════════════════════════════════════════════════
// Expressions
// ══════════════════════════════════════════════════════════════════════════════

/// A value-producing node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Const(Literal),
    Unary {
        op: UnaryOp,
        ty: NumType,
        value: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        ty: NumType,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    /// `cond ? if_true : if_false`, both arms evaluated.
    Select {
        cond: Box<Expression>,
        if_true: Box<Expression>,
        if_false: Box<Expression>,
    },
    LocalGet(u32),
    GlobalGet(String),
    Load {
        access: Access,
        /// Static byte offset (memarg offset).
        offset: u32,
        /// log2 of the alignment in bytes.
        align: u32,
        addr: Box<Expression>,
    },
    Call {
        func: String,
        args: Vec<Expression>,
    },
    /// Current memory size in pages.
    MemorySize,
    /// Grow memory by the given number of pages; yields the old size or -1.
    MemoryGrow(Box<Expression>),
}

impl Expression {
    pub fn i32(v: i32) -> Self {
        Expression::Const(Literal::I32(v))
    }

    pub fn i64(v: i64) -> Self {
        Expression::Const(Literal::I64(v))
    }

    pub fn unary(op: UnaryOp, ty: NumType, value: Expression) -> Self {
        Expression::Unary {
            op,
            ty,
            value: Box::new(value),
        }
    }

    pub fn binary(op: BinaryOp, ty: NumType, lhs: Expression, rhs: Expression) -> Self {
        Expression::Binary {
            op,
            ty,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn select(cond: Expression, if_true: Expression, if_false: Expression) -> Self {
        Expression::Select {
            cond: Box::new(cond),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    pub fn load(access: Access, offset: u32, align: u32, addr: Expression) -> Self {
        Expression::Load {
            access,
            offset,
            align,
            addr: Box::new(addr),
        }
    }

    /// The constant this node denotes, if it is one.
    pub fn as_const(&self) -> Option<Literal> {
        match self {
            Expression::Const(lit) => Some(*lit),
            _ => None,
        }
    }

    /// Whether evaluating the tree can change observable state.
    ///
    /// Loads may trap but are otherwise pure, so they are not counted.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Expression::Call { .. } | Expression::MemoryGrow(_) => true,
            Expression::Unary { value, .. } => value.has_side_effects(),
            Expression::Binary { lhs, rhs, .. } => lhs.has_side_effects() || rhs.has_side_effects(),
            Expression::Select {
                cond,
                if_true,
                if_false,
            } => cond.has_side_effects() || if_true.has_side_effects() || if_false.has_side_effects(),
            Expression::Load { addr, .. } => addr.has_side_effects(),
            Expression::Const(_)
            | Expression::LocalGet(_)
            | Expression::GlobalGet(_)
            | Expression::MemorySize => false,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Statements and blocks
// ══════════════════════════════════════════════════════════════════════════════

/// A node executed for its effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    LocalSet {
        index: u32,
        value: Expression,
    },
    GlobalSet {
        name: String,
        value: Expression,
    },
    Store {
        access: Access,
        offset: u32,
        align: u32,
        addr: Expression,
        value: Expression,
    },
    /// Evaluate and discard.
    Drop(Expression),
    /// Call a function without a result.
    Call {
        func: String,
        args: Vec<Expression>,
    },
    Block(Block),
    /// A native loop around `body`.  Branching to `label` restarts the loop,
    /// branching to the body's label leaves it.
    Loop {
        label: String,
        body: Block,
    },
    If {
        cond: Expression,
        then: Block,
        otherwise: Option<Block>,
    },
    /// Branch to the innermost enclosing block or loop named `label`,
    /// optionally only if `cond` is non-zero.
    Br {
        label: String,
        cond: Option<Expression>,
    },
    Return(Option<Expression>),
    Unreachable,
}

impl Statement {
    /// Whether control never falls through this statement.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Statement::Br { cond: None, .. } | Statement::Return(_) | Statement::Unreachable
        )
    }
}

/// A sequence of statements, optionally carrying a branch label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub label: Option<String>,
    pub body: Vec<Statement>,
}

impl Block {
    /// An unlabelled block.
    pub fn new() -> Self {
        Self::default()
    }

    /// A block that can be targeted by `Br { label }`.
    pub fn named(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            body: Vec::new(),
        }
    }

    pub fn push(&mut self, stmt: Statement) {
        self.body.push(stmt);
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }
}
