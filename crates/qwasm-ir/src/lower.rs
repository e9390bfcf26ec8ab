//! Lowering of IR trees to `wasm-encoder` instructions.
//!
//! Labels are resolved against a stack of the enclosing blocks; a `Br`
//! becomes `br`/`br_if` with the relative depth of the innermost block
//! carrying that label.

use std::collections::HashMap;

use wasm_encoder::{BlockType, Function, Instruction, MemArg};

use crate::error::{IrError, IrResult};
use crate::node::{Access, BinaryOp, Block, Expression, Literal, NumType, Statement, UnaryOp};

/// Name → index tables, resolved once per module.
pub struct Symbols {
    pub functions: HashMap<String, u32>,
    pub globals: HashMap<String, u32>,
}

/// Lower a function body into `f`, including the final `end`.
///
/// The body block itself is the function's implicit outermost frame, so a
/// branch to its label leaves the function.
pub fn lower_body(body: &Block, symbols: &Symbols, f: &mut Function) -> IrResult<()> {
    let mut lowerer = Lowerer {
        symbols,
        labels: vec![body.label.as_deref()],
        out: f,
    };
    lowerer.block(body)?;
    lowerer.emit(Instruction::End);
    Ok(())
}

struct Lowerer<'s, 'f, 'b> {
    symbols: &'s Symbols,
    labels: Vec<Option<&'b str>>,
    out: &'f mut Function,
}

impl<'b> Lowerer<'_, '_, 'b> {
    fn emit(&mut self, instr: Instruction<'static>) {
        self.out.instruction(&instr);
    }

    fn block(&mut self, block: &'b Block) -> IrResult<()> {
        for stmt in &block.body {
            self.statement(stmt)?;
        }
        Ok(())
    }

    /// Emit `block` as a nested native block carrying its label.
    fn nested(&mut self, block: &'b Block) -> IrResult<()> {
        self.emit(Instruction::Block(BlockType::Empty));
        self.labels.push(block.label.as_deref());
        self.block(block)?;
        self.labels.pop();
        self.emit(Instruction::End);
        Ok(())
    }

    fn depth(&self, label: &str) -> IrResult<u32> {
        self.labels
            .iter()
            .rev()
            .position(|l| *l == Some(label))
            .map(|d| d as u32)
            .ok_or_else(|| IrError::UnresolvedSymbol(format!("branch label `{label}`")))
    }

    fn function(&self, name: &str) -> IrResult<u32> {
        self.symbols
            .functions
            .get(name)
            .copied()
            .ok_or_else(|| IrError::UnresolvedSymbol(format!("function `{name}`")))
    }

    fn global(&self, name: &str) -> IrResult<u32> {
        self.symbols
            .globals
            .get(name)
            .copied()
            .ok_or_else(|| IrError::UnresolvedSymbol(format!("global `{name}`")))
    }

    // ── Statements ───────────────────────────────────────────────────────

    fn statement(&mut self, stmt: &'b Statement) -> IrResult<()> {
        match stmt {
            Statement::LocalSet { index, value } => {
                self.expression(value)?;
                self.emit(Instruction::LocalSet(*index));
            }
            Statement::GlobalSet { name, value } => {
                let idx = self.global(name)?;
                self.expression(value)?;
                self.emit(Instruction::GlobalSet(idx));
            }
            Statement::Store {
                access,
                offset,
                align,
                addr,
                value,
            } => {
                self.expression(addr)?;
                self.expression(value)?;
                self.emit(store_instruction(*access, memarg(*offset, *align))?);
            }
            Statement::Drop(value) => {
                self.expression(value)?;
                self.emit(Instruction::Drop);
            }
            Statement::Call { func, args } => {
                let idx = self.function(func)?;
                for arg in args {
                    self.expression(arg)?;
                }
                self.emit(Instruction::Call(idx));
            }
            Statement::Block(block) => self.nested(block)?,
            Statement::Loop { label, body } => {
                self.emit(Instruction::Loop(BlockType::Empty));
                self.labels.push(Some(label.as_str()));
                self.nested(body)?;
                self.labels.pop();
                self.emit(Instruction::End);
            }
            Statement::If {
                cond,
                then,
                otherwise,
            } => {
                self.expression(cond)?;
                self.emit(Instruction::If(BlockType::Empty));
                self.labels.push(then.label.as_deref());
                self.block(then)?;
                self.labels.pop();
                if let Some(otherwise) = otherwise {
                    self.emit(Instruction::Else);
                    self.labels.push(otherwise.label.as_deref());
                    self.block(otherwise)?;
                    self.labels.pop();
                }
                self.emit(Instruction::End);
            }
            Statement::Br { label, cond } => {
                let depth = self.depth(label)?;
                match cond {
                    Some(cond) => {
                        self.expression(cond)?;
                        self.emit(Instruction::BrIf(depth));
                    }
                    None => self.emit(Instruction::Br(depth)),
                }
            }
            Statement::Return(value) => {
                if let Some(value) = value {
                    self.expression(value)?;
                }
                self.emit(Instruction::Return);
            }
            Statement::Unreachable => self.emit(Instruction::Unreachable),
        }
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────────

    fn expression(&mut self, expr: &Expression) -> IrResult<()> {
        match expr {
            Expression::Const(lit) => self.emit(match *lit {
                Literal::I32(v) => Instruction::I32Const(v),
                Literal::I64(v) => Instruction::I64Const(v),
                Literal::F32(v) => Instruction::F32Const(v),
                Literal::F64(v) => Instruction::F64Const(v),
            }),
            Expression::Unary { op, ty, value } => {
                self.expression(value)?;
                self.emit(unary_instruction(*op, *ty)?);
            }
            Expression::Binary { op, ty, lhs, rhs } => {
                self.expression(lhs)?;
                self.expression(rhs)?;
                self.emit(binary_instruction(*op, *ty)?);
            }
            Expression::Select {
                cond,
                if_true,
                if_false,
            } => {
                self.expression(if_true)?;
                self.expression(if_false)?;
                self.expression(cond)?;
                self.emit(Instruction::Select);
            }
            Expression::LocalGet(idx) => self.emit(Instruction::LocalGet(*idx)),
            Expression::GlobalGet(name) => {
                let idx = self.global(name)?;
                self.emit(Instruction::GlobalGet(idx));
            }
            Expression::Load {
                access,
                offset,
                align,
                addr,
            } => {
                self.expression(addr)?;
                self.emit(load_instruction(*access, memarg(*offset, *align))?);
            }
            Expression::Call { func, args } => {
                let idx = self.function(func)?;
                for arg in args {
                    self.expression(arg)?;
                }
                self.emit(Instruction::Call(idx));
            }
            Expression::MemorySize => self.emit(Instruction::MemorySize(0)),
            Expression::MemoryGrow(delta) => {
                self.expression(delta)?;
                self.emit(Instruction::MemoryGrow(0));
            }
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Instruction selection
// ══════════════════════════════════════════════════════════════════════════════

fn memarg(offset: u32, align: u32) -> MemArg {
    MemArg {
        offset: offset as u64,
        align,
        memory_index: 0,
    }
}

fn unary_instruction(op: UnaryOp, ty: NumType) -> IrResult<Instruction<'static>> {
    use NumType::*;
    use UnaryOp as U;
    Ok(match (op, ty) {
        (U::Clz, I32) => Instruction::I32Clz,
        (U::Clz, I64) => Instruction::I64Clz,
        (U::Ctz, I32) => Instruction::I32Ctz,
        (U::Ctz, I64) => Instruction::I64Ctz,
        (U::Popcnt, I32) => Instruction::I32Popcnt,
        (U::Popcnt, I64) => Instruction::I64Popcnt,
        (U::Eqz, I32) => Instruction::I32Eqz,
        (U::Eqz, I64) => Instruction::I64Eqz,

        (U::Neg, F32) => Instruction::F32Neg,
        (U::Neg, F64) => Instruction::F64Neg,
        (U::Abs, F32) => Instruction::F32Abs,
        (U::Abs, F64) => Instruction::F64Abs,
        (U::Ceil, F32) => Instruction::F32Ceil,
        (U::Ceil, F64) => Instruction::F64Ceil,
        (U::Floor, F32) => Instruction::F32Floor,
        (U::Floor, F64) => Instruction::F64Floor,
        (U::Sqrt, F32) => Instruction::F32Sqrt,
        (U::Sqrt, F64) => Instruction::F64Sqrt,
        (U::Trunc, F32) => Instruction::F32Trunc,
        (U::Trunc, F64) => Instruction::F64Trunc,
        (U::Nearest, F32) => Instruction::F32Nearest,
        (U::Nearest, F64) => Instruction::F64Nearest,

        (U::Wrap, I64) => Instruction::I32WrapI64,
        (U::ExtendS, I32) => Instruction::I64ExtendI32S,
        (U::ExtendU, I32) => Instruction::I64ExtendI32U,
        (U::Extend8S, I32) => Instruction::I32Extend8S,
        (U::Extend16S, I32) => Instruction::I32Extend16S,

        (U::ConvertS(F32), I32) => Instruction::F32ConvertI32S,
        (U::ConvertS(F32), I64) => Instruction::F32ConvertI64S,
        (U::ConvertS(F64), I32) => Instruction::F64ConvertI32S,
        (U::ConvertS(F64), I64) => Instruction::F64ConvertI64S,
        (U::ConvertU(F32), I32) => Instruction::F32ConvertI32U,
        (U::ConvertU(F32), I64) => Instruction::F32ConvertI64U,
        (U::ConvertU(F64), I32) => Instruction::F64ConvertI32U,
        (U::ConvertU(F64), I64) => Instruction::F64ConvertI64U,

        (U::TruncS(I32), F32) => Instruction::I32TruncF32S,
        (U::TruncS(I32), F64) => Instruction::I32TruncF64S,
        (U::TruncS(I64), F32) => Instruction::I64TruncF32S,
        (U::TruncS(I64), F64) => Instruction::I64TruncF64S,
        (U::TruncU(I32), F32) => Instruction::I32TruncF32U,
        (U::TruncU(I32), F64) => Instruction::I32TruncF64U,
        (U::TruncU(I64), F32) => Instruction::I64TruncF32U,
        (U::TruncU(I64), F64) => Instruction::I64TruncF64U,

        (U::Promote, F32) => Instruction::F64PromoteF32,
        (U::Demote, F64) => Instruction::F32DemoteF64,
        (U::Reinterpret, F32) => Instruction::I32ReinterpretF32,
        (U::Reinterpret, F64) => Instruction::I64ReinterpretF64,
        (U::Reinterpret, I32) => Instruction::F32ReinterpretI32,
        (U::Reinterpret, I64) => Instruction::F64ReinterpretI64,

        _ => {
            return Err(IrError::Internal(format!(
                "no instruction for unary {op:?} on {ty:?}"
            )))
        }
    })
}

fn binary_instruction(op: BinaryOp, ty: NumType) -> IrResult<Instruction<'static>> {
    use BinaryOp as B;
    use NumType::*;
    Ok(match (op, ty) {
        (B::Add, I32) => Instruction::I32Add,
        (B::Sub, I32) => Instruction::I32Sub,
        (B::Mul, I32) => Instruction::I32Mul,
        (B::DivS, I32) => Instruction::I32DivS,
        (B::DivU, I32) => Instruction::I32DivU,
        (B::RemS, I32) => Instruction::I32RemS,
        (B::RemU, I32) => Instruction::I32RemU,
        (B::And, I32) => Instruction::I32And,
        (B::Or, I32) => Instruction::I32Or,
        (B::Xor, I32) => Instruction::I32Xor,
        (B::Shl, I32) => Instruction::I32Shl,
        (B::ShrS, I32) => Instruction::I32ShrS,
        (B::ShrU, I32) => Instruction::I32ShrU,
        (B::Rotl, I32) => Instruction::I32Rotl,
        (B::Rotr, I32) => Instruction::I32Rotr,
        (B::Eq, I32) => Instruction::I32Eq,
        (B::Ne, I32) => Instruction::I32Ne,
        (B::LtS, I32) => Instruction::I32LtS,
        (B::LtU, I32) => Instruction::I32LtU,
        (B::LeS, I32) => Instruction::I32LeS,
        (B::LeU, I32) => Instruction::I32LeU,
        (B::GtS, I32) => Instruction::I32GtS,
        (B::GtU, I32) => Instruction::I32GtU,
        (B::GeS, I32) => Instruction::I32GeS,
        (B::GeU, I32) => Instruction::I32GeU,

        (B::Add, I64) => Instruction::I64Add,
        (B::Sub, I64) => Instruction::I64Sub,
        (B::Mul, I64) => Instruction::I64Mul,
        (B::DivS, I64) => Instruction::I64DivS,
        (B::DivU, I64) => Instruction::I64DivU,
        (B::RemS, I64) => Instruction::I64RemS,
        (B::RemU, I64) => Instruction::I64RemU,
        (B::And, I64) => Instruction::I64And,
        (B::Or, I64) => Instruction::I64Or,
        (B::Xor, I64) => Instruction::I64Xor,
        (B::Shl, I64) => Instruction::I64Shl,
        (B::ShrS, I64) => Instruction::I64ShrS,
        (B::ShrU, I64) => Instruction::I64ShrU,
        (B::Rotl, I64) => Instruction::I64Rotl,
        (B::Rotr, I64) => Instruction::I64Rotr,
        (B::Eq, I64) => Instruction::I64Eq,
        (B::Ne, I64) => Instruction::I64Ne,
        (B::LtS, I64) => Instruction::I64LtS,
        (B::LtU, I64) => Instruction::I64LtU,
        (B::LeS, I64) => Instruction::I64LeS,
        (B::LeU, I64) => Instruction::I64LeU,
        (B::GtS, I64) => Instruction::I64GtS,
        (B::GtU, I64) => Instruction::I64GtU,
        (B::GeS, I64) => Instruction::I64GeS,
        (B::GeU, I64) => Instruction::I64GeU,

        (B::Add, F32) => Instruction::F32Add,
        (B::Sub, F32) => Instruction::F32Sub,
        (B::Mul, F32) => Instruction::F32Mul,
        (B::DivS, F32) => Instruction::F32Div,
        (B::Min, F32) => Instruction::F32Min,
        (B::Max, F32) => Instruction::F32Max,
        (B::CopySign, F32) => Instruction::F32Copysign,
        (B::Eq, F32) => Instruction::F32Eq,
        (B::Ne, F32) => Instruction::F32Ne,
        (B::LtS, F32) => Instruction::F32Lt,
        (B::LeS, F32) => Instruction::F32Le,
        (B::GtS, F32) => Instruction::F32Gt,
        (B::GeS, F32) => Instruction::F32Ge,

        (B::Add, F64) => Instruction::F64Add,
        (B::Sub, F64) => Instruction::F64Sub,
        (B::Mul, F64) => Instruction::F64Mul,
        (B::DivS, F64) => Instruction::F64Div,
        (B::Min, F64) => Instruction::F64Min,
        (B::Max, F64) => Instruction::F64Max,
        (B::CopySign, F64) => Instruction::F64Copysign,
        (B::Eq, F64) => Instruction::F64Eq,
        (B::Ne, F64) => Instruction::F64Ne,
        (B::LtS, F64) => Instruction::F64Lt,
        (B::LeS, F64) => Instruction::F64Le,
        (B::GtS, F64) => Instruction::F64Gt,
        (B::GeS, F64) => Instruction::F64Ge,

        _ => {
            return Err(IrError::Internal(format!(
                "no instruction for binary {op:?} on {ty:?}"
            )))
        }
    })
}

fn load_instruction(access: Access, m: MemArg) -> IrResult<Instruction<'static>> {
    use NumType::*;
    Ok(match (access.ty, access.bytes, access.signed) {
        (I32, 4, _) => Instruction::I32Load(m),
        (I32, 1, true) => Instruction::I32Load8S(m),
        (I32, 1, false) => Instruction::I32Load8U(m),
        (I32, 2, true) => Instruction::I32Load16S(m),
        (I32, 2, false) => Instruction::I32Load16U(m),
        (I64, 8, _) => Instruction::I64Load(m),
        (I64, 1, true) => Instruction::I64Load8S(m),
        (I64, 1, false) => Instruction::I64Load8U(m),
        (I64, 2, true) => Instruction::I64Load16S(m),
        (I64, 2, false) => Instruction::I64Load16U(m),
        (I64, 4, true) => Instruction::I64Load32S(m),
        (I64, 4, false) => Instruction::I64Load32U(m),
        (F32, 4, _) => Instruction::F32Load(m),
        (F64, 8, _) => Instruction::F64Load(m),
        _ => return Err(IrError::Internal(format!("unsupported load {access:?}"))),
    })
}

fn store_instruction(access: Access, m: MemArg) -> IrResult<Instruction<'static>> {
    use NumType::*;
    Ok(match (access.ty, access.bytes) {
        (I32, 4) => Instruction::I32Store(m),
        (I32, 1) => Instruction::I32Store8(m),
        (I32, 2) => Instruction::I32Store16(m),
        (I64, 8) => Instruction::I64Store(m),
        (I64, 1) => Instruction::I64Store8(m),
        (I64, 2) => Instruction::I64Store16(m),
        (I64, 4) => Instruction::I64Store32(m),
        (F32, 4) => Instruction::F32Store(m),
        (F64, 8) => Instruction::F64Store(m),
        _ => return Err(IrError::Internal(format!("unsupported store {access:?}"))),
    })
}
