//! A small tree optimiser.
//!
//! - level 0: nothing
//! - level 1: integer constant folding, constant-condition selects
//! - level 2: additionally drops statements after a terminator

use crate::node::{BinaryOp, Block, Expression, Literal, Statement, UnaryOp};

/// Optimise `block` and everything nested in it in place.
pub fn optimize_block(block: &mut Block, level: u32) {
    if level == 0 {
        return;
    }
    for stmt in &mut block.body {
        optimize_statement(stmt, level);
    }
    if level >= 2 {
        if let Some(end) = block.body.iter().position(Statement::is_terminator) {
            block.body.truncate(end + 1);
        }
    }
}

fn optimize_statement(stmt: &mut Statement, level: u32) {
    match stmt {
        Statement::LocalSet { value, .. }
        | Statement::GlobalSet { value, .. }
        | Statement::Drop(value) => fold(value),
        Statement::Store { addr, value, .. } => {
            fold(addr);
            fold(value);
        }
        Statement::Call { args, .. } => args.iter_mut().for_each(fold),
        Statement::Block(block) | Statement::Loop { body: block, .. } => optimize_block(block, level),
        Statement::If {
            cond,
            then,
            otherwise,
        } => {
            fold(cond);
            optimize_block(then, level);
            if let Some(otherwise) = otherwise {
                optimize_block(otherwise, level);
            }
        }
        Statement::Br { cond, .. } => {
            if let Some(cond) = cond {
                fold(cond);
            }
        }
        Statement::Return(value) => {
            if let Some(value) = value {
                fold(value);
            }
        }
        Statement::Unreachable => {}
    }
}

/// Fold constant subtrees of `expr`, bottom-up.
pub fn fold(expr: &mut Expression) {
    match expr {
        Expression::Unary { value, .. } | Expression::MemoryGrow(value) => fold(value),
        Expression::Binary { lhs, rhs, .. } => {
            fold(lhs);
            fold(rhs);
        }
        Expression::Select {
            cond,
            if_true,
            if_false,
        } => {
            fold(cond);
            fold(if_true);
            fold(if_false);
        }
        Expression::Load { addr, .. } => fold(addr),
        Expression::Call { args, .. } => args.iter_mut().for_each(fold),
        Expression::Const(_)
        | Expression::LocalGet(_)
        | Expression::GlobalGet(_)
        | Expression::MemorySize => {}
    }
    if let Some(folded) = evaluate(expr) {
        *expr = folded;
    }
}

fn evaluate(expr: &mut Expression) -> Option<Expression> {
    match expr {
        Expression::Unary {
            op: UnaryOp::Eqz,
            value,
            ..
        } => match value.as_const()? {
            Literal::I32(v) => Some(Expression::i32((v == 0) as i32)),
            Literal::I64(v) => Some(Expression::i32((v == 0) as i32)),
            _ => None,
        },
        Expression::Binary { op, lhs, rhs, .. } => {
            fold_binary(*op, lhs.as_const()?, rhs.as_const()?).map(Expression::Const)
        }
        Expression::Select {
            cond,
            if_true,
            if_false,
        } => {
            let Literal::I32(c) = cond.as_const()? else {
                return None;
            };
            let (keep, dropped) = if c != 0 {
                (if_true, if_false)
            } else {
                (if_false, if_true)
            };
            if dropped.has_side_effects() {
                return None;
            }
            Some(std::mem::replace(keep.as_mut(), Expression::i32(0)))
        }
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, lhs: Literal, rhs: Literal) -> Option<Literal> {
    use BinaryOp::*;
    Some(match (lhs, rhs) {
        (Literal::I32(a), Literal::I32(b)) => match op {
            Add => Literal::I32(a.wrapping_add(b)),
            Sub => Literal::I32(a.wrapping_sub(b)),
            Mul => Literal::I32(a.wrapping_mul(b)),
            And => Literal::I32(a & b),
            Or => Literal::I32(a | b),
            Xor => Literal::I32(a ^ b),
            Shl => Literal::I32(a.wrapping_shl(b as u32)),
            ShrS => Literal::I32(a.wrapping_shr(b as u32)),
            ShrU => Literal::I32((a as u32).wrapping_shr(b as u32) as i32),
            Eq => Literal::I32((a == b) as i32),
            Ne => Literal::I32((a != b) as i32),
            _ => return None,
        },
        (Literal::I64(a), Literal::I64(b)) => match op {
            Add => Literal::I64(a.wrapping_add(b)),
            Sub => Literal::I64(a.wrapping_sub(b)),
            Mul => Literal::I64(a.wrapping_mul(b)),
            And => Literal::I64(a & b),
            Or => Literal::I64(a | b),
            Xor => Literal::I64(a ^ b),
            Shl => Literal::I64(a.wrapping_shl(b as u32)),
            ShrS => Literal::I64(a.wrapping_shr(b as u32)),
            ShrU => Literal::I64((a as u64).wrapping_shr(b as u32) as i64),
            Eq => Literal::I32((a == b) as i32),
            Ne => Literal::I32((a != b) as i32),
            _ => return None,
        },
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NumType;

    fn add(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::Add, NumType::I32, lhs, rhs)
    }

    #[test]
    fn folds_nested_constants() {
        let mut e = add(add(Expression::i32(1), Expression::i32(2)), Expression::i32(3));
        fold(&mut e);
        assert_eq!(e, Expression::i32(6));
    }

    #[test]
    fn keeps_dynamic_operands() {
        let mut e = add(Expression::LocalGet(0), add(Expression::i32(1), Expression::i32(2)));
        fold(&mut e);
        assert_eq!(e, add(Expression::LocalGet(0), Expression::i32(3)));
    }

    #[test]
    fn i64_comparison_yields_i32() {
        let mut e = Expression::binary(BinaryOp::Eq, NumType::I64, Expression::i64(4), Expression::i64(4));
        fold(&mut e);
        assert_eq!(e, Expression::i32(1));
    }

    #[test]
    fn select_keeps_side_effects() {
        let call = Expression::Call {
            func: "f".into(),
            args: vec![],
        };
        let mut e = Expression::select(Expression::i32(1), Expression::i32(7), call.clone());
        fold(&mut e);
        assert!(matches!(e, Expression::Select { .. }));

        let mut e = Expression::select(Expression::i32(0), Expression::i32(7), Expression::i32(9));
        fold(&mut e);
        assert_eq!(e, Expression::i32(9));
    }

    #[test]
    fn level_two_truncates_after_terminator() {
        let mut block = Block::new();
        block.push(Statement::Return(None));
        block.push(Statement::Drop(Expression::i32(1)));
        let mut level1 = block.clone();
        optimize_block(&mut level1, 1);
        assert_eq!(level1.len(), 2);
        optimize_block(&mut block, 2);
        assert_eq!(block.len(), 1);
    }
}
