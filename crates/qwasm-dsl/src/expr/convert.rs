//! The conversion matrix behind `to::<U>()` and implicit widening.
//!
//! Sub-word integers are kept in canonical form inside their `i32` slot:
//! signed values sign-extended, unsigned values zero-extended.  Every
//! operation that can leave the canonical range ends in [`normalize`].

use qwasm_ir::{BinaryOp, Expression, NumType, UnaryOp};

use crate::types::Kind;

/// Bring a sub-word integer back into canonical form.  Other kinds are
/// returned unchanged.
pub(crate) fn normalize(expr: Expression, kind: Kind) -> Expression {
    match kind {
        Kind::Int { bytes: 1, signed: true } => Expression::unary(UnaryOp::Extend8S, NumType::I32, expr),
        Kind::Int { bytes: 2, signed: true } => Expression::unary(UnaryOp::Extend16S, NumType::I32, expr),
        Kind::Int { bytes: 1, signed: false } => mask(expr, 0xFF),
        Kind::Int { bytes: 2, signed: false } => mask(expr, 0xFFFF),
        _ => expr,
    }
}

fn mask(expr: Expression, bits: i32) -> Expression {
    Expression::binary(BinaryOp::And, NumType::I32, expr, Expression::i32(bits))
}

/// Convert a canonical value of kind `from` to kind `to`.
pub(crate) fn convert(expr: Expression, from: Kind, to: Kind) -> Expression {
    if from == to {
        return expr;
    }
    match (from, to) {
        (_, Kind::Bool) => {
            let ty = from.num_type();
            let zero = Expression::Const(qwasm_ir::Literal::zero(ty));
            Expression::binary(BinaryOp::Ne, ty, expr, zero)
        }
        (Kind::Bool, Kind::Int { bytes: 8, .. }) => Expression::unary(UnaryOp::ExtendU, NumType::I32, expr),
        // 0 and 1 are canonical in every narrower integer type
        (Kind::Bool, Kind::Int { .. }) => expr,
        (Kind::Bool, Kind::Float { .. }) => {
            Expression::unary(UnaryOp::ConvertU(to.num_type()), NumType::I32, expr)
        }
        (Kind::Int { bytes: fb, signed: fs }, Kind::Int { bytes: tb, signed: ts }) => {
            int_to_int(expr, fb, fs, tb, ts, to)
        }
        (Kind::Int { signed, .. }, Kind::Float { .. }) => {
            let op = if signed {
                UnaryOp::ConvertS(to.num_type())
            } else {
                UnaryOp::ConvertU(to.num_type())
            };
            Expression::unary(op, from.num_type(), expr)
        }
        (Kind::Float { .. }, Kind::Int { bytes, signed }) => {
            let target = if bytes == 8 { NumType::I64 } else { NumType::I32 };
            let op = if signed {
                UnaryOp::TruncS(target)
            } else {
                UnaryOp::TruncU(target)
            };
            normalize(Expression::unary(op, from.num_type(), expr), to)
        }
        (Kind::Float { bytes: 4 }, Kind::Float { .. }) => Expression::unary(UnaryOp::Promote, NumType::F32, expr),
        (Kind::Float { .. }, Kind::Float { .. }) => Expression::unary(UnaryOp::Demote, NumType::F64, expr),
    }
}

fn int_to_int(expr: Expression, from_bytes: u8, from_signed: bool, to_bytes: u8, to_signed: bool, to: Kind) -> Expression {
    match (from_bytes == 8, to_bytes == 8) {
        (false, true) => {
            // canonical sub-word values extend correctly from their slot
            let op = if from_signed { UnaryOp::ExtendS } else { UnaryOp::ExtendU };
            Expression::unary(op, NumType::I32, expr)
        }
        (true, false) => normalize(Expression::unary(UnaryOp::Wrap, NumType::I64, expr), to),
        (true, true) => expr,
        (false, false) => {
            if from_signed == to_signed && to_bytes >= from_bytes {
                expr
            } else {
                normalize(expr, to)
            }
        }
    }
}
