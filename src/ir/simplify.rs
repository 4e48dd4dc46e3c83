//! Lightweight simplification of generated expressions.
//!
//! Only what lowering needs: integer index arithmetic is canonicalized
//! through its affine form, constant operands are folded, and conditionals
//! with a known condition are reduced to one branch. This is not a general
//! symbolic simplifier.

use crate::ir::expr::{BinaryOp, Expr, ExprNode};
use crate::ir::mutate::map_children;
use crate::ir::types::Type;
use crate::poly::affine::AffineForm;
use std::convert::Infallible;

/// Simplify `expr` bottom-up.
pub fn simplify(expr: &Expr) -> Expr {
    let rebuilt = match map_children(expr, |c| Ok::<_, Infallible>(simplify(c))) {
        Ok(e) => e,
        Err(never) => match never {},
    };
    simplify_node(&rebuilt)
}

fn as_bool(e: &Expr) -> Option<bool> {
    match e.node() {
        ExprNode::UIntImm { ty, value } if ty.is_bool() => Some(*value != 0),
        _ => None,
    }
}

fn as_float(e: &Expr) -> Option<f64> {
    match e.node() {
        ExprNode::FloatImm { value, .. } => Some(*value),
        _ => None,
    }
}

fn simplify_node(expr: &Expr) -> Expr {
    match expr.node() {
        ExprNode::Binary { op, ty, a, b } => {
            if *ty == Type::index() && matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) {
                if let Some(form) = AffineForm::from_expr(expr) {
                    return form.to_expr();
                }
            }
            fold_binary(*op, *ty, a, b).unwrap_or_else(|| expr.clone())
        }
        ExprNode::Unary { .. } if expr.ty() == Type::index() => {
            AffineForm::from_expr(expr).map(|f| f.to_expr()).unwrap_or_else(|| expr.clone())
        }
        ExprNode::IfThenElse { condition, then_case, else_case } => match as_bool(condition) {
            Some(true) => then_case.clone(),
            Some(false) => else_case.clone().unwrap_or_else(|| Expr::block(vec![])),
            None => expr.clone(),
        },
        _ => expr.clone(),
    }
}

fn fold_binary(op: BinaryOp, ty: Type, a: &Expr, b: &Expr) -> Option<Expr> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        if !ty.is_bool() && a.ty().is_int() {
            let v = match op {
                BinaryOp::Add => x.checked_add(y)?,
                BinaryOp::Sub => x.checked_sub(y)?,
                BinaryOp::Mul => x.checked_mul(y)?,
                BinaryOp::Div if y != 0 => x.div_euclid(y),
                BinaryOp::Mod if y != 0 => x.rem_euclid(y),
                BinaryOp::Min => x.min(y),
                BinaryOp::Max => x.max(y),
                _ => return None,
            };
            return Expr::int_imm(ty, v).ok();
        }
        if op.is_compare() && a.ty().is_int() {
            let v = match op {
                BinaryOp::EQ => x == y,
                BinaryOp::NE => x != y,
                BinaryOp::LT => x < y,
                BinaryOp::LE => x <= y,
                BinaryOp::GT => x > y,
                _ => x >= y,
            };
            return Some(Expr::bool_(v));
        }
    }
    if let (Some(x), Some(y)) = (as_float(a), as_float(b)) {
        let v = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div if y != 0.0 => x / y,
            BinaryOp::Min => x.min(y),
            BinaryOp::Max => x.max(y),
            _ => return None,
        };
        return Expr::float_imm(ty, v).ok();
    }
    if op.is_logical() {
        let (x, y) = (as_bool(a), as_bool(b));
        return match (op, x, y) {
            (BinaryOp::And, Some(false), _) | (BinaryOp::And, _, Some(false)) => Some(Expr::bool_(false)),
            (BinaryOp::Or, Some(true), _) | (BinaryOp::Or, _, Some(true)) => Some(Expr::bool_(true)),
            (_, Some(_), _) => Some(b.clone()),
            (_, _, Some(_)) => Some(a.clone()),
            _ => None,
        };
    }
    // min/max of index expressions whose difference is constant
    if matches!(op, BinaryOp::Min | BinaryOp::Max) && ty == Type::index() {
        let diff = AffineForm::from_expr(a)? - AffineForm::from_expr(b)?;
        if diff.is_constant() {
            let a_wins = (diff.constant <= 0) == (op == BinaryOp::Min);
            return Some(if a_wins { a.clone() } else { b.clone() });
        }
    }
    None
}
