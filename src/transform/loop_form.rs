//! Polyhedral loops to plain loops.
//!
//! `poly_for (c, init, c < bound, 1)` becomes `for (c, init, bound - init)`
//! (and `c <= bound` gives one more iteration). The execution form is taken
//! from the annotations attached by the marking passes.

use crate::ir::expr::{BinaryOp, Expr, ExprNode, For, ForType, LoopAnnotations, PolyFor};
use crate::ir::mutate::map_children;
use crate::ir::simplify::simplify;
use crate::transform::{Pass, PassContext, PassKind};
use crate::utils::errors::{InternalErrorKind, LowerError, LowerResult};

pub struct PolyForToForPass;

impl Pass for PolyForToForPass {
    fn run(&self, body: &Expr, _ctx: &mut PassContext) -> LowerResult<Expr> {
        poly_for_to_for(body)
    }

    fn kind(&self) -> PassKind {
        PassKind::PolyForToFor
    }
}

pub fn poly_for_to_for(expr: &Expr) -> LowerResult<Expr> {
    let expr = map_children(expr, poly_for_to_for)?;
    match expr.node() {
        ExprNode::PolyFor(l) => convert(l),
        _ => Ok(expr.clone()),
    }
}

fn for_type(annotations: &LoopAnnotations) -> ForType {
    if annotations.vectorize.is_some() {
        ForType::Vectorized
    } else if annotations.unrolled {
        ForType::Unrolled
    } else {
        ForType::Serial
    }
}

fn convert(l: &PolyFor) -> LowerResult<Expr> {
    let unsupported = |what: &str| {
        LowerError::internal(
            InternalErrorKind::UnsupportedLoop,
            format!("loop over {} has {} ({})", l.iterator, what, l.condition),
        )
    };
    if l.inc.as_int() != Some(1) {
        return Err(unsupported("a non-unit stride"));
    }
    let ExprNode::Binary { op, a, b, .. } = l.condition.node() else {
        return Err(unsupported("a non-comparison condition"));
    };
    if a.as_var().map(|v| v.name.as_str()) != Some(l.iterator.name.as_str()) {
        return Err(unsupported("a condition not bounding its iterator"));
    }
    let extent = match op {
        BinaryOp::LT => Expr::sub(b.clone(), l.init.clone())?,
        BinaryOp::LE => Expr::add(Expr::sub(b.clone(), l.init.clone())?, Expr::int(1))?,
        _ => return Err(unsupported("an unsupported comparison")),
    };
    Ok(Expr::from_node(ExprNode::For(For {
        var: l.iterator.clone(),
        min: l.init.clone(),
        extent: simplify(&extent),
        for_type: for_type(&l.annotations),
        annotations: l.annotations.clone(),
        body: l.body.clone(),
    })))
}
