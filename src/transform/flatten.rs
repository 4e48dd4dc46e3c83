//! Nested-block flattening.

use crate::ir::expr::{Expr, ExprNode};
use crate::ir::mutate::map_children;
use crate::transform::{Pass, PassContext, PassKind};
use crate::utils::errors::LowerResult;
use std::convert::Infallible;

pub struct FlattenBlocksPass;

impl Pass for FlattenBlocksPass {
    fn run(&self, body: &Expr, _ctx: &mut PassContext) -> LowerResult<Expr> {
        Ok(flatten_blocks(body))
    }

    fn kind(&self) -> PassKind {
        PassKind::FlattenBlocks
    }
}

/// Splice blocks nested directly in blocks and drop the empty ones.
pub fn flatten_blocks(expr: &Expr) -> Expr {
    let expr = match map_children(expr, |c| Ok::<_, Infallible>(flatten_blocks(c))) {
        Ok(e) => e,
        Err(never) => match never {},
    };
    let ExprNode::Block(stmts) = expr.node() else {
        return expr.clone();
    };
    if !stmts.iter().any(|s| matches!(s.node(), ExprNode::Block(_))) {
        return expr.clone();
    }
    let mut flat = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        match stmt.node() {
            ExprNode::Block(inner) => flat.extend(inner.iter().cloned()),
            _ => flat.push(stmt.clone()),
        }
    }
    Expr::block(flat)
}
