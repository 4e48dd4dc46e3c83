//! Inline expansion.
//!
//! Loads of a tensor marked inline are replaced by its defining expression
//! with the tensor's axes bound to the load indices. Definitions may read
//! other inlined tensors; those are expanded in turn.

use crate::ir::expr::{Expr, ExprNode};
use crate::ir::mutate::{self, map_children};
use crate::ir::simplify::simplify;
use crate::ir::tensor::Tensor;
use crate::transform::{Pass, PassContext, PassKind};
use crate::utils::errors::{ConfigErrorKind, LowerError, LowerResult};
use log::trace;
use std::collections::HashMap;

pub struct InlinePass;

impl Pass for InlinePass {
    fn run(&self, body: &Expr, _ctx: &mut PassContext) -> LowerResult<Expr> {
        inline_loads(body)
    }

    fn kind(&self) -> PassKind {
        PassKind::Inline
    }
}

/// Expand every load of an inlined tensor in `expr`.
pub fn inline_loads(expr: &Expr) -> LowerResult<Expr> {
    let expr = map_children(expr, inline_loads)?;
    match expr.node() {
        ExprNode::Load { tensor, indices } if tensor.is_inlined() => {
            let definition = expand(tensor, indices)?;
            trace!("inlined load of {}", tensor.name());
            // the definition may itself read inlined tensors
            inline_loads(&definition)
        }
        _ => Ok(expr.clone()),
    }
}

fn expand(tensor: &Tensor, indices: &[Expr]) -> LowerResult<Expr> {
    let fail = |msg: &str| LowerError::config_for(ConfigErrorKind::InvalidInline, tensor.name(), msg);
    if tensor.reduction().is_some() {
        return Err(fail("a reduction cannot be inlined"));
    }
    let body = tensor.body().ok_or_else(|| fail("an input tensor cannot be inlined"))?;
    let bindings: HashMap<String, Expr> = tensor
        .axis()
        .iter()
        .zip(indices)
        .map(|(var, index)| (var.name.clone(), index.clone()))
        .collect();
    Ok(simplify(&mutate::substitute(body, &bindings)))
}
