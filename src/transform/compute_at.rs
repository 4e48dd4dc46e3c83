//! Compute-at fix-up.
//!
//! A producer fused into loop `level` of its consumer only needs the window
//! of elements live in one consumer iteration. Inside the fused scope every
//! access to the producer has the window origin subtracted from its index,
//! so the producer's own addressing starts at zero, and the producer is
//! rebound to a tensor of the shrunk shape. The initialization stage of a
//! reduction producer shares its buffer and is rewritten the same way.
//!
//! The pass runs before inline expansion, so a load of an inlined tensor
//! whose definition reads the producer is expanded here first and its
//! producer accesses re-zeroed like direct ones.

use crate::ir::expr::{Expr, ExprNode};
use crate::ir::mutate::{self, map_children};
use crate::ir::simplify::simplify;
use crate::ir::tensor::Tensor;
use crate::poly::schedule::ComputeAtInfo;
use crate::transform::inline::inline_loads;
use crate::transform::{Pass, PassContext, PassKind};
use crate::utils::errors::{ConfigErrorKind, LowerError, LowerResult};
use log::{debug, trace};
use std::collections::HashMap;

pub struct ComputeAtPass;

impl Pass for ComputeAtPass {
    fn run(&self, body: &Expr, ctx: &mut PassContext) -> LowerResult<Expr> {
        let mut out = body.clone();
        for info in &ctx.compute_ats {
            debug!(
                "compute-at {} -> {} level {}: shape {:?} -> {:?}",
                info.producer,
                info.consumer,
                info.level,
                info.producer_shape,
                info.shrunk_shape()
            );
            out = fix_compute_at(&out, info)?;
        }
        Ok(out)
    }

    fn kind(&self) -> PassKind {
        PassKind::ComputeAt
    }
}

/// Re-zero and shrink every access to `info.producer` in `body`.
pub fn fix_compute_at(body: &Expr, info: &ComputeAtInfo) -> LowerResult<Expr> {
    let mut rewriter = Rewriter { info, scope: Vec::new(), shrunk: HashMap::new() };
    rewriter.rewrite(body)
}

struct Rewriter<'a> {
    info: &'a ComputeAtInfo,
    /// Iterators of the enclosing loops, outermost first
    scope: Vec<String>,
    /// Shrunk handles by tensor name, shared by all accesses
    shrunk: HashMap<String, Tensor>,
}

impl Rewriter<'_> {
    fn rewrite(&mut self, expr: &Expr) -> LowerResult<Expr> {
        match expr.node() {
            ExprNode::PolyFor(l) => self.in_scope(l.iterator.name.clone(), expr),
            ExprNode::For(l) => self.in_scope(l.var.name.clone(), expr),
            ExprNode::Load { tensor, .. } if tensor.is_inlined() && !self.is_producer(tensor) => {
                let expanded = inline_loads(expr)?;
                if mutate::accessed_tensors(&expanded).iter().any(|t| self.is_producer(t)) {
                    trace!("expanded {} to reach {}", tensor.name(), self.info.producer);
                    self.rewrite(&expanded)
                } else {
                    map_children(expr, |c| self.rewrite(c))
                }
            }
            ExprNode::Load { tensor, indices } if self.is_producer(tensor) => {
                let indices = self.rewrite_all(indices)?;
                let indices = self.rezero(indices)?;
                Expr::load(self.shrunk_handle(tensor), indices)
            }
            ExprNode::Store { tensor, value, indices } if self.is_producer(tensor) => {
                let value = self.rewrite(value)?;
                let indices = self.rewrite_all(indices)?;
                let indices = self.rezero(indices)?;
                Expr::store(self.shrunk_handle(tensor), value, indices)
            }
            _ => map_children(expr, |c| self.rewrite(c)),
        }
    }

    /// The producer itself or its reduction init stage.
    fn is_producer(&self, tensor: &Tensor) -> bool {
        tensor.name() == self.info.producer || tensor.init_of() == Some(self.info.producer.as_str())
    }

    fn in_scope(&mut self, iterator: String, expr: &Expr) -> LowerResult<Expr> {
        self.scope.push(iterator);
        let out = map_children(expr, |c| self.rewrite(c));
        self.scope.pop();
        out
    }

    fn rewrite_all(&mut self, exprs: &[Expr]) -> LowerResult<Vec<Expr>> {
        exprs.iter().map(|e| self.rewrite(e)).collect()
    }

    fn shrunk_handle(&mut self, tensor: &Tensor) -> Tensor {
        let shape = self.info.shrunk_shape();
        self.shrunk
            .entry(tensor.name().to_string())
            .or_insert_with(|| tensor.with_shape(shape))
            .clone()
    }

    fn rezero(&self, indices: Vec<Expr>) -> LowerResult<Vec<Expr>> {
        indices
            .into_iter()
            .enumerate()
            .map(|(dim, index)| {
                let Some(origin) = self.info.origin(dim) else {
                    return Ok(index);
                };
                if let Some(missing) = origin.vars().find(|v| !self.scope.iter().any(|s| s == v)) {
                    return Err(LowerError::config_for(
                        ConfigErrorKind::InvalidComputeAt,
                        &self.info.producer,
                        format!(
                            "access outside the scope of loop {} of {}",
                            missing, self.info.consumer
                        ),
                    ));
                }
                Ok(simplify(&Expr::sub(index, origin.to_expr())?))
            })
            .collect()
    }
}
