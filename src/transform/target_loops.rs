//! Target-specific loop forms.
//!
//! On GPU targets a loop bound to a hardware index is replaced by its body,
//! with the iterator rewritten in terms of the index variable, and its
//! extent becomes the launch extent of that dimension. Host targets keep
//! every loop and ignore binds.

use crate::ir::expr::{Expr, ExprNode, For, GpuAxis};
use crate::ir::mutate::{self, map_children};
use crate::ir::simplify::simplify;
use crate::transform::flatten::flatten_blocks;
use crate::transform::{Pass, PassContext, PassKind, Target};
use crate::utils::errors::{ConfigErrorKind, LowerError, LowerResult};
use log::{debug, warn};
use std::collections::HashMap;

pub struct TargetLoopsPass;

impl Pass for TargetLoopsPass {
    fn run(&self, body: &Expr, ctx: &mut PassContext) -> LowerResult<Expr> {
        match ctx.target {
            Target::Host => {
                mutate::for_each(body, &mut |e| {
                    if let ExprNode::For(For { var, annotations, .. }) = e.node() {
                        if let Some(axis) = annotations.bind {
                            warn!("ignoring bind of loop {} to {} on host target", var, axis.name());
                        }
                    }
                });
                Ok(body.clone())
            }
            Target::Gpu => {
                let out = lower_bound_loops(body, ctx)?;
                // blocks left behind by removed loops
                Ok(flatten_blocks(&out))
            }
        }
    }

    fn kind(&self) -> PassKind {
        PassKind::TargetLoops
    }
}

fn record_extent(dims: &mut Vec<Option<i64>>, axis: GpuAxis, extent: i64) -> LowerResult<()> {
    let dim = axis.dim();
    if dims.len() <= dim {
        dims.resize(dim + 1, None);
    }
    // every bound loop of one kernel shares the launch configuration
    match dims[dim] {
        Some(recorded) if recorded != extent => Err(LowerError::config(
            ConfigErrorKind::InvalidGpuBind,
            format!("{} bound to extents {} and {}", axis.name(), recorded, extent),
        )),
        _ => {
            dims[dim] = Some(extent);
            Ok(())
        }
    }
}

fn lower_bound_loops(expr: &Expr, ctx: &mut PassContext) -> LowerResult<Expr> {
    let expr = map_children(expr, |c| lower_bound_loops(c, ctx))?;
    let ExprNode::For(l) = expr.node() else {
        return Ok(expr.clone());
    };
    let Some(axis) = l.annotations.bind else {
        return Ok(expr.clone());
    };
    let extent = simplify(&l.extent).as_int().ok_or_else(|| {
        LowerError::config(
            ConfigErrorKind::InvalidGpuBind,
            format!("loop {} bound to {} has non-constant extent {}", l.var, axis.name(), l.extent),
        )
    })?;
    if axis.is_block() {
        record_extent(&mut ctx.gpu_grid_dims, axis, extent)?;
    } else {
        record_extent(&mut ctx.gpu_block_dims, axis, extent)?;
    }
    debug!("loop {} mapped to {} with extent {}", l.var, axis.name(), extent);

    let index = simplify(&Expr::add(axis.var().to_expr(), l.min.clone())?);
    let bindings = HashMap::from([(l.var.name.clone(), index)]);
    Ok(mutate::substitute(&l.body, &bindings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Var;
    use crate::ir::tensor::Tensor;
    use crate::ir::types::Type;

    fn bound_loop(axis: GpuAxis, extent: i64) -> Expr {
        let t = Tensor::placeholder("T", &[extent], Type::float(32));
        let c = Var::index("c0");
        let store = Expr::store(t, Expr::float(0.0), vec![c.to_expr()]).unwrap();
        let l = Expr::for_loop(c, Expr::int(0), Expr::int(extent), Expr::block(vec![store])).unwrap();
        let ExprNode::For(f) = l.node() else { unreachable!() };
        let mut f = f.clone();
        f.annotations.bind = Some(axis);
        Expr::from_node(ExprNode::For(f))
    }

    #[test]
    fn test_gpu_replaces_bound_loop() {
        let mut ctx = PassContext::new(Target::Gpu);
        let out = TargetLoopsPass.run(&bound_loop(GpuAxis::ThreadX, 32), &mut ctx).unwrap();
        assert_eq!(out.to_string(), "{\n  T[threadIdx.x] = 0.0\n}");
        assert_eq!(ctx.block_dims(), vec![32]);
        assert!(ctx.gpu_grid_dims.is_empty());
    }

    #[test]
    fn test_host_keeps_bound_loop() {
        let l = bound_loop(GpuAxis::BlockY, 8);
        let mut ctx = PassContext::new(Target::Host);
        let out = TargetLoopsPass.run(&l, &mut ctx).unwrap();
        assert!(out.same_as(&l));
        assert!(ctx.gpu_grid_dims.is_empty());
    }

    #[test]
    fn test_grid_dims_recorded_per_axis() {
        let mut ctx = PassContext::new(Target::Gpu);
        TargetLoopsPass.run(&bound_loop(GpuAxis::BlockY, 8), &mut ctx).unwrap();
        assert_eq!(ctx.gpu_grid_dims, vec![None, Some(8)]);
        assert_eq!(ctx.grid_dims(), vec![1, 8]);
        let err = TargetLoopsPass.run(&bound_loop(GpuAxis::BlockY, 4), &mut ctx).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidGpuBind));
    }

    #[test]
    fn test_unit_extent_conflicts_either_order() {
        let mut ctx = PassContext::new(Target::Gpu);
        TargetLoopsPass.run(&bound_loop(GpuAxis::ThreadX, 1), &mut ctx).unwrap();
        let err = TargetLoopsPass.run(&bound_loop(GpuAxis::ThreadX, 8), &mut ctx).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidGpuBind));

        let mut ctx = PassContext::new(Target::Gpu);
        TargetLoopsPass.run(&bound_loop(GpuAxis::ThreadX, 8), &mut ctx).unwrap();
        let err = TargetLoopsPass.run(&bound_loop(GpuAxis::ThreadX, 1), &mut ctx).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidGpuBind));
    }
}
