//! Loop annotation passes: vectorize, unroll and GPU bind.
//!
//! All three walk the nest depth first with an explicit stack holding the
//! annotations of the enclosing loops, outermost at index 0. Entering a loop
//! pushes its annotations and leaving pops them back onto the rebuilt node.
//! A store looks its tensor's directive up against the stack as it is at
//! that point and does not recurse further, so a directive level is always
//! interpreted relative to the store's lexical nesting.

use crate::ir::expr::{Expr, ExprNode, For, LoopAnnotations, PolyFor};
use crate::ir::mutate::map_children;
use crate::ir::tensor::Tensor;
use crate::transform::{Pass, PassContext, PassKind};
use crate::utils::errors::{ConfigErrorKind, LowerError, LowerResult};
use log::trace;

/// Marks the loops enclosing a store of `tensor`.
type Marker<'m> = dyn FnMut(&Tensor, &mut [LoopAnnotations]) -> LowerResult<()> + 'm;

/// Rebuild `expr` with loop annotations updated by `mark` at every store.
pub fn mark_loops(expr: &Expr, stack: &mut Vec<LoopAnnotations>, mark: &mut Marker<'_>) -> LowerResult<Expr> {
    match expr.node() {
        ExprNode::Store { tensor, .. } => {
            mark(tensor, stack.as_mut_slice())?;
            Ok(expr.clone())
        }
        ExprNode::PolyFor(l) => {
            stack.push(l.annotations.clone());
            let body = mark_loops(&l.body, stack, mark);
            let annotations = stack.pop().unwrap_or_default();
            let body = body?;
            if annotations == l.annotations && body.same_as(&l.body) {
                return Ok(expr.clone());
            }
            Ok(Expr::from_node(ExprNode::PolyFor(PolyFor { annotations, body, ..l.clone() })))
        }
        ExprNode::For(l) => {
            stack.push(l.annotations.clone());
            let body = mark_loops(&l.body, stack, mark);
            let annotations = stack.pop().unwrap_or_default();
            let body = body?;
            if annotations == l.annotations && body.same_as(&l.body) {
                return Ok(expr.clone());
            }
            Ok(Expr::from_node(ExprNode::For(For { annotations, body, ..l.clone() })))
        }
        _ => map_children(expr, |c| mark_loops(c, stack, mark)),
    }
}

fn out_of_range(kind: ConfigErrorKind, tensor: &Tensor, what: &str, level: usize, depth: usize) -> LowerError {
    LowerError::config_for(
        kind,
        tensor.name(),
        format!("{} level {} exceeds loop depth {}", what, level, depth),
    )
}

pub struct VectorizePass;

impl Pass for VectorizePass {
    fn run(&self, body: &Expr, ctx: &mut PassContext) -> LowerResult<Expr> {
        let mut stack = Vec::new();
        mark_loops(body, &mut stack, &mut |tensor, loops| {
            let Some(info) = ctx.stage(tensor.name()).and_then(|s| s.vectorize) else {
                return Ok(());
            };
            if !info.valid() {
                return Err(LowerError::config_for(
                    ConfigErrorKind::InvalidVectorize,
                    tensor.name(),
                    format!("vectorize factor must be positive, got {}", info.factor),
                ));
            }
            let depth = loops.len();
            let target = loops
                .get_mut(info.level)
                .ok_or_else(|| out_of_range(ConfigErrorKind::InvalidVectorize, tensor, "vectorize", info.level, depth))?;
            trace!("mark level {} vectorized by {} for {}", info.level, info.factor, tensor.name());
            target.vectorize = Some(info);
            Ok(())
        })
    }

    fn kind(&self) -> PassKind {
        PassKind::Vectorize
    }
}

pub struct UnrollPass;

impl Pass for UnrollPass {
    fn run(&self, body: &Expr, ctx: &mut PassContext) -> LowerResult<Expr> {
        let mut stack = Vec::new();
        mark_loops(body, &mut stack, &mut |tensor, loops| {
            let Some(stage) = ctx.stage(tensor.name()) else {
                return Ok(());
            };
            let depth = loops.len();
            for &level in &stage.unroll {
                let target = loops
                    .get_mut(level)
                    .ok_or_else(|| out_of_range(ConfigErrorKind::InvalidUnroll, tensor, "unroll", level, depth))?;
                trace!("mark level {} unrolled for {}", level, tensor.name());
                target.unrolled = true;
            }
            Ok(())
        })
    }

    fn kind(&self) -> PassKind {
        PassKind::Unroll
    }
}

pub struct GpuBindPass;

impl Pass for GpuBindPass {
    fn run(&self, body: &Expr, ctx: &mut PassContext) -> LowerResult<Expr> {
        let mut stack = Vec::new();
        mark_loops(body, &mut stack, &mut |tensor, loops| {
            let Some(stage) = ctx.stage(tensor.name()) else {
                return Ok(());
            };
            let depth = loops.len();
            for (&level, &axis) in &stage.gpu_binds {
                let target = loops
                    .get_mut(level)
                    .ok_or_else(|| out_of_range(ConfigErrorKind::InvalidGpuBind, tensor, "bind", level, depth))?;
                match target.bind {
                    Some(bound) if bound != axis => {
                        return Err(LowerError::config_for(
                            ConfigErrorKind::InvalidGpuBind,
                            tensor.name(),
                            format!("level {} is already bound to {}", level, bound.name()),
                        ));
                    }
                    _ => {
                        trace!("mark level {} bound to {} for {}", level, axis.name(), tensor.name());
                        target.bind = Some(axis);
                    }
                }
            }
            Ok(())
        })
    }

    fn kind(&self) -> PassKind {
        PassKind::GpuBind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::{GpuAxis, Var};
    use crate::ir::mutate;
    use crate::ir::types::Type;

    /// A three-deep nest storing into `t`.
    fn nest(t: &Tensor) -> Expr {
        let vars: Vec<Var> = (0..3).map(|d| Var::index(format!("c{}", d))).collect();
        let indices = vars.iter().map(Var::to_expr).collect();
        let mut body = Expr::block(vec![Expr::store(t.clone(), Expr::float(1.0), indices).unwrap()]);
        for v in vars.into_iter().rev() {
            let cond = Expr::lt(v.to_expr(), Expr::int(8)).unwrap();
            body = Expr::block(vec![Expr::poly_for(v, Expr::int(0), cond, Expr::int(1), body).unwrap()]);
        }
        body
    }

    fn annotations_by_depth(e: &Expr) -> Vec<LoopAnnotations> {
        let mut out = Vec::new();
        mutate::for_each(e, &mut |n| {
            if let ExprNode::PolyFor(l) = n.node() {
                out.push(l.annotations.clone());
            }
        });
        out
    }

    fn context(t: &Tensor) -> PassContext {
        let mut ctx = PassContext::default();
        ctx.add_tensor(t);
        ctx
    }

    #[test]
    fn test_vectorize_marks_only_its_level() {
        let t = Tensor::placeholder("T", &[8, 8, 8], Type::float(32));
        t.vectorize(1, 4);
        let out = VectorizePass.run(&nest(&t), &mut context(&t)).unwrap();
        let marks = annotations_by_depth(&out);
        assert_eq!(marks.len(), 3);
        assert!(marks[0].vectorize.is_none());
        assert_eq!(marks[1].vectorize.map(|v| v.factor), Some(4));
        assert!(marks[2].vectorize.is_none());
    }

    #[test]
    fn test_vectorize_level_out_of_range() {
        let t = Tensor::placeholder("T", &[8, 8, 8], Type::float(32));
        t.vectorize(5, 4);
        let err = VectorizePass.run(&nest(&t), &mut context(&t)).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidVectorize));
        assert!(err.to_string().contains("level 5"));
    }

    #[test]
    fn test_vectorize_zero_factor() {
        let t = Tensor::placeholder("T", &[8, 8, 8], Type::float(32));
        t.vectorize(0, 0);
        let err = VectorizePass.run(&nest(&t), &mut context(&t)).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidVectorize));
    }

    #[test]
    fn test_unroll_levels() {
        let t = Tensor::placeholder("T", &[8, 8, 8], Type::float(32));
        t.unroll(0);
        t.unroll(2);
        let out = UnrollPass.run(&nest(&t), &mut context(&t)).unwrap();
        let marks: Vec<bool> = annotations_by_depth(&out).iter().map(|a| a.unrolled).collect();
        assert_eq!(marks, vec![true, false, true]);

        t.unroll(3);
        let err = UnrollPass.run(&nest(&t), &mut context(&t)).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidUnroll));
    }

    #[test]
    fn test_stores_of_other_tensors_untouched() {
        let t = Tensor::placeholder("T", &[8, 8, 8], Type::float(32));
        let u = Tensor::placeholder("U", &[8, 8, 8], Type::float(32));
        u.vectorize(2, 8);
        let body = nest(&t);
        let out = VectorizePass.run(&body, &mut context(&u)).unwrap();
        assert!(out.same_as(&body));
    }

    #[test]
    fn test_gpu_bind_marks() {
        let t = Tensor::placeholder("T", &[8, 8, 8], Type::float(32));
        t.bind(0, GpuAxis::BlockX);
        t.bind(1, GpuAxis::ThreadX);
        let out = GpuBindPass.run(&nest(&t), &mut context(&t)).unwrap();
        let binds: Vec<Option<GpuAxis>> = annotations_by_depth(&out).iter().map(|a| a.bind).collect();
        assert_eq!(binds, vec![Some(GpuAxis::BlockX), Some(GpuAxis::ThreadX), None]);
    }
}
