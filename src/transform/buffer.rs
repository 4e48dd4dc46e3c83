//! Buffer assignment.
//!
//! Tensors are grouped into classes by their share-buffer directives; each
//! class is backed by one buffer named after the tensor at the end of the
//! sharing chain (`_<name>`). Every access in the body is rebound to its
//! class buffer.

use crate::ir::expr::{Expr, ExprNode};
use crate::ir::mutate::{self, map_children};
use crate::ir::tensor::Tensor;
use crate::transform::{Pass, PassContext, PassKind};
use crate::utils::errors::{ConfigErrorKind, LowerError, LowerResult};
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};

pub struct BufferAssignPass;

impl Pass for BufferAssignPass {
    fn run(&self, body: &Expr, ctx: &mut PassContext) -> LowerResult<Expr> {
        let mut tensors: BTreeMap<String, Tensor> = ctx.tensors.clone();
        for t in mutate::written_tensors(body).into_iter().chain(mutate::accessed_tensors(body)) {
            tensors.entry(t.name().to_string()).or_insert(t);
        }
        let buffers = assign_buffers(&tensors, ctx)?;
        let mut rebound = HashMap::new();
        rebind(body, &buffers, &mut rebound)
    }

    fn kind(&self) -> PassKind {
        PassKind::BufferAssign
    }
}

pub fn buffer_name_for(root: &str) -> String {
    format!("_{}", root)
}

/// Buffer name for every tensor in `tensors`.
pub fn assign_buffers(
    tensors: &BTreeMap<String, Tensor>,
    ctx: &PassContext,
) -> LowerResult<BTreeMap<String, String>> {
    let share_target = |name: &str| -> Option<String> {
        ctx.stage(name)
            .map(|s| s.share_buffer_with.clone())
            .unwrap_or_else(|| tensors.get(name).and_then(|t| t.stage().share_buffer_with))
    };

    let mut buffers = BTreeMap::new();
    for (name, tensor) in tensors {
        let mut root = name.clone();
        let mut visited = HashSet::from([root.clone()]);
        while let Some(target) = share_target(&root) {
            let fail = |msg: String| LowerError::config_for(ConfigErrorKind::InvalidShareBuffer, name, msg);
            let Some(other) = tensors.get(&target) else {
                return Err(fail(format!("shares the buffer of unknown tensor {}", target)));
            };
            if other.dtype() != tensor.dtype() {
                return Err(fail(format!(
                    "cannot share the {} buffer of {} as {}",
                    other.dtype(),
                    target,
                    tensor.dtype()
                )));
            }
            if !visited.insert(target.clone()) {
                return Err(fail(format!("buffer sharing loops back to {}", target)));
            }
            root = target;
        }
        debug!("tensor {} uses buffer {}", name, buffer_name_for(&root));
        buffers.insert(name.clone(), buffer_name_for(&root));
    }
    Ok(buffers)
}

fn rebind(
    expr: &Expr,
    buffers: &BTreeMap<String, String>,
    rebound: &mut HashMap<(String, Vec<i64>), Tensor>,
) -> LowerResult<Expr> {
    let mut handle = |tensor: &Tensor| -> Option<Tensor> {
        let buffer = buffers.get(tensor.name())?;
        if tensor.buffer_name() == Some(buffer.as_str()) {
            return None;
        }
        let key = (tensor.name().to_string(), tensor.shape().to_vec());
        Some(rebound.entry(key).or_insert_with(|| tensor.with_buffer(buffer.clone())).clone())
    };

    match expr.node() {
        ExprNode::BufferRef(tensor) => Ok(handle(tensor).map(|t| Expr::buffer_ref(&t)).unwrap_or_else(|| expr.clone())),
        ExprNode::Load { tensor, indices } => {
            let Some(t) = handle(tensor) else {
                return map_children(expr, |c| rebind(c, buffers, rebound));
            };
            let indices = indices.iter().map(|i| rebind(i, buffers, rebound)).collect::<LowerResult<_>>()?;
            Expr::load(t, indices)
        }
        ExprNode::Store { tensor, value, indices } => {
            let Some(t) = handle(tensor) else {
                return map_children(expr, |c| rebind(c, buffers, rebound));
            };
            let value = rebind(value, buffers, rebound)?;
            let indices = indices.iter().map(|i| rebind(i, buffers, rebound)).collect::<LowerResult<_>>()?;
            Expr::store(t, value, indices)
        }
        _ => map_children(expr, |c| rebind(c, buffers, rebound)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Var;
    use crate::ir::types::Type;

    fn ctx_with(tensors: &[&Tensor]) -> PassContext {
        let mut ctx = PassContext::default();
        for t in tensors {
            ctx.add_tensor(t);
        }
        ctx
    }

    #[test]
    fn test_default_buffers() {
        let a = Tensor::placeholder("A", &[4], Type::float(32));
        let b = Tensor::compute("B", &[4], |ax| a.at(ax.to_vec())).unwrap();
        let stmt = b.stage_statement().unwrap().unwrap();
        let out = BufferAssignPass.run(&stmt, &mut ctx_with(&[&a, &b])).unwrap();
        assert_eq!(out.to_string(), "_B[i] = _A[i]");
    }

    #[test]
    fn test_shared_chain() {
        let a = Tensor::placeholder("A", &[4], Type::float(32));
        let b = Tensor::compute("B", &[4], |ax| a.at(ax.to_vec())).unwrap();
        let c = Tensor::compute("C", &[4], |ax| b.at(ax.to_vec())).unwrap();
        c.share_buffer_with(&b);
        b.share_buffer_with(&a);
        let ctx = ctx_with(&[&a, &b, &c]);
        let buffers = assign_buffers(&ctx.tensors, &ctx).unwrap();
        assert_eq!(buffers["A"], "_A");
        assert_eq!(buffers["B"], "_A");
        assert_eq!(buffers["C"], "_A");
    }

    #[test]
    fn test_share_with_unknown_tensor() {
        let a = Tensor::placeholder("A", &[4], Type::float(32));
        let ghost = Tensor::placeholder("Ghost", &[4], Type::float(32));
        a.share_buffer_with(&ghost);
        let ctx = ctx_with(&[&a]);
        let err = assign_buffers(&ctx.tensors, &ctx).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidShareBuffer));
    }

    #[test]
    fn test_share_dtype_mismatch() {
        let a = Tensor::placeholder("A", &[4], Type::float(32));
        let b = Tensor::placeholder("B", &[4], Type::int(32));
        b.share_buffer_with(&a);
        let ctx = ctx_with(&[&a, &b]);
        let err = assign_buffers(&ctx.tensors, &ctx).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidShareBuffer));
    }

    #[test]
    fn test_runtime_operand_rebound() {
        let a = Tensor::placeholder("A", &[4], Type::float(32));
        let call = Expr::runtime_call("memset", vec![Expr::buffer_ref(&a), Var::index("n").to_expr()]);
        let out = BufferAssignPass.run(&call, &mut ctx_with(&[&a])).unwrap();
        assert_eq!(out.to_string(), "memset(_A, n)");
    }
}
