//! Structural traversal and rewriting of expression trees.
//!
//! Passes are written as plain recursive functions: they `match` on the
//! nodes they care about and hand every other node to [`map_children`],
//! which rebuilds the node only if one of its children changed.

use crate::ir::expr::{CallType, Expr, ExprNode, For, PolyFor};
use crate::ir::tensor::Tensor;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;

/// Direct sub-expressions of `expr`, in evaluation order.
pub fn children(expr: &Expr) -> Vec<&Expr> {
    match expr.node() {
        ExprNode::IntImm { .. }
        | ExprNode::UIntImm { .. }
        | ExprNode::FloatImm { .. }
        | ExprNode::Var(_)
        | ExprNode::BufferRef(_) => vec![],
        ExprNode::Binary { a, b, .. } => vec![a, b],
        ExprNode::Unary { v, .. } | ExprNode::Cast { v, .. } => vec![v],
        ExprNode::Load { indices, .. } => indices.iter().collect(),
        ExprNode::Store { value, indices, .. } => {
            let mut out: Vec<&Expr> = vec![value];
            out.extend(indices.iter());
            out
        }
        ExprNode::Call { args, .. } => args.iter().collect(),
        ExprNode::For(l) => vec![&l.min, &l.extent, &l.body],
        ExprNode::PolyFor(l) => vec![&l.init, &l.condition, &l.inc, &l.body],
        ExprNode::IfThenElse { condition, then_case, else_case } => {
            let mut out = vec![condition, then_case];
            out.extend(else_case.iter());
            out
        }
        ExprNode::Block(stmts) => stmts.iter().collect(),
    }
}

/// Rebuild `expr` with every child replaced by `f(child)`.
///
/// Returns the original handle when no child changed.
pub fn map_children<E, F>(expr: &Expr, mut f: F) -> Result<Expr, E>
where
    F: FnMut(&Expr) -> Result<Expr, E>,
{
    let mut changed = false;
    let node = {
        let mut visit = |e: &Expr| -> Result<Expr, E> {
            let out = f(e)?;
            if !out.same_as(e) {
                changed = true;
            }
            Ok(out)
        };

        match expr.node() {
            ExprNode::IntImm { .. }
            | ExprNode::UIntImm { .. }
            | ExprNode::FloatImm { .. }
            | ExprNode::Var(_)
            | ExprNode::BufferRef(_) => return Ok(expr.clone()),
            ExprNode::Binary { op, ty, a, b } => ExprNode::Binary {
                op: *op,
                ty: *ty,
                a: visit(a)?,
                b: visit(b)?,
            },
            ExprNode::Unary { op, ty, v } => ExprNode::Unary { op: *op, ty: *ty, v: visit(v)? },
            ExprNode::Cast { ty, v } => ExprNode::Cast { ty: *ty, v: visit(v)? },
            ExprNode::Load { tensor, indices } => ExprNode::Load {
                tensor: tensor.clone(),
                indices: indices.iter().map(|i| visit(i)).collect::<Result<_, E>>()?,
            },
            ExprNode::Store { tensor, value, indices } => ExprNode::Store {
                tensor: tensor.clone(),
                value: visit(value)?,
                indices: indices.iter().map(|i| visit(i)).collect::<Result<_, E>>()?,
            },
            ExprNode::Call { name, ty, args, call_type } => ExprNode::Call {
                name: name.clone(),
                ty: *ty,
                args: args.iter().map(|a| visit(a)).collect::<Result<_, E>>()?,
                call_type: *call_type,
            },
            ExprNode::For(l) => ExprNode::For(For {
                var: l.var.clone(),
                min: visit(&l.min)?,
                extent: visit(&l.extent)?,
                for_type: l.for_type,
                annotations: l.annotations.clone(),
                body: visit(&l.body)?,
            }),
            ExprNode::PolyFor(l) => ExprNode::PolyFor(PolyFor {
                iterator: l.iterator.clone(),
                init: visit(&l.init)?,
                condition: visit(&l.condition)?,
                inc: visit(&l.inc)?,
                annotations: l.annotations.clone(),
                body: visit(&l.body)?,
            }),
            ExprNode::IfThenElse { condition, then_case, else_case } => ExprNode::IfThenElse {
                condition: visit(condition)?,
                then_case: visit(then_case)?,
                else_case: else_case.as_ref().map(|e| visit(e)).transpose()?,
            },
            ExprNode::Block(stmts) => {
                ExprNode::Block(stmts.iter().map(|s| visit(s)).collect::<Result<_, E>>()?)
            }
        }
    };

    if changed {
        Ok(Expr::from_node(node))
    } else {
        Ok(expr.clone())
    }
}

/// Replace free variables by name.
pub fn substitute(expr: &Expr, map: &HashMap<String, Expr>) -> Expr {
    if map.is_empty() {
        return expr.clone();
    }
    if let ExprNode::Var(v) = expr.node() {
        return map.get(&v.name).cloned().unwrap_or_else(|| expr.clone());
    }
    match map_children(expr, |c| Ok::<_, Infallible>(substitute(c, map))) {
        Ok(e) => e,
        Err(never) => match never {},
    }
}

/// Visit every node in pre-order.
pub fn for_each(expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    f(expr);
    for child in children(expr) {
        for_each(child, f);
    }
}

/// Number of nodes satisfying `pred`.
pub fn count(expr: &Expr, pred: impl Fn(&Expr) -> bool) -> usize {
    let mut n = 0;
    for_each(expr, &mut |e| {
        if pred(e) {
            n += 1;
        }
    });
    n
}

fn push_unique(out: &mut Vec<Tensor>, seen: &mut HashSet<String>, tensor: &Tensor) {
    if seen.insert(tensor.name().to_string()) {
        out.push(tensor.clone());
    }
}

/// Tensors loaded or passed whole to a call, deduplicated by name in first-use order.
pub fn accessed_tensors(expr: &Expr) -> Vec<Tensor> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for_each(expr, &mut |e| match e.node() {
        ExprNode::Load { tensor, .. } | ExprNode::BufferRef(tensor) => {
            push_unique(&mut out, &mut seen, tensor)
        }
        _ => {}
    });
    out
}

/// Tensors written by stores or by runtime calls through their output operands.
pub fn written_tensors(expr: &Expr) -> Vec<Tensor> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for_each(expr, &mut |e| match e.node() {
        ExprNode::Store { tensor, .. } => push_unique(&mut out, &mut seen, tensor),
        ExprNode::Call { args, call_type: CallType::Runtime { outputs }, .. } => {
            let first_output = args.len().saturating_sub(*outputs);
            for arg in &args[first_output..] {
                if let ExprNode::BufferRef(tensor) = arg.node() {
                    push_unique(&mut out, &mut seen, tensor);
                }
            }
        }
        _ => {}
    });
    out
}
