//! Lowering of one schedule group.
//!
//! The group's loop nest comes back from generation with an opaque call per
//! statement instance. Each call is replaced by the statement registered for
//! its tuple, with the stage's own iteration variables substituted by the
//! call arguments.

use crate::ir::expr::{CallType, Expr, ExprNode};
use crate::ir::mutate::{self, map_children};
use crate::ir::simplify::simplify;
use crate::ir::tensor::Tensor;
use crate::poly::ast_gen::build_group_ast;
use crate::poly::schedule::ScheduleGroup;
use crate::utils::errors::{InternalErrorKind, LowerError, LowerResult};
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Lower `group` to a concrete loop nest.
///
/// `tuple_to_expr` maps each stage tuple to its statement written over the
/// stage's iteration variables. Tensors encountered in the resolved nest
/// are added to `tensor_map` when not yet known.
pub fn lower_group(
    group: &ScheduleGroup,
    tuple_to_expr: &HashMap<String, Expr>,
    tensor_map: &mut BTreeMap<String, Tensor>,
) -> LowerResult<Expr> {
    debug!("lowering schedule group {} [{}]", group.id, group.tuples().join(", "));
    let ast = build_group_ast(group)?;
    let resolved = resolve_placeholders(&ast, group, tuple_to_expr)?;
    check_no_placeholder_remains(&resolved)?;

    for tensor in mutate::written_tensors(&resolved)
        .into_iter()
        .chain(mutate::accessed_tensors(&resolved))
    {
        if !tensor_map.contains_key(tensor.name()) {
            trace!("group {} materializes tensor {}", group.id, tensor.name());
            tensor_map.insert(tensor.name().to_string(), tensor);
        }
    }
    Ok(resolved)
}

fn resolve_placeholders(
    expr: &Expr,
    group: &ScheduleGroup,
    tuple_to_expr: &HashMap<String, Expr>,
) -> LowerResult<Expr> {
    if let ExprNode::Call { name, args, call_type: CallType::Isl, .. } = expr.node() {
        let (Some(stmt), Some(stage)) = (tuple_to_expr.get(name), group.stage(name)) else {
            // left in place; reported by the placeholder check
            return Ok(expr.clone());
        };
        if args.len() != stage.domain.n_dim() {
            return Err(LowerError::internal(
                InternalErrorKind::UnresolvedPlaceholder,
                format!(
                    "statement {} called with {} iterators but its domain has {} dimensions",
                    name,
                    args.len(),
                    stage.domain.n_dim()
                ),
            ));
        }
        let bindings: HashMap<String, Expr> = stage
            .domain
            .dims
            .iter()
            .zip(args)
            .map(|(dim, arg)| (dim.iterator.clone(), arg.clone()))
            .collect();
        return Ok(simplify(&mutate::substitute(stmt, &bindings)));
    }
    map_children(expr, |c| resolve_placeholders(c, group, tuple_to_expr))
}

/// Fail if any scheduler statement call is left in `expr`.
pub fn check_no_placeholder_remains(expr: &Expr) -> LowerResult<()> {
    let mut remaining = BTreeSet::new();
    mutate::for_each(expr, &mut |e| {
        if let ExprNode::Call { name, call_type: CallType::Isl, .. } = e.node() {
            remaining.insert(name.clone());
        }
    });
    if remaining.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = remaining.into_iter().collect();
    Err(LowerError::internal(
        InternalErrorKind::UnresolvedPlaceholder,
        format!("no statement registered for scheduled tuple(s) {}", names.join(", ")),
    ))
}
