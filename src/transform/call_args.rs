//! Call-argument folding.
//!
//! A runtime routine produces its result through an output buffer rather
//! than a return value, so `T[...] = routine(args)` is rewritten into the
//! call `routine(args, T)` with `T` appended as an output operand.

use crate::ir::expr::{CallType, Expr, ExprNode};
use crate::ir::mutate::map_children;
use crate::transform::{Pass, PassContext, PassKind};
use crate::utils::errors::LowerResult;
use log::trace;

pub struct FoldCallArgsPass;

impl Pass for FoldCallArgsPass {
    fn run(&self, body: &Expr, _ctx: &mut PassContext) -> LowerResult<Expr> {
        fold_call_args(body)
    }

    fn kind(&self) -> PassKind {
        PassKind::FoldCallArgs
    }
}

pub fn fold_call_args(expr: &Expr) -> LowerResult<Expr> {
    if let ExprNode::Store { tensor, value, .. } = expr.node() {
        if let ExprNode::Call { name, ty, args, call_type: CallType::Runtime { outputs } } = value.node() {
            trace!("folding store into {} as an output of {}", tensor.name(), name);
            let mut args = args.clone();
            args.push(Expr::buffer_ref(tensor));
            return Ok(Expr::call(name.clone(), *ty, args, CallType::Runtime { outputs: outputs + 1 }));
        }
        return Ok(expr.clone());
    }
    map_children(expr, fold_call_args)
}
