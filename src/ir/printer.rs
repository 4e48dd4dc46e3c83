//! Textual form of expressions and lowered functions.
//!
//! Value expressions print on one line; statements (stores, loops,
//! conditionals, blocks) print as an indented document.

use crate::ir::expr::{Expr, ExprNode, ForType, LoopAnnotations, UnaryOp};
use crate::ir::function::LoweredFunc;
use crate::ir::tensor::Tensor;
use crate::utils::pretty::{braced, format_list, PrettyPrint, DEFAULT_WIDTH};
use pretty::{BoxAllocator, DocAllocator, DocBuilder};
use std::fmt;

fn buffer_or_name(tensor: &Tensor) -> &str {
    tensor.buffer_name().unwrap_or_else(|| tensor.name())
}

fn is_statement(expr: &Expr) -> bool {
    matches!(
        expr.node(),
        ExprNode::Store { .. }
            | ExprNode::For(_)
            | ExprNode::PolyFor(_)
            | ExprNode::IfThenElse { .. }
            | ExprNode::Block(_)
    )
}

fn fmt_value(expr: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match expr.node() {
        ExprNode::IntImm { value, .. } => write!(f, "{}", value),
        ExprNode::UIntImm { ty, value } if ty.is_bool() => {
            write!(f, "{}", if *value != 0 { "true" } else { "false" })
        }
        ExprNode::UIntImm { value, .. } => write!(f, "{}", value),
        ExprNode::FloatImm { value, .. } => write!(f, "{:?}", value),
        ExprNode::Var(v) => write!(f, "{}", v.name),
        ExprNode::Binary { op, a, b, .. } if op.is_function_like() => {
            write!(f, "{}({}, {})", op.symbol(), a, b)
        }
        ExprNode::Binary { op, a, b, .. } => write!(f, "({} {} {})", a, op.symbol(), b),
        ExprNode::Unary { op: UnaryOp::Not, v, .. } => write!(f, "!{}", v),
        ExprNode::Unary { op: UnaryOp::Minus, v, .. } => write!(f, "-{}", v),
        ExprNode::Cast { ty, v } => write!(f, "{}({})", ty, v),
        ExprNode::Load { tensor, indices } => {
            write!(f, "{}[{}]", buffer_or_name(tensor), format_list(indices, ", "))
        }
        ExprNode::BufferRef(tensor) => write!(f, "{}", buffer_or_name(tensor)),
        ExprNode::Call { name, args, .. } => write!(f, "{}({})", name, format_list(args, ", ")),
        _ => write!(f, "{}", expr.pretty()),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_statement(self) {
            write!(f, "{}", self.pretty())
        } else {
            fmt_value(self, f)
        }
    }
}

fn loop_prefix(for_type: Option<ForType>, annotations: &LoopAnnotations) -> String {
    let mut prefix = String::new();
    match (for_type, annotations.vectorize) {
        (Some(ForType::Vectorized), Some(v)) | (None, Some(v)) => {
            prefix.push_str(&format!("vectorize[{}] ", v.factor))
        }
        _ => {}
    }
    if matches!(for_type, Some(ForType::Unrolled)) || (for_type.is_none() && annotations.unrolled) {
        prefix.push_str("unroll ");
    }
    if let Some(axis) = annotations.bind {
        prefix.push_str(&format!("bind[{}] ", axis.name()));
    }
    prefix
}

/// A body printed as a braced block.
fn body_doc<'a>(body: &Expr, allocator: &'a BoxAllocator) -> DocBuilder<'a, BoxAllocator> {
    match body.node() {
        ExprNode::Block(stmts) if stmts.is_empty() => {
            allocator.text("{").append(allocator.hardline()).append(allocator.text("}"))
        }
        ExprNode::Block(stmts) => braced(allocator, stmts_doc(stmts, allocator)),
        _ => braced(allocator, body.to_doc(allocator)),
    }
}

fn stmts_doc<'a>(stmts: &[Expr], allocator: &'a BoxAllocator) -> DocBuilder<'a, BoxAllocator> {
    allocator.intersperse(stmts.iter().map(|s| s.to_doc(allocator)), allocator.hardline())
}

impl PrettyPrint for Expr {
    fn to_doc<'a>(&self, allocator: &'a BoxAllocator) -> DocBuilder<'a, BoxAllocator> {
        match self.node() {
            ExprNode::Store { tensor, value, indices } => allocator.text(format!(
                "{}[{}] = {}",
                buffer_or_name(tensor),
                format_list(indices, ", "),
                value
            )),
            ExprNode::For(l) => allocator
                .text(format!(
                    "{}for ({}, {}, {})",
                    loop_prefix(Some(l.for_type), &l.annotations),
                    l.var,
                    l.min,
                    l.extent
                ))
                .append(allocator.hardline())
                .append(body_doc(&l.body, allocator)),
            ExprNode::PolyFor(l) => allocator
                .text(format!(
                    "{}poly_for ({}, {}, {}, {})",
                    loop_prefix(None, &l.annotations),
                    l.iterator,
                    l.init,
                    l.condition,
                    l.inc
                ))
                .append(allocator.hardline())
                .append(body_doc(&l.body, allocator)),
            ExprNode::IfThenElse { condition, then_case, else_case } => {
                let doc = allocator
                    .text(format!("if ({})", condition))
                    .append(allocator.hardline())
                    .append(body_doc(then_case, allocator));
                match else_case {
                    Some(e) => doc
                        .append(allocator.hardline())
                        .append(allocator.text("else"))
                        .append(allocator.hardline())
                        .append(body_doc(e, allocator)),
                    None => doc,
                }
            }
            ExprNode::Block(_) => body_doc(self, allocator),
            _ => allocator.text(self.to_string()),
        }
    }
}

impl fmt::Display for LoweredFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let allocator = BoxAllocator;
        let header = allocator.text(format!("function {} ({})", self.name, format_list(&self.args, ", ")));
        let doc = header.append(allocator.hardline()).append(body_doc(&self.body, &allocator));
        doc.render_fmt(DEFAULT_WIDTH, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Var;
    use crate::ir::types::Type;

    #[test]
    fn test_value_printing() {
        let i = Var::index("i").to_expr();
        let e = Expr::min(Expr::add(i.clone(), Expr::int(1)).unwrap(), Expr::int(9)).unwrap();
        assert_eq!(e.to_string(), "min((i + 1), 9)");
        assert_eq!(Expr::float(1.0).to_string(), "1.0");
        assert_eq!(Expr::bool_(true).to_string(), "true");
    }

    #[test]
    fn test_loop_printing() {
        let a = Tensor::placeholder("A", &[4], Type::float(32));
        let i = Var::index("i");
        let store = Expr::store(a, Expr::float(0.0), vec![i.to_expr()]).unwrap();
        let l = Expr::for_loop(i, Expr::int(0), Expr::int(4), Expr::block(vec![store])).unwrap();
        assert_eq!(l.to_string(), "for (i, 0, 4)\n{\n  A[i] = 0.0\n}");
    }
}
