//! Ordered composition of passes.

use crate::ir::expr::Expr;
use crate::transform::{Pass, PassContext, PassKind};
use crate::utils::errors::LowerResult;
use log::debug;

/// Result of running a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub body: Expr,
    /// Passes that changed the body, in run order
    pub applied_passes: Vec<String>,
}

impl PipelineResult {
    pub fn modified(&self) -> bool {
        !self.applied_passes.is_empty()
    }
}

/// A sequence of passes applied one after the other.
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(&PassKind::default_order())
    }
}

impl Pipeline {
    pub fn new(kinds: &[PassKind]) -> Self {
        Self { passes: kinds.iter().map(PassKind::create).collect() }
    }

    /// Append a pass to the end of the pipeline.
    pub fn with_pass(mut self, pass: Box<dyn Pass>) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn run(&self, body: &Expr, ctx: &mut PassContext) -> LowerResult<PipelineResult> {
        let mut result = PipelineResult { body: body.clone(), applied_passes: Vec::new() };
        for pass in &self.passes {
            let out = pass.run(&result.body, ctx)?;
            if out.same_as(&result.body) {
                debug!("pass {}: no change", pass.name());
            } else {
                debug!("pass {}: body rewritten", pass.name());
                result.applied_passes.push(pass.name().to_string());
                result.body = out;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::{Var, ExprNode};
    use crate::ir::tensor::Tensor;
    use crate::ir::types::Type;

    fn nested_blocks() -> Expr {
        let a = Tensor::placeholder("A", &[4], Type::float(32));
        let i = Var::index("i");
        let store = Expr::store(a, Expr::float(0.0), vec![i.to_expr()]).unwrap();
        let cond = Expr::lt(i.to_expr(), Expr::int(4)).unwrap();
        let body = Expr::block(vec![Expr::block(vec![store])]);
        let lp = Expr::poly_for(i, Expr::int(0), cond, Expr::int(1), body).unwrap();
        Expr::block(vec![Expr::block(vec![lp]), Expr::block(vec![])])
    }

    #[test]
    fn test_custom_order() {
        let pipeline = Pipeline::new(&[PassKind::FlattenBlocks, PassKind::PolyForToFor]);
        assert_eq!(pipeline.names(), vec!["flatten-blocks", "polyfor-to-for"]);

        let mut ctx = PassContext::default();
        let result = pipeline.run(&nested_blocks(), &mut ctx).unwrap();
        assert_eq!(result.applied_passes, vec!["flatten-blocks", "polyfor-to-for"]);
        assert_eq!(result.body.to_string(), "{\n  for (i, 0, 4)\n  {\n    A[i] = 0.0\n  }\n}");
    }

    #[test]
    fn test_unchanged_body_not_recorded() {
        let pipeline = Pipeline::new(&[PassKind::FlattenBlocks]);
        let flat = Expr::block(vec![]);
        let result = pipeline.run(&flat, &mut PassContext::default()).unwrap();
        assert!(!result.modified());
        assert!(matches!(result.body.node(), ExprNode::Block(s) if s.is_empty()));
    }

    #[test]
    fn test_default_pipeline() {
        assert_eq!(Pipeline::default().len(), PassKind::default_order().len());
        assert!(Pipeline::new(&[]).is_empty());
    }
}
