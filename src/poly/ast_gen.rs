//! Loop-nest generation for schedule groups.
//!
//! Produces one abstract loop nest per group. Loops are `PolyFor` nodes
//! over generated iterators; every statement instance is an opaque call of
//! kind [`CallType::Isl`] named after its stage tuple, whose arguments are
//! the iterators bound to the stage's domain dimensions.

use crate::ir::expr::{CallType, Expr, Var};
use crate::ir::simplify::simplify;
use crate::ir::types::Type;
use crate::poly::schedule::{iterator_name, AccessWindow, Attach, ScheduleGroup, StageDecl};
use crate::utils::errors::{InternalErrorKind, LowerError, LowerResult};
use std::collections::HashMap;

/// Builds the loop nest of one schedule group.
pub struct AstBuilder<'s> {
    group: &'s ScheduleGroup,
    /// Attached stages per host, in topological order
    guests: HashMap<&'s str, Vec<&'s StageDecl>>,
}

impl<'s> AstBuilder<'s> {
    pub fn new(group: &'s ScheduleGroup) -> Self {
        let mut guests: HashMap<&'s str, Vec<&'s StageDecl>> = HashMap::new();
        for stage in &group.stages {
            if let Some(host) = stage.host() {
                guests.entry(host).or_default().push(stage);
            }
        }
        Self { group, guests }
    }

    /// Build the group's loop nest as a block.
    pub fn build(&self) -> LowerResult<Expr> {
        let root = self.group.stage(&self.group.root).ok_or_else(|| {
            LowerError::internal(
                InternalErrorKind::MissingStage,
                format!("schedule group {} has no root stage", self.group.id),
            )
        })?;
        Ok(Expr::block(self.build_stage(root)?))
    }

    fn build_stage(&self, stage: &StageDecl) -> LowerResult<Vec<Expr>> {
        match &stage.attach {
            // Init stages share the host's output loops.
            Attach::Init { .. } => Ok(vec![self.statement(stage, stage.base_depth)]),
            _ => self.build_level(stage, 0),
        }
    }

    /// Statements placed after the first `dim` loops of `stage`.
    fn build_level(&self, stage: &StageDecl, dim: usize) -> LowerResult<Vec<Expr>> {
        let mut stmts = Vec::new();
        for guest in self.guests.get(stage.tuple()).into_iter().flatten() {
            if guest.position_in_host(stage) == dim {
                stmts.extend(self.build_stage(guest)?);
            }
        }

        if dim == stage.domain.n_dim() {
            stmts.push(self.statement(stage, stage.base_depth));
            return Ok(stmts);
        }

        let depth = stage.base_depth + dim;
        let iterator = Var::index(iterator_name(depth));
        let extent = stage.domain.dims[dim].extent;
        let (init, bound) = self.bounds(stage, dim, extent)?;
        let condition = Expr::lt(iterator.to_expr(), bound)?;
        let body = Expr::block(self.build_level(stage, dim + 1)?);
        stmts.push(Expr::poly_for(iterator, init, condition, Expr::int(1), body)?);
        Ok(stmts)
    }

    /// `(init, exclusive upper bound)` of loop `dim` of `stage`.
    fn bounds(&self, stage: &StageDecl, dim: usize, extent: i64) -> LowerResult<(Expr, Expr)> {
        let window = match &stage.attach {
            Attach::ComputeAt(info) => info.windows.get(dim).copied().unwrap_or(AccessWindow::Full),
            _ => AccessWindow::Full,
        };
        match (window, &stage.attach) {
            (AccessWindow::Relative { level, lo, hi }, Attach::ComputeAt(info)) => {
                let outer = Var::index(info.consumer_iterator(level)).to_expr();
                let init = Expr::max(Expr::add(outer.clone(), Expr::int(lo))?, Expr::int(0))?;
                let bound = Expr::min(Expr::add(outer, Expr::int(hi + 1))?, Expr::int(extent))?;
                Ok((simplify(&init), simplify(&bound)))
            }
            _ => Ok((Expr::int(0), Expr::int(extent))),
        }
    }

    /// Statement instance of `stage` with its dimensions bound to the
    /// iterators starting at `base`.
    fn statement(&self, stage: &StageDecl, base: usize) -> Expr {
        let args = (0..stage.domain.n_dim())
            .map(|d| Var::index(iterator_name(base + d)).to_expr())
            .collect();
        Expr::call(stage.tuple(), Type::void(), args, CallType::Isl)
    }
}

/// Loop nest of one schedule group.
pub fn build_group_ast(group: &ScheduleGroup) -> LowerResult<Expr> {
    AstBuilder::new(group).build()
}
