//! Post-generation passes over the lowered loop nest.
//!
//! Each pass is a rewrite `Expr -> Expr` that may read (and record into) a
//! shared [`PassContext`]. Passes are order dependent; [`Pipeline`] runs
//! them in the order given by [`PassKind::default_order`] unless a custom
//! sequence is requested.

pub mod annotate;
pub mod buffer;
pub mod call_args;
pub mod compute_at;
pub mod flatten;
pub mod inline;
pub mod loop_form;
pub mod pipeline;
pub mod target_loops;

pub use annotate::{GpuBindPass, UnrollPass, VectorizePass};
pub use buffer::BufferAssignPass;
pub use call_args::FoldCallArgsPass;
pub use compute_at::ComputeAtPass;
pub use flatten::FlattenBlocksPass;
pub use inline::InlinePass;
pub use loop_form::PolyForToForPass;
pub use pipeline::{Pipeline, PipelineResult};
pub use target_loops::TargetLoopsPass;

use crate::ir::expr::Expr;
use crate::ir::tensor::{Stage, Tensor};
use crate::poly::schedule::ComputeAtInfo;
use crate::utils::errors::LowerResult;
use std::collections::BTreeMap;
use std::fmt;

/// Device class the lowered function runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Plain loops on the host CPU
    #[default]
    Host,
    /// Kernel launched over a grid of thread blocks
    Gpu,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Host => write!(f, "host"),
            Target::Gpu => write!(f, "gpu"),
        }
    }
}

/// State shared by the passes of one lowering invocation.
#[derive(Debug, Clone, Default)]
pub struct PassContext {
    pub target: Target,
    /// Stage directives of every tensor known to the function, by name
    pub stages: BTreeMap<String, Stage>,
    /// Tensors known to the function, by name
    pub tensors: BTreeMap<String, Tensor>,
    pub compute_ats: Vec<ComputeAtInfo>,
    /// Launch extents recorded while lowering bound loops, `None` where no
    /// loop is bound to that dimension
    pub gpu_grid_dims: Vec<Option<i64>>,
    pub gpu_block_dims: Vec<Option<i64>>,
}

impl PassContext {
    pub fn new(target: Target) -> Self {
        Self { target, ..Default::default() }
    }

    /// Register a tensor and a snapshot of its stage.
    pub fn add_tensor(&mut self, tensor: &Tensor) {
        self.stages.insert(tensor.name().to_string(), tensor.stage());
        self.tensors.insert(tensor.name().to_string(), tensor.clone());
    }

    pub fn with_compute_ats(mut self, infos: Vec<ComputeAtInfo>) -> Self {
        self.compute_ats = infos;
        self
    }

    pub fn stage(&self, tensor: &str) -> Option<&Stage> {
        self.stages.get(tensor)
    }

    /// Grid extents per dimension; unbound dimensions launch once.
    pub fn grid_dims(&self) -> Vec<i64> {
        launch_extents(&self.gpu_grid_dims)
    }

    /// Block extents per dimension; unbound dimensions launch once.
    pub fn block_dims(&self) -> Vec<i64> {
        launch_extents(&self.gpu_block_dims)
    }
}

fn launch_extents(dims: &[Option<i64>]) -> Vec<i64> {
    dims.iter().map(|d| d.unwrap_or(1)).collect()
}

/// One post-generation pass.
pub trait Pass {
    /// Rewrite `body`.
    fn run(&self, body: &Expr, ctx: &mut PassContext) -> LowerResult<Expr>;

    fn kind(&self) -> PassKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// The available passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    ComputeAt,
    Vectorize,
    Unroll,
    GpuBind,
    Inline,
    BufferAssign,
    FoldCallArgs,
    FlattenBlocks,
    PolyForToFor,
    TargetLoops,
}

impl PassKind {
    /// The fixed pipeline order.
    pub fn default_order() -> Vec<PassKind> {
        vec![
            PassKind::ComputeAt,
            PassKind::Vectorize,
            PassKind::Unroll,
            PassKind::GpuBind,
            PassKind::Inline,
            PassKind::BufferAssign,
            PassKind::FoldCallArgs,
            PassKind::FlattenBlocks,
            PassKind::PolyForToFor,
            PassKind::TargetLoops,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PassKind::ComputeAt => "compute-at",
            PassKind::Vectorize => "vectorize",
            PassKind::Unroll => "unroll",
            PassKind::GpuBind => "gpu-bind",
            PassKind::Inline => "inline",
            PassKind::BufferAssign => "buffer-assign",
            PassKind::FoldCallArgs => "fold-call-args",
            PassKind::FlattenBlocks => "flatten-blocks",
            PassKind::PolyForToFor => "polyfor-to-for",
            PassKind::TargetLoops => "target-loops",
        }
    }

    pub fn create(&self) -> Box<dyn Pass> {
        match self {
            PassKind::ComputeAt => Box::new(ComputeAtPass),
            PassKind::Vectorize => Box::new(VectorizePass),
            PassKind::Unroll => Box::new(UnrollPass),
            PassKind::GpuBind => Box::new(GpuBindPass),
            PassKind::Inline => Box::new(InlinePass),
            PassKind::BufferAssign => Box::new(BufferAssignPass),
            PassKind::FoldCallArgs => Box::new(FoldCallArgsPass),
            PassKind::FlattenBlocks => Box::new(FlattenBlocksPass),
            PassKind::PolyForToFor => Box::new(PolyForToForPass),
            PassKind::TargetLoops => Box::new(TargetLoopsPass),
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let order = PassKind::default_order();
        assert_eq!(order.first(), Some(&PassKind::ComputeAt));
        assert_eq!(order.last(), Some(&PassKind::TargetLoops));
        let pos = |k| order.iter().position(|p| *p == k);
        assert!(pos(PassKind::Inline) < pos(PassKind::BufferAssign));
        assert!(pos(PassKind::Unroll) < pos(PassKind::PolyForToFor));
        for kind in order {
            assert_eq!(kind.create().kind(), kind);
        }
    }
}
