//! # PolyLower - Tensor Computation Lowering
//!
//! Turns a declarative description of tensor computations into one
//! loop-nested function body ready for code generation:
//! - Computation graph construction over tensors and their stages
//! - Schedule groups and loop-nest generation (compute-at fusion, reductions)
//! - Placeholder resolution into concrete stores
//! - Post-generation passes (annotations, inlining, buffers, loop forms)
//! - Function assembly (argument order, input/output roles, temporaries)
//!
//! ## Architecture
//!
//! ```text
//! Tensors → CompGraph → Schedule → Group ASTs → Passes → LoweredFunc
//! ```
//!
//! ## Example
//!
//! ```rust
//! use polylower::prelude::*;
//!
//! let a = Tensor::placeholder("A", &[16, 16], Type::float(32));
//! let b = Tensor::compute("B", &[16, 16], |ax| {
//!     Expr::add(a.at(ax.to_vec())?, Expr::float(1.0))
//! })?;
//! b.vectorize(1, 4);
//!
//! let f = polylower::lower("add_one", &[a, b], &[], &[], LowerOptions::default())?;
//! assert_eq!(f.arg_names(), vec!["A", "B"]);
//! # Ok::<(), polylower::LowerError>(())
//! ```

#![warn(clippy::all)]

pub mod analysis;
pub mod ir;
pub mod lower;
pub mod poly;
pub mod transform;
pub mod utils;

pub use ir::function::LoweredFunc;
pub use transform::{PassKind, Target};
pub use utils::errors::{LowerError, LowerResult};

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::analysis::{create_comp_graph, CompGraph};
    pub use crate::ir::expr::{Expr, GpuAxis, Var};
    pub use crate::ir::function::{ArgIo, Argument, Buffer, LoweredFunc};
    pub use crate::ir::tensor::{ReduceKind, Tensor};
    pub use crate::ir::types::Type;
    pub use crate::lower::LowerImpl;
    pub use crate::transform::{Pass, PassKind, Target};
    pub use crate::utils::errors::*;
    pub use crate::utils::pretty::PrettyPrint;
    pub use crate::LowerOptions;
}

use ir::expr::Var;
use ir::tensor::Tensor;

/// Configuration of one lowering invocation.
#[derive(Debug, Clone)]
pub struct LowerOptions {
    /// Device the function runs on
    pub target: Target,
    /// Fuse inlined tensors out of the computation graph
    pub hide_inline: bool,
    /// Custom ordered pass list; `None` runs the fixed pipeline
    pub passes: Option<Vec<PassKind>>,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            target: Target::Host,
            hide_inline: true,
            passes: None,
        }
    }
}

impl LowerOptions {
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_hide_inline(mut self, hide_inline: bool) -> Self {
        self.hide_inline = hide_inline;
        self
    }

    pub fn with_passes(mut self, passes: Vec<PassKind>) -> Self {
        self.passes = Some(passes);
        self
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lower the computation producing `tensor_args` into function `name`.
///
/// `temp_tensors` lists intermediates to compute even when no argument
/// reads them. Scalar arguments come first in the resulting argument list.
pub fn lower(
    name: &str,
    tensor_args: &[Tensor],
    scalar_args: &[Var],
    temp_tensors: &[Tensor],
    options: LowerOptions,
) -> LowerResult<LoweredFunc> {
    lower::LowerImpl::new(name, tensor_args, scalar_args, temp_tensors, options)?.lower()
}
