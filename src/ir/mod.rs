//! Loop-nest intermediate representation.
//!
//! This module defines the IR that lowering consumes and produces:
//! - Types: scalar/vector element types
//! - Expr: expression and statement nodes behind a shared handle
//! - Tensor: computation results with their stage directives
//! - Function: the lowered function artifact

pub mod expr;
pub mod function;
pub mod mutate;
pub mod printer;
pub mod simplify;
pub mod tensor;
pub mod types;

pub use expr::*;
pub use function::*;
pub use tensor::*;
pub use types::*;
