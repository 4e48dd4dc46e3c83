//! Lowering of schedule groups and whole functions.

pub mod function;
pub mod group;

pub use function::LowerImpl;
pub use group::{check_no_placeholder_remains, lower_group};
