//! Utility modules for the lowering core.
//!
//! This module contains common utilities used throughout the codebase:
//! - Error types
//! - Unique name generation
//! - Pretty printing helpers

pub mod errors;
pub mod names;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use names::NameGenerator;
