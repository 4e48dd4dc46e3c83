//! Polyhedral scheduling layer.
//!
//! This module provides:
//! - Affine forms for index expressions
//! - Rectangular iteration domains of stages
//! - Stage declarations grouped into schedule groups
//! - Loop-nest generation with placeholder statement calls

pub mod affine;
pub mod ast_gen;
pub mod domain;
pub mod schedule;

pub use affine::AffineForm;
pub use ast_gen::{build_group_ast, AstBuilder};
pub use domain::{Dim, Domain};
pub use schedule::{AccessWindow, Attach, ComputeAtInfo, Schedule, ScheduleGroup, Scheduler, StageDecl};
