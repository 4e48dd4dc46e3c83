//! Analyses over the tensor computation.

pub mod graph;

pub use graph::{create_comp_graph, CompGraph, EdgeKind, GraphNode};
