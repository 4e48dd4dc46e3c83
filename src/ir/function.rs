//! The lowered function: the terminal artifact of lowering.

use crate::ir::expr::{Expr, Var};
use crate::ir::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the function reads or writes an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgIo {
    Input,
    Output,
}

/// A named region of memory backing one or more tensors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    pub name: String,
    pub dtype: Type,
    pub shape: Vec<i64>,
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{:?}", self.name, self.dtype, self.shape)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgKind {
    Scalar(Var),
    Buffer(Buffer),
}

/// One function argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub kind: ArgKind,
    pub io: ArgIo,
}

impl Argument {
    /// Scalars are always inputs.
    pub fn scalar(var: &Var) -> Self {
        Self { name: var.name.clone(), kind: ArgKind::Scalar(var.clone()), io: ArgIo::Input }
    }

    pub fn buffer(name: impl Into<String>, buffer: Buffer, io: ArgIo) -> Self {
        Self { name: name.into(), kind: ArgKind::Buffer(buffer), io }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, ArgKind::Scalar(_))
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.kind, ArgKind::Buffer(_))
    }

    pub fn is_output(&self) -> bool {
        self.io == ArgIo::Output
    }

    pub fn ty(&self) -> Type {
        match &self.kind {
            ArgKind::Scalar(v) => v.ty,
            ArgKind::Buffer(b) => b.dtype,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ArgKind::Scalar(v) => write!(f, "{}", v.name),
            ArgKind::Buffer(b) => write!(f, "{}", b.name),
        }
    }
}

/// One lowered function: ordered arguments, local buffers and a body.
#[derive(Debug, Clone, PartialEq)]
pub struct LoweredFunc {
    pub name: String,
    pub args: Vec<Argument>,
    pub body: Expr,
    /// Buffers of temporary tensors, allocated locally
    pub temp_buffers: Vec<Buffer>,
    /// Launch extents per dimension (x, y, z) on GPU targets
    pub gpu_grid_dims: Vec<i64>,
    pub gpu_block_dims: Vec<i64>,
}

impl LoweredFunc {
    pub fn arg_names(&self) -> Vec<&str> {
        self.args.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn arg(&self, name: &str) -> Option<&Argument> {
        self.args.iter().find(|a| a.name == name)
    }

    pub fn temp_buffer(&self, name: &str) -> Option<&Buffer> {
        self.temp_buffers.iter().find(|b| b.name == name)
    }

    pub fn is_gpu_kernel(&self) -> bool {
        !self.gpu_grid_dims.is_empty() || !self.gpu_block_dims.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_kinds() {
        let m = Argument::scalar(&Var::index("m"));
        assert!(m.is_scalar());
        assert_eq!(m.io, ArgIo::Input);
        assert_eq!(m.to_string(), "m");

        let buf = Buffer { name: "_A".into(), dtype: Type::float(32), shape: vec![4, 4] };
        let a = Argument::buffer("A", buf, ArgIo::Output);
        assert!(a.is_buffer() && a.is_output());
        assert_eq!(a.to_string(), "_A");
        assert_eq!(a.ty(), Type::float(32));
    }
}
