//! Scalar and vector element types of IR values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Class of a scalar element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Int,
    UInt,
    Float,
    /// No value (statements)
    Void,
}

/// The type of an IR value: element class, bit width and lane count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type {
    kind: ScalarKind,
    bits: u8,
    lanes: u16,
}

impl Type {
    pub const fn int(bits: u8) -> Self {
        Self { kind: ScalarKind::Int, bits, lanes: 1 }
    }

    pub const fn uint(bits: u8) -> Self {
        Self { kind: ScalarKind::UInt, bits, lanes: 1 }
    }

    pub const fn float(bits: u8) -> Self {
        Self { kind: ScalarKind::Float, bits, lanes: 1 }
    }

    /// Result type of comparisons and logical operators.
    pub const fn bool_() -> Self {
        Self::uint(1)
    }

    pub const fn void() -> Self {
        Self { kind: ScalarKind::Void, bits: 0, lanes: 0 }
    }

    /// Type of loop iterators and tensor indices.
    pub const fn index() -> Self {
        Self::int(32)
    }

    pub fn kind(&self) -> ScalarKind { self.kind }
    pub fn bits(&self) -> u8 { self.bits }
    pub fn lanes(&self) -> u16 { self.lanes }

    pub fn is_int(&self) -> bool { self.kind == ScalarKind::Int }
    pub fn is_uint(&self) -> bool { self.kind == ScalarKind::UInt && self.bits > 1 }
    pub fn is_float(&self) -> bool { self.kind == ScalarKind::Float }
    pub fn is_bool(&self) -> bool { self.kind == ScalarKind::UInt && self.bits == 1 }
    pub fn is_void(&self) -> bool { self.kind == ScalarKind::Void }
    pub fn is_scalar(&self) -> bool { self.lanes == 1 }

    /// Signed or unsigned integer (excluding bool).
    pub fn is_integer(&self) -> bool {
        self.is_int() || self.is_uint()
    }

    /// Same element type with `lanes` lanes.
    pub fn with_lanes(&self, lanes: u16) -> Self {
        Self { lanes, ..*self }
    }

    /// The element type of a vector type.
    pub fn element_of(&self) -> Self {
        self.with_lanes(1)
    }

    /// Whether an immediate of this type can be constructed.
    pub fn is_valid_immediate(&self) -> bool {
        !self.is_void() && self.is_scalar() && matches!(self.bits, 8 | 16 | 32 | 64)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Void => return write!(f, "void"),
            ScalarKind::UInt if self.bits == 1 => write!(f, "bool")?,
            ScalarKind::Int => write!(f, "int{}", self.bits)?,
            ScalarKind::UInt => write!(f, "uint{}", self.bits)?,
            ScalarKind::Float => write!(f, "float{}", self.bits)?,
        }
        if self.lanes > 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}
