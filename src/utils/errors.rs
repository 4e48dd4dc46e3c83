//! Error types for the lowering pipeline.
//!
//! Errors are organized by class rather than by phase: a bad directive is a
//! configuration error wherever it is detected, a scheduler/lowering mismatch
//! is an internal error, and ill-typed node construction is a type error.
//! None of them are recoverable; lowering of the current function stops.

use thiserror::Error;
use std::fmt;

/// Top-level error type for lowering.
#[derive(Error, Debug, Clone)]
pub enum LowerError {
    /// Invalid user declaration (arguments, stage directives)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Mismatch between the lowering core and its caller or the scheduling engine
    #[error("Internal error: {0}")]
    Internal(#[from] InternalError),

    /// Ill-typed or ill-shaped IR node
    #[error("Type error: {0}")]
    Type(#[from] TypeError),
}

impl LowerError {
    /// Build a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        LowerError::Config(ConfigError::new(kind, message))
    }

    /// Build a configuration error that names the offending tensor.
    pub fn config_for(kind: ConfigErrorKind, tensor: &str, message: impl Into<String>) -> Self {
        LowerError::Config(ConfigError::new(kind, message).with_tensor(tensor))
    }

    /// Build an internal-consistency error.
    pub fn internal(kind: InternalErrorKind, message: impl Into<String>) -> Self {
        LowerError::Internal(InternalError { message: message.into(), kind })
    }

    /// Build a type error.
    pub fn type_error(kind: TypeErrorKind, message: impl Into<String>) -> Self {
        LowerError::Type(TypeError { message: message.into(), kind })
    }

    /// The configuration error kind, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            LowerError::Config(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The internal error kind, if this is one.
    pub fn internal_kind(&self) -> Option<InternalErrorKind> {
        match self {
            LowerError::Internal(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The type error kind, if this is one.
    pub fn type_kind(&self) -> Option<TypeErrorKind> {
        match self {
            LowerError::Type(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// A user declaration that cannot be lowered.
#[derive(Error, Debug, Clone)]
pub struct ConfigError {
    /// The error message
    pub message: String,
    /// Tensor/stage the declaration belongs to (if any)
    pub tensor: Option<String>,
    /// The kind of configuration error
    pub kind: ConfigErrorKind,
}

impl ConfigError {
    /// Create a new configuration error.
    pub fn new(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), tensor: None, kind }
    }

    /// Attach the offending tensor name.
    pub fn with_tensor(mut self, tensor: &str) -> Self {
        self.tensor = Some(tensor.to_string());
        self
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref tensor) = self.tensor {
            write!(f, " (tensor: {})", tensor)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Two function arguments with the same name
    DuplicateArgument,
    /// The same tensor handle passed twice to the graph builder
    DuplicateTensor,
    /// Vectorize level outside the loop nest, or non-positive width
    InvalidVectorize,
    /// Unroll level outside the loop nest
    InvalidUnroll,
    /// Compute-at target/level that cannot be honored
    InvalidComputeAt,
    /// GPU bind level outside the loop nest
    InvalidGpuBind,
    /// Share-buffer target unknown or incompatible
    InvalidShareBuffer,
    /// Inline directive on a tensor that must be materialized
    InvalidInline,
}

/// A broken invariant between the lowering core and its collaborators.
#[derive(Error, Debug, Clone)]
pub struct InternalError {
    /// The error message
    pub message: String,
    /// The kind of internal error
    pub kind: InternalErrorKind,
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalErrorKind {
    /// A scheduler statement call without a registered expression
    UnresolvedPlaceholder,
    /// The computation graph has a cycle
    CyclicGraph,
    /// A tensor is referenced but never defined nor supplied
    DanglingTensor,
    /// A stage expected by a pass is not known
    MissingStage,
    /// A generated loop whose bounds cannot be put in plain form
    UnsupportedLoop,
}

/// An IR node that violates typing or shape rules.
#[derive(Error, Debug, Clone)]
pub struct TypeError {
    /// The error message
    pub message: String,
    /// The kind of type error
    pub kind: TypeErrorKind,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeErrorKind {
    /// Operands of a binary operator disagree, or an operand has the wrong class
    OperandMismatch,
    /// Immediate with an unsupported bit width or a vector type
    InvalidImmediate,
    /// Index count does not match the tensor rank
    ShapeMismatch,
    /// Tensor index that is not an integer
    NonIntegerIndex,
}

/// Result type using LowerError.
pub type LowerResult<T> = Result<T, LowerError>;
