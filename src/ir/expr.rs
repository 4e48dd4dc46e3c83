//! Expression nodes of the loop-nest IR.
//!
//! An [`Expr`] is a cheap, shareable handle (`Arc`) over one [`ExprNode`].
//! The node set is closed: immediates, operators, tensor accesses and the
//! control constructs produced by lowering. Passes dispatch with `match`
//! and rebuild trees instead of mutating shared nodes.
//!
//! Checked constructors enforce the typing rules at construction time:
//! binary operands must agree on their type, immediates must have a
//! supported width, and tensor accesses must match the tensor rank.

use crate::ir::tensor::Tensor;
use crate::ir::types::Type;
use crate::utils::errors::{LowerError, LowerResult, TypeErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A named scalar variable (loop iterator, axis, or scalar argument).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub name: String,
    pub ty: Type,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty }
    }

    /// An `int32` variable, the type of iterators and indices.
    pub fn index(name: impl Into<String>) -> Self {
        Self::new(name, Type::index())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_expr(&self) -> Expr {
        Expr::var(self)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add, Sub, Mul, Div, Mod,
    EQ, NE, LT, LE, GT, GE,
    And, Or,
    Min, Max,
}

impl BinaryOp {
    pub fn is_compare(&self) -> bool {
        matches!(self, BinaryOp::EQ | BinaryOp::NE | BinaryOp::LT | BinaryOp::LE | BinaryOp::GT | BinaryOp::GE)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_function_like(&self) -> bool {
        matches!(self, BinaryOp::Min | BinaryOp::Max)
    }

    /// Printed form; `min`/`max` print as calls.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::EQ => "==",
            BinaryOp::NE => "!=",
            BinaryOp::LT => "<",
            BinaryOp::LE => "<=",
            BinaryOp::GT => ">",
            BinaryOp::GE => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Minus,
}

/// Vectorize directive: vectorize the loop at nesting `level` by `factor` lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorizeInfo {
    pub level: usize,
    pub factor: usize,
}

impl VectorizeInfo {
    pub fn new(level: usize, factor: usize) -> Self {
        Self { level, factor }
    }

    pub fn valid(&self) -> bool {
        self.factor > 0
    }
}

/// Hardware index a loop can be bound to on GPU targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GpuAxis {
    BlockX,
    BlockY,
    BlockZ,
    ThreadX,
    ThreadY,
    ThreadZ,
}

impl GpuAxis {
    pub fn name(&self) -> &'static str {
        match self {
            GpuAxis::BlockX => "blockIdx.x",
            GpuAxis::BlockY => "blockIdx.y",
            GpuAxis::BlockZ => "blockIdx.z",
            GpuAxis::ThreadX => "threadIdx.x",
            GpuAxis::ThreadY => "threadIdx.y",
            GpuAxis::ThreadZ => "threadIdx.z",
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, GpuAxis::BlockX | GpuAxis::BlockY | GpuAxis::BlockZ)
    }

    /// Dimension index (x = 0, y = 1, z = 2).
    pub fn dim(&self) -> usize {
        match self {
            GpuAxis::BlockX | GpuAxis::ThreadX => 0,
            GpuAxis::BlockY | GpuAxis::ThreadY => 1,
            GpuAxis::BlockZ | GpuAxis::ThreadZ => 2,
        }
    }

    pub fn var(&self) -> Var {
        Var::index(self.name())
    }
}

/// Execution form of a plain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForType {
    Serial,
    Vectorized,
    Unrolled,
}

/// Scheduling annotations carried by loop nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopAnnotations {
    pub vectorize: Option<VectorizeInfo>,
    pub unrolled: bool,
    pub bind: Option<GpuAxis>,
}

impl LoopAnnotations {
    pub fn is_empty(&self) -> bool {
        self.vectorize.is_none() && !self.unrolled && self.bind.is_none()
    }
}

/// `for (var = min; var < min + extent; var++) body`
#[derive(Debug, Clone, PartialEq)]
pub struct For {
    pub var: Var,
    pub min: Expr,
    pub extent: Expr,
    pub for_type: ForType,
    pub annotations: LoopAnnotations,
    pub body: Expr,
}

/// Loop as produced by the scheduling engine:
/// `for (iterator = init; condition; iterator += inc) body`
#[derive(Debug, Clone, PartialEq)]
pub struct PolyFor {
    pub iterator: Var,
    pub init: Expr,
    pub condition: Expr,
    pub inc: Expr,
    pub annotations: LoopAnnotations,
    pub body: Expr,
}

/// How a call is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// Pure math intrinsic
    Intrinsic,
    /// External pure function
    Extern,
    /// Runtime routine writing its result through its trailing `outputs` buffer operands
    Runtime { outputs: usize },
    /// Statement instance emitted by the scheduling engine; resolved during lowering
    Isl,
}

/// One IR node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    IntImm { ty: Type, value: i64 },
    UIntImm { ty: Type, value: u64 },
    FloatImm { ty: Type, value: f64 },
    Var(Var),
    Binary { op: BinaryOp, ty: Type, a: Expr, b: Expr },
    Unary { op: UnaryOp, ty: Type, v: Expr },
    Cast { ty: Type, v: Expr },
    /// One element of a tensor
    Load { tensor: Tensor, indices: Vec<Expr> },
    /// The whole backing buffer of a tensor (runtime call operand)
    BufferRef(Tensor),
    /// Write one element of a tensor
    Store { tensor: Tensor, value: Expr, indices: Vec<Expr> },
    Call { name: String, ty: Type, args: Vec<Expr>, call_type: CallType },
    For(For),
    PolyFor(PolyFor),
    IfThenElse { condition: Expr, then_case: Expr, else_case: Option<Expr> },
    Block(Vec<Expr>),
}

/// Shared handle to an IR node.
#[derive(Clone)]
pub struct Expr(Arc<ExprNode>);

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl From<Var> for Expr {
    fn from(v: Var) -> Self {
        Expr::from_node(ExprNode::Var(v))
    }
}

impl From<&Var> for Expr {
    fn from(v: &Var) -> Self {
        Expr::var(v)
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::int(v as i64)
    }
}

fn mismatch(message: String) -> LowerError {
    LowerError::type_error(TypeErrorKind::OperandMismatch, message)
}

impl Expr {
    pub(crate) fn from_node(node: ExprNode) -> Self {
        Expr(Arc::new(node))
    }

    pub fn node(&self) -> &ExprNode {
        &self.0
    }

    /// Whether both handles point at the same node.
    pub fn same_as(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Result type; statements are `void`.
    pub fn ty(&self) -> Type {
        match self.node() {
            ExprNode::IntImm { ty, .. }
            | ExprNode::UIntImm { ty, .. }
            | ExprNode::FloatImm { ty, .. }
            | ExprNode::Binary { ty, .. }
            | ExprNode::Unary { ty, .. }
            | ExprNode::Cast { ty, .. }
            | ExprNode::Call { ty, .. } => *ty,
            ExprNode::Var(v) => v.ty,
            ExprNode::Load { tensor, .. } => tensor.dtype(),
            ExprNode::BufferRef(_)
            | ExprNode::Store { .. }
            | ExprNode::For(_)
            | ExprNode::PolyFor(_)
            | ExprNode::IfThenElse { .. }
            | ExprNode::Block(_) => Type::void(),
        }
    }

    // ---- immediates ----

    /// An `int32` constant.
    pub fn int(value: i64) -> Expr {
        Expr::from_node(ExprNode::IntImm { ty: Type::index(), value })
    }

    /// A `float32` constant.
    pub fn float(value: f32) -> Expr {
        Expr::from_node(ExprNode::FloatImm { ty: Type::float(32), value: value as f64 })
    }

    pub fn bool_(value: bool) -> Expr {
        Expr::from_node(ExprNode::UIntImm { ty: Type::bool_(), value: value as u64 })
    }

    pub fn int_imm(ty: Type, value: i64) -> LowerResult<Expr> {
        if !ty.is_int() || !ty.is_valid_immediate() {
            return Err(LowerError::type_error(
                TypeErrorKind::InvalidImmediate,
                format!("invalid signed integer immediate type {}", ty),
            ));
        }
        Ok(Expr::from_node(ExprNode::IntImm { ty, value }))
    }

    pub fn uint_imm(ty: Type, value: u64) -> LowerResult<Expr> {
        if !ty.is_uint() || !ty.is_valid_immediate() {
            return Err(LowerError::type_error(
                TypeErrorKind::InvalidImmediate,
                format!("invalid unsigned integer immediate type {}", ty),
            ));
        }
        Ok(Expr::from_node(ExprNode::UIntImm { ty, value }))
    }

    pub fn float_imm(ty: Type, value: f64) -> LowerResult<Expr> {
        if !ty.is_float() || !ty.is_valid_immediate() {
            return Err(LowerError::type_error(
                TypeErrorKind::InvalidImmediate,
                format!("invalid float immediate type {}", ty),
            ));
        }
        Ok(Expr::from_node(ExprNode::FloatImm { ty, value }))
    }

    /// A constant of type `ty` holding `value`, converted to the type's class.
    pub fn constant(ty: Type, value: f64) -> LowerResult<Expr> {
        if ty.is_float() {
            Expr::float_imm(ty, value)
        } else if ty.is_uint() {
            Expr::uint_imm(ty, value.max(0.0) as u64)
        } else {
            Expr::int_imm(ty, value as i64)
        }
    }

    /// Smallest representable value of `ty`.
    pub fn min_value(ty: Type) -> LowerResult<Expr> {
        if ty.is_float() {
            let v = if ty.bits() == 64 { f64::MIN } else { f32::MIN as f64 };
            Expr::float_imm(ty, v)
        } else if ty.is_uint() {
            Expr::uint_imm(ty, 0)
        } else {
            let v = match ty.bits() {
                8 => i8::MIN as i64,
                16 => i16::MIN as i64,
                32 => i32::MIN as i64,
                _ => i64::MIN,
            };
            Expr::int_imm(ty, v)
        }
    }

    /// Largest representable value of `ty`.
    pub fn max_value(ty: Type) -> LowerResult<Expr> {
        if ty.is_float() {
            let v = if ty.bits() == 64 { f64::MAX } else { f32::MAX as f64 };
            Expr::float_imm(ty, v)
        } else if ty.is_uint() {
            let v = match ty.bits() {
                8 => u8::MAX as u64,
                16 => u16::MAX as u64,
                32 => u32::MAX as u64,
                _ => u64::MAX,
            };
            Expr::uint_imm(ty, v)
        } else {
            let v = match ty.bits() {
                8 => i8::MAX as i64,
                16 => i16::MAX as i64,
                32 => i32::MAX as i64,
                _ => i64::MAX,
            };
            Expr::int_imm(ty, v)
        }
    }

    pub fn var(v: &Var) -> Expr {
        Expr::from_node(ExprNode::Var(v.clone()))
    }

    // ---- operators ----

    /// Build a binary operator node, checking operand types.
    pub fn binary(op: BinaryOp, a: Expr, b: Expr) -> LowerResult<Expr> {
        let (ta, tb) = (a.ty(), b.ty());
        if ta != tb {
            return Err(mismatch(format!(
                "the two arguments' type not match: {} {} {}",
                ta, op.symbol(), tb
            )));
        }
        if ta.is_void() {
            return Err(mismatch(format!("operator {} applied to a statement", op.symbol())));
        }
        let ty = if op.is_logical() {
            if !ta.is_bool() {
                return Err(mismatch(format!("logical operator {} needs bool operands, got {}", op.symbol(), ta)));
            }
            ta
        } else if op.is_compare() {
            Type::bool_().with_lanes(ta.lanes())
        } else {
            if ta.is_bool() {
                return Err(mismatch(format!("arithmetic operator {} applied to bool", op.symbol())));
            }
            ta
        };
        Ok(make_binary(op, ty, a, b))
    }

    pub fn add(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::Add, a, b) }
    pub fn sub(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::Sub, a, b) }
    pub fn mul(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::Mul, a, b) }
    pub fn div(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::Div, a, b) }
    pub fn rem(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::Mod, a, b) }
    pub fn min(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::Min, a, b) }
    pub fn max(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::Max, a, b) }
    pub fn eq(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::EQ, a, b) }
    pub fn ne(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::NE, a, b) }
    pub fn lt(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::LT, a, b) }
    pub fn le(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::LE, a, b) }
    pub fn gt(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::GT, a, b) }
    pub fn ge(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::GE, a, b) }
    pub fn and(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::And, a, b) }
    pub fn or(a: Expr, b: Expr) -> LowerResult<Expr> { Expr::binary(BinaryOp::Or, a, b) }

    pub fn unary(op: UnaryOp, v: Expr) -> LowerResult<Expr> {
        let ty = v.ty();
        match op {
            UnaryOp::Not if !ty.is_bool() => {
                return Err(mismatch(format!("logical not needs a bool operand, got {}", ty)));
            }
            UnaryOp::Minus if ty.is_bool() || ty.is_void() => {
                return Err(mismatch(format!("negation needs a numeric operand, got {}", ty)));
            }
            _ => {}
        }
        Ok(Expr::from_node(ExprNode::Unary { op, ty, v }))
    }

    pub fn not(v: Expr) -> LowerResult<Expr> { Expr::unary(UnaryOp::Not, v) }
    pub fn neg(v: Expr) -> LowerResult<Expr> { Expr::unary(UnaryOp::Minus, v) }

    pub fn cast(ty: Type, v: Expr) -> Expr {
        if v.ty() == ty {
            return v;
        }
        Expr::from_node(ExprNode::Cast { ty, v })
    }

    // ---- tensor access ----

    fn check_indices(tensor: &Tensor, indices: &[Expr]) -> LowerResult<()> {
        if indices.len() != tensor.ndim() {
            return Err(LowerError::type_error(
                TypeErrorKind::ShapeMismatch,
                format!(
                    "tensor {} has rank {} but is accessed with {} indices",
                    tensor.name(), tensor.ndim(), indices.len()
                ),
            ));
        }
        if let Some(bad) = indices.iter().find(|i| !i.ty().is_integer()) {
            return Err(LowerError::type_error(
                TypeErrorKind::NonIntegerIndex,
                format!("tensor {} indexed with a {} value", tensor.name(), bad.ty()),
            ));
        }
        Ok(())
    }

    pub fn load(tensor: Tensor, indices: Vec<Expr>) -> LowerResult<Expr> {
        Expr::check_indices(&tensor, &indices)?;
        Ok(Expr::from_node(ExprNode::Load { tensor, indices }))
    }

    pub fn buffer_ref(tensor: &Tensor) -> Expr {
        Expr::from_node(ExprNode::BufferRef(tensor.clone()))
    }

    pub fn store(tensor: Tensor, value: Expr, indices: Vec<Expr>) -> LowerResult<Expr> {
        Expr::check_indices(&tensor, &indices)?;
        if value.ty() != tensor.dtype() && !value.is_runtime_call() {
            return Err(mismatch(format!(
                "storing a {} value into tensor {} of type {}",
                value.ty(), tensor.name(), tensor.dtype()
            )));
        }
        Ok(Expr::from_node(ExprNode::Store { tensor, value, indices }))
    }

    // ---- calls ----

    pub fn call(name: impl Into<String>, ty: Type, args: Vec<Expr>, call_type: CallType) -> Expr {
        Expr::from_node(ExprNode::Call { name: name.into(), ty, args, call_type })
    }

    /// A runtime routine call whose result is written through an output buffer.
    pub fn runtime_call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::call(name, Type::void(), args, CallType::Runtime { outputs: 0 })
    }

    // ---- control ----

    pub fn for_loop(var: Var, min: Expr, extent: Expr, body: Expr) -> LowerResult<Expr> {
        if !var.ty.is_integer() || !min.ty().is_integer() || !extent.ty().is_integer() {
            return Err(mismatch(format!("loop {} must have integer iterator and bounds", var)));
        }
        Ok(Expr::from_node(ExprNode::For(For {
            var,
            min,
            extent,
            for_type: ForType::Serial,
            annotations: LoopAnnotations::default(),
            body,
        })))
    }

    pub fn poly_for(iterator: Var, init: Expr, condition: Expr, inc: Expr, body: Expr) -> LowerResult<Expr> {
        if !iterator.ty.is_integer() || !init.ty().is_integer() || !inc.ty().is_integer() {
            return Err(mismatch(format!("poly loop {} must have integer iterator and bounds", iterator)));
        }
        if !condition.ty().is_bool() {
            return Err(mismatch(format!("poly loop {} condition must be bool, got {}", iterator, condition.ty())));
        }
        Ok(Expr::from_node(ExprNode::PolyFor(PolyFor {
            iterator,
            init,
            condition,
            inc,
            annotations: LoopAnnotations::default(),
            body,
        })))
    }

    pub fn if_then_else(condition: Expr, then_case: Expr, else_case: Option<Expr>) -> LowerResult<Expr> {
        if !condition.ty().is_bool() {
            return Err(mismatch(format!("if condition must be bool, got {}", condition.ty())));
        }
        Ok(Expr::from_node(ExprNode::IfThenElse { condition, then_case, else_case }))
    }

    pub fn block(stmts: Vec<Expr>) -> Expr {
        Expr::from_node(ExprNode::Block(stmts))
    }

    // ---- queries ----

    /// Constant integer value, if this is an integer immediate.
    pub fn as_int(&self) -> Option<i64> {
        match self.node() {
            ExprNode::IntImm { value, .. } => Some(*value),
            ExprNode::UIntImm { value, .. } => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self.node() {
            ExprNode::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_isl_call(&self) -> bool {
        matches!(self.node(), ExprNode::Call { call_type: CallType::Isl, .. })
    }

    pub fn is_runtime_call(&self) -> bool {
        matches!(self.node(), ExprNode::Call { call_type: CallType::Runtime { .. }, .. })
    }
}

/// Binary node without type checking; callers guarantee `a` and `b` agree.
pub(crate) fn make_binary(op: BinaryOp, ty: Type, a: Expr, b: Expr) -> Expr {
    Expr::from_node(ExprNode::Binary { op, ty, a, b })
}
