//! Tensors and their scheduling metadata.
//!
//! A [`Tensor`] is a named, shaped value. It is either a placeholder
//! supplied by the caller or a compute tensor defined by an expression over
//! its axis variables (optionally reduced over extra axes). Every tensor
//! owns a [`Stage`] holding the scheduling directives the caller attached:
//! compute-at, vectorize, unroll, GPU binds, inlining, buffer sharing and
//! extra dependencies.
//!
//! Directives are set during computation construction. Lowering only reads
//! them; rewritten tensors (shrunk shapes, assigned buffers) are new handles.

use crate::ir::expr::{Expr, GpuAxis, Var, VectorizeInfo};
use crate::ir::mutate;
use crate::ir::types::Type;
use crate::utils::errors::{LowerError, LowerResult, TypeErrorKind};
use crate::utils::names::{self, NameGenerator};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Suffix of the synthesized initialization stage of a reduction.
pub const REDUCE_INIT_SUFFIX: &str = "__reduce_init";

const AXIS_NAMES: [&str; 4] = ["i", "j", "k", "l"];

/// Name of the `n`-th axis variable of a compute tensor.
fn axis_name(n: usize) -> String {
    AXIS_NAMES
        .get(n)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("i{}", n))
}

/// Combiner of a reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceKind {
    Sum,
    Product,
    Max,
    Min,
}

impl ReduceKind {
    /// Identity element of the combiner for `ty`.
    pub fn identity(&self, ty: Type) -> LowerResult<Expr> {
        match self {
            ReduceKind::Sum => Expr::constant(ty, 0.0),
            ReduceKind::Product => Expr::constant(ty, 1.0),
            ReduceKind::Max => Expr::min_value(ty),
            ReduceKind::Min => Expr::max_value(ty),
        }
    }

    /// `acc <op> value`
    pub fn combine(&self, acc: Expr, value: Expr) -> LowerResult<Expr> {
        match self {
            ReduceKind::Sum => Expr::add(acc, value),
            ReduceKind::Product => Expr::mul(acc, value),
            ReduceKind::Max => Expr::max(acc, value),
            ReduceKind::Min => Expr::min(acc, value),
        }
    }
}

/// A reduction axis with a constant extent.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceAxis {
    pub var: Var,
    pub extent: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub kind: ReduceKind,
    pub axis: Vec<ReduceAxis>,
}

/// How a tensor gets its values.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorOp {
    /// Supplied by the caller
    Placeholder,
    /// `T[axis] = body`, or `T[axis] = reduce(body)` over the reduce axes
    Compute {
        axis: Vec<Var>,
        body: Expr,
        reduce: Option<Reduction>,
    },
}

/// Fuse this stage into loop `level` of `consumer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeAtSpec {
    pub consumer: String,
    pub level: usize,
}

/// Scheduling directives of one tensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub compute_at: Option<ComputeAtSpec>,
    pub vectorize: Option<VectorizeInfo>,
    pub unroll: BTreeSet<usize>,
    pub gpu_binds: BTreeMap<usize, GpuAxis>,
    pub extra_depends: BTreeSet<String>,
    pub share_buffer_with: Option<String>,
    pub inlined: bool,
}

struct TensorNode {
    name: String,
    shape: Vec<i64>,
    dtype: Type,
    op: TensorOp,
    buffer: Option<String>,
    /// Set on synthesized reduction-init tensors: the reduced tensor's name
    init_of: Option<String>,
    stage: RwLock<Stage>,
}

/// Shared handle to a tensor. Identity is the handle; equality compares the
/// name, shape, type and bound buffer.
#[derive(Clone)]
pub struct Tensor(Arc<TensorNode>);

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.name == other.0.name
                && self.0.shape == other.0.shape
                && self.0.dtype == other.0.dtype
                && self.0.buffer == other.0.buffer)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor({}{:?}: {})", self.0.name, self.0.shape, self.0.dtype)
    }
}

impl Tensor {
    fn from_parts(name: String, shape: Vec<i64>, dtype: Type, op: TensorOp) -> Self {
        Tensor(Arc::new(TensorNode {
            name,
            shape,
            dtype,
            op,
            buffer: None,
            init_of: None,
            stage: RwLock::new(Stage::default()),
        }))
    }

    /// A caller-supplied input tensor.
    pub fn placeholder(name: impl Into<String>, shape: &[i64], dtype: Type) -> Self {
        Tensor::from_parts(name.into(), shape.to_vec(), dtype, TensorOp::Placeholder)
    }

    /// A tensor defined elementwise by `body(axis)`.
    pub fn compute<F>(name: impl Into<String>, shape: &[i64], body: F) -> LowerResult<Self>
    where
        F: FnOnce(&[Expr]) -> LowerResult<Expr>,
    {
        let axis: Vec<Var> = (0..shape.len()).map(|n| Var::index(axis_name(n))).collect();
        let axis_exprs: Vec<Expr> = axis.iter().map(Var::to_expr).collect();
        let body = body(&axis_exprs)?;
        let dtype = body.ty();
        if dtype.is_void() {
            return Err(LowerError::type_error(
                TypeErrorKind::OperandMismatch,
                "compute body must produce a value",
            ));
        }
        Ok(Tensor::from_parts(
            name.into(),
            shape.to_vec(),
            dtype,
            TensorOp::Compute { axis, body, reduce: None },
        ))
    }

    /// A tensor produced by a runtime routine writing through an output
    /// buffer. `call` must build a [`CallType::Runtime`] call; the routine
    /// runs once per point of `shape`, so whole-buffer routines use `[1]`.
    ///
    /// [`CallType::Runtime`]: crate::ir::expr::CallType::Runtime
    pub fn extern_call<F>(name: impl Into<String>, shape: &[i64], dtype: Type, call: F) -> LowerResult<Self>
    where
        F: FnOnce(&[Expr]) -> LowerResult<Expr>,
    {
        let name = name.into();
        let axis: Vec<Var> = (0..shape.len()).map(|n| Var::index(axis_name(n))).collect();
        let axis_exprs: Vec<Expr> = axis.iter().map(Var::to_expr).collect();
        let body = call(&axis_exprs)?;
        if !body.is_runtime_call() {
            return Err(LowerError::type_error(
                TypeErrorKind::OperandMismatch,
                format!("{} must be defined by a runtime call", name),
            ));
        }
        Ok(Tensor::from_parts(name, shape.to_vec(), dtype, TensorOp::Compute { axis, body, reduce: None }))
    }

    /// A reduction using the process-wide name generator for the reduce axes.
    pub fn reduce<F>(
        name: impl Into<String>,
        shape: &[i64],
        kind: ReduceKind,
        reduce_extents: &[i64],
        body: F,
    ) -> LowerResult<Self>
    where
        F: FnOnce(&[Expr], &[Expr]) -> LowerResult<Expr>,
    {
        Tensor::reduce_with(names::global(), name, shape, kind, reduce_extents, body)
    }

    /// `T[axis] = kind over reduce axes of body(axis, reduce_axis)`.
    pub fn reduce_with<F>(
        names: &NameGenerator,
        name: impl Into<String>,
        shape: &[i64],
        kind: ReduceKind,
        reduce_extents: &[i64],
        body: F,
    ) -> LowerResult<Self>
    where
        F: FnOnce(&[Expr], &[Expr]) -> LowerResult<Expr>,
    {
        let axis: Vec<Var> = (0..shape.len()).map(|n| Var::index(axis_name(n))).collect();
        let reduce_axis: Vec<ReduceAxis> = reduce_extents
            .iter()
            .map(|&extent| ReduceAxis { var: Var::index(names.fresh("reduce_k")), extent })
            .collect();
        let axis_exprs: Vec<Expr> = axis.iter().map(Var::to_expr).collect();
        let reduce_exprs: Vec<Expr> = reduce_axis.iter().map(|r| r.var.to_expr()).collect();
        let body = body(&axis_exprs, &reduce_exprs)?;
        let dtype = body.ty();
        if dtype.is_void() || dtype.is_bool() {
            return Err(LowerError::type_error(
                TypeErrorKind::OperandMismatch,
                format!("cannot reduce a {} value", dtype),
            ));
        }
        Ok(Tensor::from_parts(
            name.into(),
            shape.to_vec(),
            dtype,
            TensorOp::Compute {
                axis,
                body,
                reduce: Some(Reduction { kind, axis: reduce_axis }),
            },
        ))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn shape(&self) -> &[i64] {
        &self.0.shape
    }

    pub fn ndim(&self) -> usize {
        self.0.shape.len()
    }

    pub fn dtype(&self) -> Type {
        self.0.dtype
    }

    pub fn op(&self) -> &TensorOp {
        &self.0.op
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.0.op, TensorOp::Placeholder)
    }

    pub fn is_compute(&self) -> bool {
        !self.is_placeholder()
    }

    pub fn same_as(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Output axis variables (empty for placeholders).
    pub fn axis(&self) -> &[Var] {
        match &self.0.op {
            TensorOp::Compute { axis, .. } => axis,
            TensorOp::Placeholder => &[],
        }
    }

    pub fn body(&self) -> Option<&Expr> {
        match &self.0.op {
            TensorOp::Compute { body, .. } => Some(body),
            TensorOp::Placeholder => None,
        }
    }

    pub fn reduction(&self) -> Option<&Reduction> {
        match &self.0.op {
            TensorOp::Compute { reduce, .. } => reduce.as_ref(),
            TensorOp::Placeholder => None,
        }
    }

    /// Iteration space of the stage: output axes followed by reduce axes.
    pub fn iteration_axes(&self) -> Vec<(Var, i64)> {
        let mut axes: Vec<(Var, i64)> = self
            .axis()
            .iter()
            .cloned()
            .zip(self.0.shape.iter().copied())
            .collect();
        if let Some(r) = self.reduction() {
            axes.extend(r.axis.iter().map(|a| (a.var.clone(), a.extent)));
        }
        axes
    }

    /// Assigned buffer name, if buffer assignment ran.
    pub fn buffer_name(&self) -> Option<&str> {
        self.0.buffer.as_deref()
    }

    /// Name of the reduced tensor when this is a synthesized init tensor.
    pub fn init_of(&self) -> Option<&str> {
        self.0.init_of.as_deref()
    }

    // ---- derived handles ----

    fn derive(&self, shape: Vec<i64>, buffer: Option<String>) -> Tensor {
        Tensor(Arc::new(TensorNode {
            name: self.0.name.clone(),
            shape,
            dtype: self.0.dtype,
            op: self.0.op.clone(),
            buffer,
            init_of: self.0.init_of.clone(),
            stage: RwLock::new(self.stage()),
        }))
    }

    /// Same tensor with a different (shrunk) shape.
    pub fn with_shape(&self, shape: Vec<i64>) -> Tensor {
        self.derive(shape, self.0.buffer.clone())
    }

    /// Same tensor bound to the named buffer.
    pub fn with_buffer(&self, buffer: impl Into<String>) -> Tensor {
        self.derive(self.0.shape.clone(), Some(buffer.into()))
    }

    /// The initialization stage of a reduction: a compute tensor named
    /// `<T>__reduce_init` filling `T`'s buffer with the combiner identity.
    pub fn reduce_init(&self) -> LowerResult<Option<Tensor>> {
        let Some(reduction) = self.reduction() else {
            return Ok(None);
        };
        let identity = reduction.kind.identity(self.dtype())?;
        let init = Tensor(Arc::new(TensorNode {
            name: format!("{}{}", self.0.name, REDUCE_INIT_SUFFIX),
            shape: self.0.shape.clone(),
            dtype: self.0.dtype,
            op: TensorOp::Compute { axis: self.axis().to_vec(), body: identity, reduce: None },
            buffer: None,
            init_of: Some(self.0.name.clone()),
            stage: RwLock::new(Stage {
                share_buffer_with: Some(self.0.name.clone()),
                ..Stage::default()
            }),
        }));
        Ok(Some(init))
    }

    // ---- expressions ----

    /// `T[indices]`
    pub fn at(&self, indices: Vec<Expr>) -> LowerResult<Expr> {
        Expr::load(self.clone(), indices)
    }

    /// Tensors read by the defining expression, in first-use order.
    pub fn reads(&self) -> Vec<Tensor> {
        match self.body() {
            Some(body) => mutate::accessed_tensors(body)
                .into_iter()
                .filter(|t| t.name() != self.name())
                .collect(),
            None => Vec::new(),
        }
    }

    /// The statement computing one element, written over the stage's own
    /// iteration variables. Reductions accumulate into the tensor itself.
    pub fn stage_statement(&self) -> LowerResult<Option<Expr>> {
        let TensorOp::Compute { axis, body, reduce } = &self.0.op else {
            return Ok(None);
        };
        let indices: Vec<Expr> = axis.iter().map(Var::to_expr).collect();
        let value = match reduce {
            Some(r) => r.kind.combine(self.at(indices.clone())?, body.clone())?,
            None => body.clone(),
        };
        Ok(Some(Expr::store(self.clone(), value, indices)?))
    }

    // ---- stage directives ----

    /// Snapshot of the stage directives.
    pub fn stage(&self) -> Stage {
        self.0
            .stage
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_stage(&self, f: impl FnOnce(&mut Stage)) {
        let mut stage = self
            .0
            .stage
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut stage);
    }

    /// Compute this tensor inside loop `level` of `consumer`.
    pub fn compute_at(&self, consumer: &Tensor, level: usize) {
        let consumer = consumer.name().to_string();
        self.update_stage(|s| s.compute_at = Some(ComputeAtSpec { consumer, level }));
    }

    pub fn vectorize(&self, level: usize, factor: usize) {
        self.update_stage(|s| s.vectorize = Some(VectorizeInfo::new(level, factor)));
    }

    pub fn unroll(&self, level: usize) {
        self.update_stage(|s| {
            s.unroll.insert(level);
        });
    }

    pub fn bind(&self, level: usize, axis: GpuAxis) {
        self.update_stage(|s| {
            s.gpu_binds.insert(level, axis);
        });
    }

    /// Substitute the definition at every use instead of materializing it.
    pub fn compute_inline(&self) {
        self.update_stage(|s| s.inlined = true);
    }

    pub fn share_buffer_with(&self, other: &Tensor) {
        let other = other.name().to_string();
        self.update_stage(|s| s.share_buffer_with = Some(other));
    }

    /// Order this tensor after `other` without a data dependence.
    pub fn ctrl_depend(&self, other: &Tensor) {
        let other = other.name().to_string();
        self.update_stage(|s| {
            s.extra_depends.insert(other);
        });
    }

    pub fn is_inlined(&self) -> bool {
        self.stage().inlined
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::ExprNode;

    fn matmul() -> (Tensor, Tensor, Tensor) {
        let a = Tensor::placeholder("A", &[4, 8], Type::float(32));
        let b = Tensor::placeholder("B", &[8, 6], Type::float(32));
        let names = NameGenerator::new();
        let c = Tensor::reduce_with(&names, "C", &[4, 6], ReduceKind::Sum, &[8], |ax, rk| {
            let lhs = a.at(vec![ax[0].clone(), rk[0].clone()])?;
            let rhs = b.at(vec![rk[0].clone(), ax[1].clone()])?;
            Expr::mul(lhs, rhs)
        })
        .unwrap();
        (a, b, c)
    }

    #[test]
    fn test_compute_reads() {
        let a = Tensor::placeholder("A", &[10], Type::float(32));
        let b = Tensor::compute("B", &[10], |ax| Expr::add(a.at(vec![ax[0].clone()])?, Expr::float(1.0)))
            .unwrap();
        assert_eq!(b.dtype(), Type::float(32));
        let reads = b.reads();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].name(), "A");
    }

    #[test]
    fn test_reduction_axes_and_init() {
        let (_, _, c) = matmul();
        let axes = c.iteration_axes();
        assert_eq!(axes.len(), 3);
        assert_eq!(axes[2].0.name(), "reduce_k_0");
        assert_eq!(axes[2].1, 8);

        let init = c.reduce_init().unwrap().unwrap();
        assert_eq!(init.name(), "C__reduce_init");
        assert_eq!(init.init_of(), Some("C"));
        assert_eq!(init.stage().share_buffer_with.as_deref(), Some("C"));
        assert!(init.reduction().is_none());
    }

    #[test]
    fn test_reduction_statement_accumulates() {
        let (_, _, c) = matmul();
        let stmt = c.stage_statement().unwrap().unwrap();
        match stmt.node() {
            ExprNode::Store { tensor, value, indices } => {
                assert_eq!(tensor.name(), "C");
                assert_eq!(indices.len(), 2);
                assert!(matches!(value.node(), ExprNode::Binary { .. }));
            }
            other => panic!("expected store, got {:?}", other),
        }
        // the accumulator read of C itself is not a dependency
        let names: Vec<_> = c.reads().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_stage_directives() {
        let a = Tensor::placeholder("A", &[10, 10], Type::float(32));
        let b = Tensor::compute("B", &[10, 10], |ax| a.at(ax.to_vec())).unwrap();
        b.vectorize(1, 4);
        b.unroll(0);
        b.bind(0, GpuAxis::BlockX);
        b.ctrl_depend(&a);
        let stage = b.stage();
        assert_eq!(stage.vectorize, Some(VectorizeInfo::new(1, 4)));
        assert!(stage.unroll.contains(&0));
        assert_eq!(stage.gpu_binds.get(&0), Some(&GpuAxis::BlockX));
        assert!(stage.extra_depends.contains("A"));

        let shrunk = b.with_shape(vec![1, 10]);
        assert_eq!(shrunk.shape(), &[1, 10]);
        assert_eq!(shrunk.stage(), stage);
        assert_ne!(shrunk, b);
    }

    #[test]
    fn test_access_rank_checked() {
        let a = Tensor::placeholder("A", &[10, 10], Type::float(32));
        let err = a.at(vec![Expr::int(0)]).unwrap_err();
        assert_eq!(err.type_kind(), Some(TypeErrorKind::ShapeMismatch));
    }

    #[test]
    fn test_extern_call_tensor() {
        let a = Tensor::placeholder("A", &[16], Type::float(32));
        let out = Tensor::extern_call("Out", &[1], Type::float(32), |_| {
            Ok(Expr::runtime_call("softmax", vec![Expr::buffer_ref(&a)]))
        })
        .unwrap();
        assert_eq!(out.dtype(), Type::float(32));
        assert_eq!(out.reads().len(), 1);
        let stmt = out.stage_statement().unwrap().unwrap();
        assert_eq!(stmt.to_string(), "Out[i] = softmax(A)");

        let err = Tensor::extern_call("Bad", &[1], Type::float(32), |_| Ok(Expr::float(0.0))).unwrap_err();
        assert_eq!(err.type_kind(), Some(TypeErrorKind::OperandMismatch));
    }
}
