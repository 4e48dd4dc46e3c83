//! Function assembly.
//!
//! Drives one lowering invocation: argument checks, computation graph,
//! schedule groups, per-group lowering, the pass pipeline, and finally the
//! argument list and local buffers of the resulting function.

use crate::analysis::graph::{create_comp_graph, CompGraph};
use crate::ir::expr::{Expr, Var};
use crate::ir::function::{ArgIo, Argument, Buffer, LoweredFunc};
use crate::ir::mutate;
use crate::ir::tensor::Tensor;
use crate::lower::group::lower_group;
use crate::poly::schedule::{Schedule, Scheduler};
use crate::transform::{PassContext, Pipeline};
use crate::utils::errors::{ConfigErrorKind, LowerError, LowerResult};
use crate::LowerOptions;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// One lowering invocation.
pub struct LowerImpl {
    fn_name: String,
    tensor_args: Vec<Tensor>,
    scalar_args: Vec<Var>,
    temp_tensors: Vec<Tensor>,
    options: LowerOptions,
}

impl LowerImpl {
    /// Validate the arguments of function `fn_name`.
    ///
    /// Fails before any lowering work if two arguments share a name (tensor
    /// and scalar arguments together) or if an argument is marked inline.
    pub fn new(
        fn_name: impl Into<String>,
        tensor_args: &[Tensor],
        scalar_args: &[Var],
        temp_tensors: &[Tensor],
        options: LowerOptions,
    ) -> LowerResult<Self> {
        let lower = Self {
            fn_name: fn_name.into(),
            tensor_args: tensor_args.to_vec(),
            scalar_args: scalar_args.to_vec(),
            temp_tensors: temp_tensors.to_vec(),
            options,
        };
        lower.check_args_unique()?;
        if let Some(t) = lower.tensor_args.iter().find(|t| t.is_inlined()) {
            return Err(LowerError::config_for(
                ConfigErrorKind::InvalidInline,
                t.name(),
                "a function argument must be materialized",
            ));
        }
        Ok(lower)
    }

    fn check_args_unique(&self) -> LowerResult<()> {
        let mut seen = HashSet::new();
        let names = self
            .tensor_args
            .iter()
            .map(Tensor::name)
            .chain(self.scalar_args.iter().map(Var::name));
        for name in names {
            if !seen.insert(name) {
                return Err(LowerError::config(
                    ConfigErrorKind::DuplicateArgument,
                    format!("argument {} of function {} is declared twice", name, self.fn_name),
                ));
            }
        }
        Ok(())
    }

    fn argument_names(&self) -> HashSet<&str> {
        self.tensor_args.iter().map(Tensor::name).collect()
    }

    /// Computation graph over the arguments and explicit temporaries.
    pub fn comp_graph(&self) -> LowerResult<CompGraph> {
        let tensors: Vec<Tensor> = self.tensor_args.iter().chain(&self.temp_tensors).cloned().collect();
        create_comp_graph(&tensors, self.options.hide_inline)
    }

    /// Tensors of the graph that are neither arguments, inlined, nor
    /// synthesized stages, in topological order.
    pub fn temporary_tensors(&self) -> LowerResult<Vec<Tensor>> {
        let graph = self.comp_graph()?;
        Ok(collect_temporaries(&graph, &self.argument_names()))
    }

    pub fn schedule(&self, graph: &CompGraph) -> LowerResult<Schedule> {
        Scheduler::new(graph).with_arguments(self.argument_names()).schedule()
    }

    /// Lower to one function.
    pub fn lower(&self) -> LowerResult<LoweredFunc> {
        let graph = self.comp_graph()?;
        info!("computation graph of {}:\n{}", self.fn_name, graph.to_dot());
        debug!("temporaries of {}: {:?}", self.fn_name, collect_temporaries(&graph, &self.argument_names()));

        let schedule = self.schedule(&graph)?;
        let (body, tensor_map) = self.generate_function_body(&graph, &schedule)?;

        let mut ctx = PassContext::new(self.options.target)
            .with_compute_ats(schedule.compute_ats().into_iter().cloned().collect());
        for tensor in tensor_map.values() {
            ctx.add_tensor(tensor);
        }
        let pipeline = match &self.options.passes {
            Some(kinds) => Pipeline::new(kinds),
            None => Pipeline::default(),
        };
        let result = pipeline.run(&body, &mut ctx)?;
        debug!("passes applied to {}: [{}]", self.fn_name, result.applied_passes.join(", "));

        let args = self.generate_function_argument_list(&result.body);
        let temp_buffers = collect_temp_buffers(&result.body, &args);
        Ok(LoweredFunc {
            name: self.fn_name.clone(),
            args,
            body: result.body,
            temp_buffers,
            gpu_grid_dims: ctx.grid_dims(),
            gpu_block_dims: ctx.block_dims(),
        })
    }

    /// Lower every schedule group and concatenate the results.
    fn generate_function_body(
        &self,
        graph: &CompGraph,
        schedule: &Schedule,
    ) -> LowerResult<(Expr, BTreeMap<String, Tensor>)> {
        let mut tuple_to_expr = HashMap::new();
        let mut tensor_map = BTreeMap::new();
        for node in graph.nodes() {
            let tensor = &node.tensor;
            if let Some(stmt) = tensor.stage_statement()? {
                tuple_to_expr.insert(tensor.name().to_string(), stmt);
            }
            tensor_map.insert(tensor.name().to_string(), tensor.clone());
        }

        let mut bodies = Vec::with_capacity(schedule.groups.len());
        for group in &schedule.groups {
            bodies.push(lower_group(group, &tuple_to_expr, &mut tensor_map)?);
        }
        Ok((Expr::block(bodies), tensor_map))
    }

    /// Scalars first, then tensors, both in declaration order. A tensor whose
    /// buffer is written anywhere in `body` is an output.
    pub fn generate_function_argument_list(&self, body: &Expr) -> Vec<Argument> {
        let written = mutate::written_tensors(body);
        let accessed = mutate::accessed_tensors(body);
        let written_buffers: HashSet<&str> = written.iter().map(storage_name).collect();

        let mut args: Vec<Argument> = self.scalar_args.iter().map(Argument::scalar).collect();
        for tensor in &self.tensor_args {
            let buffer = written
                .iter()
                .chain(&accessed)
                .find(|t| t.name() == tensor.name())
                .map(storage_name)
                .unwrap_or_else(|| tensor.name());
            let io = if written_buffers.contains(buffer) { ArgIo::Output } else { ArgIo::Input };
            let buffer = Buffer {
                name: buffer.to_string(),
                dtype: tensor.dtype(),
                shape: tensor.shape().to_vec(),
            };
            args.push(Argument::buffer(tensor.name(), buffer, io));
        }
        args
    }
}

/// Name of the storage backing `tensor` in a lowered body.
fn storage_name(tensor: &Tensor) -> &str {
    tensor.buffer_name().unwrap_or_else(|| tensor.name())
}

fn collect_temporaries(graph: &CompGraph, arguments: &HashSet<&str>) -> Vec<Tensor> {
    graph
        .nodes()
        .iter()
        .filter(|n| !n.synthetic && !arguments.contains(n.tensor.name()) && !n.tensor.is_inlined())
        .map(|n| n.tensor.clone())
        .collect()
}

/// Local buffers: every storage in `body` not passed as an argument. A
/// buffer shared by several tensors is sized to cover all of them.
fn collect_temp_buffers(body: &Expr, args: &[Argument]) -> Vec<Buffer> {
    let arg_buffers: BTreeSet<String> = args.iter().filter(|a| a.is_buffer()).map(|a| a.to_string()).collect();
    let mut buffers: BTreeMap<String, Buffer> = BTreeMap::new();
    let tensors = mutate::written_tensors(body).into_iter().chain(mutate::accessed_tensors(body));
    for tensor in tensors {
        let name = storage_name(&tensor);
        if arg_buffers.contains(name) {
            continue;
        }
        let buffer = buffers.entry(name.to_string()).or_insert_with(|| Buffer {
            name: name.to_string(),
            dtype: tensor.dtype(),
            shape: Vec::new(),
        });
        if buffer.shape.len() < tensor.ndim() {
            buffer.shape.resize(tensor.ndim(), 0);
        }
        for (extent, &dim) in buffer.shape.iter_mut().zip(tensor.shape()) {
            *extent = (*extent).max(dim);
        }
    }
    buffers.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;

    fn chain() -> (Tensor, Tensor, Tensor) {
        let a = Tensor::placeholder("A", &[8], Type::float(32));
        let b = Tensor::compute("B", &[8], |ax| Expr::mul(a.at(ax.to_vec())?, Expr::float(2.0))).unwrap();
        let c = Tensor::compute("C", &[8], |ax| Expr::add(b.at(ax.to_vec())?, Expr::float(1.0))).unwrap();
        (a, b, c)
    }

    #[test]
    fn test_duplicate_across_lists() {
        let (a, _, _) = chain();
        let x = Var::new("A", Type::int(32));
        let err = LowerImpl::new("f", &[a], &[x], &[], LowerOptions::default()).err().unwrap();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::DuplicateArgument));
    }

    #[test]
    fn test_inlined_argument_rejected() {
        let (a, _, c) = chain();
        c.compute_inline();
        let err = LowerImpl::new("f", &[a, c], &[], &[], LowerOptions::default()).err().unwrap();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidInline));
    }

    #[test]
    fn test_temporaries() {
        let (a, _, c) = chain();
        let lower = LowerImpl::new("f", &[a, c], &[], &[], LowerOptions::default()).unwrap();
        let temps: Vec<String> = lower.temporary_tensors().unwrap().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(temps, vec!["B"]);
    }

    #[test]
    fn test_lower_chain() {
        let (a, _, c) = chain();
        let f = LowerImpl::new("f", &[a, c], &[], &[], LowerOptions::default()).unwrap().lower().unwrap();
        assert_eq!(f.arg_names(), vec!["A", "C"]);
        assert!(!f.args[0].is_output());
        assert!(f.args[1].is_output());
        assert_eq!(f.temp_buffers.len(), 1);
        assert_eq!(f.temp_buffers[0].name, "_B");
        assert_eq!(
            f.body.to_string(),
            "{\n  for (c0, 0, 8)\n  {\n    _B[c0] = (_A[c0] * 2.0)\n  }\n  for (c0, 0, 8)\n  {\n    _C[c0] = (_B[c0] + 1.0)\n  }\n}"
        );
    }
}
