//! Stage declarations and schedule groups.
//!
//! The scheduler turns the computation graph plus the stage directives into
//! schedule groups. A group is one root stage together with every stage
//! attached to it: producers fused with compute-at and reduction init
//! stages. Groups are emitted in topological order of their roots.
//!
//! Loop iterators of generated nests are named by absolute nesting depth
//! (`c0`, `c1`, ...), so a stage attached at depth `k` continues numbering
//! where its host's enclosing loops stop.

use crate::analysis::graph::CompGraph;
use crate::ir::expr::{Expr, ExprNode};
use crate::ir::mutate;
use crate::ir::tensor::Tensor;
use crate::poly::affine::AffineForm;
use crate::poly::domain::Domain;
use crate::transform::inline::inline_loads;
use crate::utils::errors::{ConfigErrorKind, InternalErrorKind, LowerError, LowerResult};
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Name of the generated loop iterator at absolute `depth`.
pub fn iterator_name(depth: usize) -> String {
    format!("c{}", depth)
}

/// Range of a producer dimension live inside one iteration of the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWindow {
    /// The whole extent is needed
    Full,
    /// `consumer_axis[level] + lo ..= consumer_axis[level] + hi`
    Relative { level: usize, lo: i64, hi: i64 },
}

impl AccessWindow {
    /// Number of elements the window covers within `extent`.
    pub fn size(&self, extent: i64) -> i64 {
        match self {
            AccessWindow::Full => extent,
            AccessWindow::Relative { lo, hi, .. } => (hi - lo + 1).min(extent),
        }
    }
}

/// A resolved compute-at attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeAtInfo {
    pub producer: String,
    pub consumer: String,
    pub level: usize,
    /// Absolute depth of the consumer's outermost loop
    pub consumer_base: usize,
    /// One window per producer output axis
    pub windows: Vec<AccessWindow>,
    /// Producer shape before shrinking
    pub producer_shape: Vec<i64>,
}

impl ComputeAtInfo {
    /// Buffer shape the producer needs inside the fused scope.
    pub fn shrunk_shape(&self) -> Vec<i64> {
        self.windows
            .iter()
            .zip(&self.producer_shape)
            .map(|(w, &extent)| w.size(extent))
            .collect()
    }

    /// Generated iterator of the consumer's loop at `level`.
    pub fn consumer_iterator(&self, level: usize) -> String {
        iterator_name(self.consumer_base + level)
    }

    /// First index of producer dimension `dim` live in the current
    /// consumer iteration, or `None` when the dimension is kept whole.
    pub fn origin(&self, dim: usize) -> Option<AffineForm> {
        match self.windows.get(dim)? {
            AccessWindow::Full => None,
            AccessWindow::Relative { level, lo, .. } => {
                Some(AffineForm::var(self.consumer_iterator(*level)) + AffineForm::constant(*lo))
            }
        }
    }
}

/// Where a stage's loop nest is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attach {
    /// Top level of its own group
    Root,
    /// Inside loop `level` of another stage
    ComputeAt(ComputeAtInfo),
    /// Reduction init: inside the target's output loops, before its reduce loops
    Init { target: String },
}

/// One stage handed to loop-nest generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDecl {
    pub domain: Domain,
    /// Number of leading domain dimensions that are output axes
    pub n_output: usize,
    pub attach: Attach,
    /// Absolute depth of the stage's outermost loop
    pub base_depth: usize,
}

impl StageDecl {
    pub fn tuple(&self) -> &str {
        &self.domain.tuple
    }

    /// Name of the stage this one is attached to.
    pub fn host(&self) -> Option<&str> {
        match &self.attach {
            Attach::Root => None,
            Attach::ComputeAt(info) => Some(&info.consumer),
            Attach::Init { target } => Some(target),
        }
    }

    /// Loop position inside the host's nest (number of enclosing host loops).
    pub fn position_in_host(&self, host: &StageDecl) -> usize {
        match &self.attach {
            Attach::Root => 0,
            Attach::ComputeAt(info) => info.level + 1,
            Attach::Init { .. } => host.n_output,
        }
    }
}

/// Stages scheduled together in one loop nest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleGroup {
    pub id: usize,
    pub root: String,
    /// Member stages in topological order
    pub stages: Vec<StageDecl>,
}

impl ScheduleGroup {
    pub fn stage(&self, tuple: &str) -> Option<&StageDecl> {
        self.stages.iter().find(|s| s.tuple() == tuple)
    }

    pub fn tuples(&self) -> Vec<&str> {
        self.stages.iter().map(StageDecl::tuple).collect()
    }
}

/// All schedule groups of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub groups: Vec<ScheduleGroup>,
}

impl Schedule {
    pub fn compute_ats(&self) -> Vec<&ComputeAtInfo> {
        self.groups
            .iter()
            .flat_map(|g| g.stages.iter())
            .filter_map(|s| match &s.attach {
                Attach::ComputeAt(info) => Some(info),
                _ => None,
            })
            .collect()
    }

    pub fn stage_count(&self) -> usize {
        self.groups.iter().map(|g| g.stages.len()).sum()
    }
}

/// Builds the schedule of one function from its computation graph.
pub struct Scheduler<'g> {
    graph: &'g CompGraph,
    /// Tensor arguments of the function; these cannot be fused away
    arguments: HashSet<String>,
}

impl<'g> Scheduler<'g> {
    pub fn new(graph: &'g CompGraph) -> Self {
        Self { graph, arguments: HashSet::new() }
    }

    pub fn with_arguments<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.arguments = names.into_iter().map(str::to_string).collect();
        self
    }

    pub fn schedule(&self) -> LowerResult<Schedule> {
        let order: Vec<&Tensor> = self
            .graph
            .topological_order()
            .into_iter()
            .filter(|t| t.is_compute() && !t.is_inlined())
            .collect();

        // Hosts come after their attached stages topologically, so walking
        // backwards resolves every host's depth before its guests.
        let mut decls: HashMap<String, StageDecl> = HashMap::new();
        for tensor in order.iter().rev() {
            let decl = self.declare(tensor, &decls)?;
            debug!("stage {} attached as {:?} at depth {}", decl.domain, decl.host(), decl.base_depth);
            decls.insert(tensor.name().to_string(), decl);
        }

        let mut members: BTreeMap<usize, Vec<StageDecl>> = BTreeMap::new();
        for tensor in &order {
            let Some(decl) = decls.get(tensor.name()) else { continue };
            let root = self.root_of(decl, &decls)?;
            let position = self.graph.topo_position(root).ok_or_else(|| {
                LowerError::internal(InternalErrorKind::MissingStage, format!("no stage for {}", root))
            })?;
            members.entry(position).or_default().push(decl.clone());
        }

        let groups = members
            .into_values()
            .enumerate()
            .map(|(id, stages)| {
                let root = stages
                    .iter()
                    .find(|s| s.attach == Attach::Root)
                    .map(|s| s.tuple().to_string())
                    .unwrap_or_default();
                ScheduleGroup { id, root, stages }
            })
            .collect();
        Ok(Schedule { groups })
    }

    fn root_of<'d>(&self, decl: &'d StageDecl, decls: &'d HashMap<String, StageDecl>) -> LowerResult<&'d str> {
        let mut current = decl;
        while let Some(host) = current.host() {
            current = decls.get(host).ok_or_else(|| {
                LowerError::internal(InternalErrorKind::MissingStage, format!("no stage for {}", host))
            })?;
        }
        Ok(current.tuple())
    }

    fn declare(&self, tensor: &Tensor, decls: &HashMap<String, StageDecl>) -> LowerResult<StageDecl> {
        let domain = Domain::from_tensor(tensor);
        let n_output = tensor.ndim();

        if let Some(target) = tensor.init_of() {
            let host = decls.get(target).ok_or_else(|| {
                LowerError::internal(InternalErrorKind::MissingStage, format!("no stage for reduction {}", target))
            })?;
            return Ok(StageDecl {
                domain,
                n_output,
                attach: Attach::Init { target: target.to_string() },
                base_depth: host.base_depth,
            });
        }

        match tensor.stage().compute_at {
            None => Ok(StageDecl { domain, n_output, attach: Attach::Root, base_depth: 0 }),
            Some(spec) => {
                let info = self.resolve_compute_at(tensor, &spec.consumer, spec.level, decls)?;
                let base_depth = info.consumer_base + info.level + 1;
                Ok(StageDecl { domain, n_output, attach: Attach::ComputeAt(info), base_depth })
            }
        }
    }

    fn resolve_compute_at(
        &self,
        producer: &Tensor,
        consumer_name: &str,
        level: usize,
        decls: &HashMap<String, StageDecl>,
    ) -> LowerResult<ComputeAtInfo> {
        let fail = |msg: String| LowerError::config_for(ConfigErrorKind::InvalidComputeAt, producer.name(), msg);

        if self.arguments.contains(producer.name()) {
            return Err(fail("a function argument cannot be computed at another stage".into()));
        }
        let consumer = self
            .graph
            .tensor(consumer_name)
            .filter(|c| c.is_compute())
            .ok_or_else(|| fail(format!("unknown consumer stage {}", consumer_name)))?;
        let readers: Vec<&str> = self.graph.successors(producer.name()).iter().map(|t| t.name()).collect();
        if readers != [consumer_name] {
            return Err(fail(format!(
                "producer must be read only by {}, but is read by [{}]",
                consumer_name,
                readers.join(", ")
            )));
        }
        if level >= consumer.ndim() || level >= producer.ndim() {
            return Err(fail(format!(
                "level {} is outside the loop nest ({} consumer axes, {} producer axes)",
                level,
                consumer.ndim(),
                producer.ndim()
            )));
        }
        let consumer_base = decls
            .get(consumer_name)
            .map(|d| d.base_depth)
            .ok_or_else(|| fail(format!("consumer {} has no stage", consumer_name)))?;

        Ok(ComputeAtInfo {
            producer: producer.name().to_string(),
            consumer: consumer_name.to_string(),
            level,
            consumer_base,
            windows: access_windows(producer, consumer, level)?,
            producer_shape: producer.shape().to_vec(),
        })
    }
}

/// Per producer axis, the range the consumer reads relative to one of its
/// enclosing axes (at or above `level`). Reads through inlined tensors count.
fn access_windows(producer: &Tensor, consumer: &Tensor, level: usize) -> LowerResult<Vec<AccessWindow>> {
    let consumer_axes: Vec<&str> = consumer.axis().iter().map(|v| v.name()).collect();
    let mut accesses: Vec<Vec<Expr>> = Vec::new();
    if let Some(body) = consumer.body() {
        let body = inline_loads(body)?;
        mutate::for_each(&body, &mut |e| {
            if let ExprNode::Load { tensor, indices } = e.node() {
                if tensor.name() == producer.name() {
                    accesses.push(indices.clone());
                }
            }
        });
    }

    let windows = (0..producer.ndim())
        .map(|dim| {
            let mut window: Option<(usize, i64, i64)> = None;
            for indices in &accesses {
                let Some(form) = indices.get(dim).and_then(AffineForm::from_expr) else {
                    return AccessWindow::Full;
                };
                let mut vars = form.terms.iter();
                let (Some((name, &coeff)), None) = (vars.next(), vars.next()) else {
                    return AccessWindow::Full;
                };
                let Some(axis) = consumer_axes.iter().position(|a| *a == name.as_str()) else {
                    return AccessWindow::Full;
                };
                if coeff != 1 || axis > level {
                    return AccessWindow::Full;
                }
                window = match window {
                    None => Some((axis, form.constant, form.constant)),
                    Some((a, lo, hi)) if a == axis => Some((a, lo.min(form.constant), hi.max(form.constant))),
                    Some(_) => return AccessWindow::Full,
                };
            }
            match window {
                Some((level, lo, hi)) => AccessWindow::Relative { level, lo, hi },
                None => AccessWindow::Full,
            }
        })
        .collect();
    Ok(windows)
}
