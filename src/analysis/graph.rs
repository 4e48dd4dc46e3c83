//! Computation graph over tensors.
//!
//! Nodes wrap tensors, keyed by name in discovery order. An edge `A -> B`
//! means B's computation must run after A's: either B reads A (a data
//! edge) or B's stage declares an extra dependency on A (a control edge).
//! The graph is the closure of the requested tensors under both relations
//! and must be acyclic.

use crate::ir::tensor::Tensor;
use crate::utils::errors::{ConfigErrorKind, InternalErrorKind, LowerError, LowerResult};
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Why one node is ordered before another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeKind {
    /// The consumer reads the producer
    Data,
    /// Ordering declared through a stage's extra dependencies
    Control,
}

/// A node of the computation graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub tensor: Tensor,
    /// Synthesized by lowering (reduction init stages)
    pub synthetic: bool,
}

/// Directed acyclic dependency graph of the tensors of one function.
#[derive(Debug, Clone, Default)]
pub struct CompGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    edges: BTreeMap<(usize, usize), EdgeKind>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    topo_order: Vec<usize>,
}

/// Build the computation graph rooted at `tensors`.
///
/// With `hide_inline`, inlined tensors are dropped from the node set and
/// their readers are connected directly to their producers.
pub fn create_comp_graph(tensors: &[Tensor], hide_inline: bool) -> LowerResult<CompGraph> {
    GraphBuilder::new(tensors)?.build(hide_inline)
}

struct GraphBuilder<'a> {
    requested: &'a [Tensor],
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    /// (producer name, consumer name, kind)
    pending_edges: Vec<(String, String, EdgeKind)>,
}

impl<'a> GraphBuilder<'a> {
    fn new(requested: &'a [Tensor]) -> LowerResult<Self> {
        for (i, t) in requested.iter().enumerate() {
            if requested[..i].iter().any(|other| other.same_as(t)) {
                return Err(LowerError::config_for(
                    ConfigErrorKind::DuplicateTensor,
                    t.name(),
                    "tensor passed twice to the computation graph",
                ));
            }
        }
        Ok(Self { requested, nodes: Vec::new(), index: HashMap::new(), pending_edges: Vec::new() })
    }

    /// Register `tensor`; returns whether its dependencies still need scanning.
    fn register(&mut self, tensor: &Tensor, synthetic: bool) -> bool {
        match self.index.get(tensor.name()) {
            Some(&i) => {
                if self.nodes[i].tensor.is_placeholder() && tensor.is_compute() {
                    self.nodes[i].tensor = tensor.clone();
                    return true;
                }
                false
            }
            None => {
                self.index.insert(tensor.name().to_string(), self.nodes.len());
                self.nodes.push(GraphNode { tensor: tensor.clone(), synthetic });
                true
            }
        }
    }

    fn discover(&mut self) -> LowerResult<()> {
        let mut queue: VecDeque<(Tensor, bool)> =
            self.requested.iter().map(|t| (t.clone(), false)).collect();

        while let Some((tensor, synthetic)) = queue.pop_front() {
            if !self.register(&tensor, synthetic) {
                continue;
            }
            for read in tensor.reads() {
                self.pending_edges.push((read.name().to_string(), tensor.name().to_string(), EdgeKind::Data));
                queue.push_back((read, false));
            }
            if let Some(init) = tensor.reduce_init()? {
                self.pending_edges.push((init.name().to_string(), tensor.name().to_string(), EdgeKind::Data));
                queue.push_back((init, true));
            }
            for dep in tensor.stage().extra_depends {
                self.pending_edges.push((dep, tensor.name().to_string(), EdgeKind::Control));
            }
        }
        Ok(())
    }

    fn check_dangling(&self) -> LowerResult<()> {
        let requested: HashSet<&str> = self.requested.iter().map(|t| t.name()).collect();
        for node in &self.nodes {
            if node.tensor.is_placeholder() && !requested.contains(node.tensor.name()) {
                return Err(LowerError::internal(
                    InternalErrorKind::DanglingTensor,
                    format!(
                        "tensor {} is read but neither defined nor passed to the function",
                        node.tensor.name()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn build(mut self, hide_inline: bool) -> LowerResult<CompGraph> {
        self.discover()?;
        self.check_dangling()?;

        let mut edges: BTreeMap<(usize, usize), EdgeKind> = BTreeMap::new();
        for (from, to, kind) in &self.pending_edges {
            let Some(&src) = self.index.get(from) else {
                return Err(LowerError::internal(
                    InternalErrorKind::DanglingTensor,
                    format!("tensor {} depends on unknown tensor {}", to, from),
                ));
            };
            let dst = self.index[to];
            let entry = edges.entry((src, dst)).or_insert(*kind);
            *entry = (*entry).min(*kind);
        }

        let (nodes, edges) = if hide_inline {
            fuse_inlined(self.nodes, edges)
        } else {
            (self.nodes, edges)
        };
        CompGraph::from_parts(nodes, edges)
    }
}

/// Remove inlined nodes, connecting their producers to their readers.
fn fuse_inlined(
    nodes: Vec<GraphNode>,
    mut edges: BTreeMap<(usize, usize), EdgeKind>,
) -> (Vec<GraphNode>, BTreeMap<(usize, usize), EdgeKind>) {
    let hidden: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].tensor.is_inlined()).collect();
    for &h in &hidden {
        let preds: Vec<(usize, EdgeKind)> =
            edges.iter().filter(|((_, d), _)| *d == h).map(|((s, _), k)| (*s, *k)).collect();
        let succs: Vec<(usize, EdgeKind)> =
            edges.iter().filter(|((s, _), _)| *s == h).map(|((_, d), k)| (*d, *k)).collect();
        edges.retain(|(s, d), _| *s != h && *d != h);
        for &(p, pk) in &preds {
            for &(s, sk) in &succs {
                if p != s {
                    let entry = edges.entry((p, s)).or_insert(pk.max(sk));
                    *entry = (*entry).min(pk.max(sk));
                }
            }
        }
        debug!("hid inlined tensor {} from the computation graph", nodes[h].tensor.name());
    }

    let hidden: HashSet<usize> = hidden.into_iter().collect();
    let mut remap = HashMap::new();
    let mut kept = Vec::new();
    for (i, node) in nodes.into_iter().enumerate() {
        if !hidden.contains(&i) {
            remap.insert(i, kept.len());
            kept.push(node);
        }
    }
    let edges = edges
        .into_iter()
        .map(|((s, d), k)| ((remap[&s], remap[&d]), k))
        .collect();
    (kept, edges)
}

impl CompGraph {
    fn from_parts(nodes: Vec<GraphNode>, edges: BTreeMap<(usize, usize), EdgeKind>) -> LowerResult<Self> {
        let n = nodes.len();
        let mut successors = vec![Vec::new(); n];
        let mut predecessors = vec![Vec::new(); n];
        for &(s, d) in edges.keys() {
            successors[s].push(d);
            predecessors[d].push(s);
        }
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.tensor.name().to_string(), i))
            .collect();
        let mut graph = Self { nodes, index, edges, successors, predecessors, topo_order: Vec::new() };
        graph.topo_order = graph.topological_sort()?;
        Ok(graph)
    }

    /// Kahn's algorithm, always releasing the earliest-discovered ready node.
    fn topological_sort(&self) -> LowerResult<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(v) = ready.pop_first() {
            order.push(v);
            for &w in &self.successors[v] {
                in_degree[w] -= 1;
                if in_degree[w] == 0 {
                    ready.insert(w);
                }
            }
        }

        if order.len() == self.nodes.len() {
            return Ok(order);
        }
        let cycle = self
            .strongly_connected_components()
            .into_iter()
            .find(|scc| scc.len() > 1 || self.successors[scc[0]].contains(&scc[0]))
            .unwrap_or_default();
        let names: Vec<&str> = cycle.iter().map(|&i| self.nodes[i].tensor.name()).collect();
        Err(LowerError::internal(
            InternalErrorKind::CyclicGraph,
            format!("computation graph has a cycle through {}", names.join(", ")),
        ))
    }

    /// Strongly connected components (Tarjan).
    fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        struct Tarjan<'g> {
            graph: &'g CompGraph,
            counter: usize,
            stack: Vec<usize>,
            indices: Vec<Option<usize>>,
            lowlinks: Vec<usize>,
            on_stack: Vec<bool>,
            sccs: Vec<Vec<usize>>,
        }

        impl Tarjan<'_> {
            fn strongconnect(&mut self, v: usize) {
                self.indices[v] = Some(self.counter);
                self.lowlinks[v] = self.counter;
                self.counter += 1;
                self.stack.push(v);
                self.on_stack[v] = true;

                for &w in &self.graph.successors[v] {
                    match self.indices[w] {
                        None => {
                            self.strongconnect(w);
                            self.lowlinks[v] = self.lowlinks[v].min(self.lowlinks[w]);
                        }
                        Some(index_w) if self.on_stack[w] => {
                            self.lowlinks[v] = self.lowlinks[v].min(index_w);
                        }
                        Some(_) => {}
                    }
                }

                if Some(self.lowlinks[v]) == self.indices[v] {
                    let mut scc = Vec::new();
                    while let Some(w) = self.stack.pop() {
                        self.on_stack[w] = false;
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    scc.reverse();
                    self.sccs.push(scc);
                }
            }
        }

        let n = self.nodes.len();
        let mut tarjan = Tarjan {
            graph: self,
            counter: 0,
            stack: Vec::new(),
            indices: vec![None; n],
            lowlinks: vec![0; n],
            on_stack: vec![false; n],
            sccs: Vec::new(),
        };
        for v in 0..n {
            if tarjan.indices[v].is_none() {
                tarjan.strongconnect(v);
            }
        }
        tarjan.sccs
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn tensor(&self, name: &str) -> Option<&Tensor> {
        self.index.get(name).map(|&i| &self.nodes[i].tensor)
    }

    pub fn tensor_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.tensor.name()).collect()
    }

    /// Tensors that must run after `name`.
    pub fn successors(&self, name: &str) -> Vec<&Tensor> {
        self.index
            .get(name)
            .map(|&i| self.successors[i].iter().map(|&s| &self.nodes[s].tensor).collect())
            .unwrap_or_default()
    }

    /// Tensors that must run before `name`.
    pub fn predecessors(&self, name: &str) -> Vec<&Tensor> {
        self.index
            .get(name)
            .map(|&i| self.predecessors[i].iter().map(|&p| &self.nodes[p].tensor).collect())
            .unwrap_or_default()
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&s), Some(&d)) => self.edges.contains_key(&(s, d)),
            _ => false,
        }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Producer-before-consumer order; ties broken by discovery order.
    pub fn topological_order(&self) -> Vec<&Tensor> {
        self.topo_order.iter().map(|&i| &self.nodes[i].tensor).collect()
    }

    /// Position of `name` in the topological order.
    pub fn topo_position(&self, name: &str) -> Option<usize> {
        let i = *self.index.get(name)?;
        self.topo_order.iter().position(|&v| v == i)
    }

    /// Graphviz rendering of the graph.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph G {\n");
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box];\n\n");

        for (i, node) in self.nodes.iter().enumerate() {
            let t = &node.tensor;
            let shape = if t.is_placeholder() { ", shape=ellipse" } else { "" };
            let style = if node.synthetic { ", style=dashed" } else { "" };
            dot.push_str(&format!(
                "  n{} [label=\"{}\\n{:?} {}\"{}{}];\n",
                i,
                t.name(),
                t.shape(),
                t.dtype(),
                shape,
                style
            ));
        }
        dot.push('\n');
        for (&(s, d), kind) in &self.edges {
            match kind {
                EdgeKind::Data => dot.push_str(&format!("  n{} -> n{};\n", s, d)),
                EdgeKind::Control => dot.push_str(&format!("  n{} -> n{} [style=dashed];\n", s, d)),
            }
        }
        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Expr;
    use crate::ir::tensor::ReduceKind;
    use crate::ir::types::Type;
    use crate::utils::names::NameGenerator;

    fn chain() -> (Tensor, Tensor, Tensor) {
        let a = Tensor::placeholder("A", &[10], Type::float(32));
        let b = Tensor::compute("B", &[10], |ax| Expr::add(a.at(vec![ax[0].clone()])?, Expr::float(1.0))).unwrap();
        let c = Tensor::compute("C", &[10], |ax| Expr::mul(b.at(vec![ax[0].clone()])?, Expr::float(2.0))).unwrap();
        (a, b, c)
    }

    #[test]
    fn test_closure_and_order() {
        let (a, _, c) = chain();
        let g = create_comp_graph(&[a, c], false).unwrap();
        assert_eq!(g.len(), 3);
        let order: Vec<_> = g.topological_order().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert!(g.has_edge("A", "B"));
        assert!(g.has_edge("B", "C"));
        assert_eq!(g.successors("B").len(), 1);
    }

    #[test]
    fn test_dangling_placeholder() {
        let (_, _, c) = chain();
        let err = create_comp_graph(&[c], false).unwrap_err();
        assert_eq!(err.internal_kind(), Some(InternalErrorKind::DanglingTensor));
    }

    #[test]
    fn test_duplicate_handle() {
        let (a, _, c) = chain();
        let err = create_comp_graph(&[a.clone(), c, a], false).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::DuplicateTensor));
    }

    #[test]
    fn test_hide_inline_fuses_edges() {
        let (a, b, c) = chain();
        b.compute_inline();
        let g = create_comp_graph(&[a.clone(), c.clone()], true).unwrap();
        assert_eq!(g.tensor_names(), vec!["A", "C"]);
        assert!(g.has_edge("A", "C"));

        let g = create_comp_graph(&[a, c], false).unwrap();
        assert!(g.contains("B"));
    }

    #[test]
    fn test_cycle_rejected() {
        let fake_b = Tensor::placeholder("B", &[4], Type::float(32));
        let a = Tensor::compute("A", &[4], |ax| fake_b.at(vec![ax[0].clone()])).unwrap();
        let b = Tensor::compute("B", &[4], |ax| a.at(vec![ax[0].clone()])).unwrap();
        let err = create_comp_graph(&[a, b], false).unwrap_err();
        assert_eq!(err.internal_kind(), Some(InternalErrorKind::CyclicGraph));
        assert!(err.to_string().contains("A"));
    }

    #[test]
    fn test_extra_dependency() {
        let (a, _, c) = chain();
        let d = Tensor::compute("D", &[10], |ax| a.at(vec![ax[0].clone()])).unwrap();
        d.ctrl_depend(&c);
        let g = create_comp_graph(&[a, c, d], false).unwrap();
        assert!(g.has_edge("C", "D"));
        assert!(g.to_dot().contains("[style=dashed]"));

        let (a, _, c) = chain();
        c.ctrl_depend(&Tensor::placeholder("Z", &[1], Type::float(32)));
        let err = create_comp_graph(&[a, c], false).unwrap_err();
        assert_eq!(err.internal_kind(), Some(InternalErrorKind::DanglingTensor));
    }

    #[test]
    fn test_reduction_init_node() {
        let a = Tensor::placeholder("A", &[4, 8], Type::float(32));
        let names = NameGenerator::new();
        let s = Tensor::reduce_with(&names, "S", &[4], ReduceKind::Sum, &[8], |ax, rk| {
            a.at(vec![ax[0].clone(), rk[0].clone()])
        })
        .unwrap();
        let g = create_comp_graph(&[a, s], false).unwrap();
        assert!(g.contains("S__reduce_init"));
        assert!(g.has_edge("S__reduce_init", "S"));
        assert!(g.nodes().iter().any(|n| n.synthetic));
    }

    #[test]
    fn test_to_dot() {
        let (a, _, c) = chain();
        let dot = create_comp_graph(&[a, c], false).unwrap().to_dot();
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("n0 -> n1;"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
