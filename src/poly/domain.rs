//! Iteration domains of stages.
//!
//! Every stage iterates a rectangular box: one dimension per output axis
//! followed by one per reduction axis, each from 0 to a constant extent.

use crate::ir::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One dimension of an iteration domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dim {
    /// Name of the stage variable iterating this dimension
    pub iterator: String,
    /// Number of iterations
    pub extent: i64,
}

/// Iteration domain `{ tuple[iterators] : 0 <= iterator < extent }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Statement tuple name (the tensor name)
    pub tuple: String,
    pub dims: Vec<Dim>,
}

impl Domain {
    pub fn new(tuple: impl Into<String>, dims: Vec<Dim>) -> Self {
        Self { tuple: tuple.into(), dims }
    }

    /// Domain of the stage computing `tensor`.
    pub fn from_tensor(tensor: &Tensor) -> Self {
        let dims = tensor
            .iteration_axes()
            .into_iter()
            .map(|(var, extent)| Dim { iterator: var.name, extent })
            .collect();
        Self::new(tensor.name(), dims)
    }

    pub fn n_dim(&self) -> usize {
        self.dims.len()
    }

    pub fn extent(&self, dim: usize) -> Option<i64> {
        self.dims.get(dim).map(|d| d.extent)
    }

    pub fn iterators(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.iterator.as_str()).collect()
    }

    /// Whether the domain has no points.
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|d| d.extent <= 0)
    }

    /// Number of statement instances.
    pub fn cardinality(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        self.dims.iter().map(|d| d.extent).product()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ {}[{}]", self.tuple, self.iterators().join(", "))?;
        if !self.dims.is_empty() {
            let constraints: Vec<String> = self
                .dims
                .iter()
                .map(|d| format!("0 <= {} <= {}", d.iterator, d.extent - 1))
                .collect();
            write!(f, " : {}", constraints.join(" and "))?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;

    #[test]
    fn test_domain_from_tensor() {
        let a = Tensor::placeholder("A", &[4, 5], Type::float(32));
        let b = Tensor::compute("B", &[4, 5], |ax| a.at(ax.to_vec())).unwrap();
        let d = Domain::from_tensor(&b);
        assert_eq!(d.n_dim(), 2);
        assert_eq!(d.iterators(), vec!["i", "j"]);
        assert_eq!(d.cardinality(), 20);
        assert_eq!(d.to_string(), "{ B[i, j] : 0 <= i <= 3 and 0 <= j <= 4 }");
    }

    #[test]
    fn test_empty_domain() {
        let d = Domain::new("S", vec![Dim { iterator: "i".into(), extent: 0 }]);
        assert!(d.is_empty());
        assert_eq!(d.cardinality(), 0);
        let scalar = Domain::new("S", vec![]);
        assert_eq!(scalar.cardinality(), 1);
        assert_eq!(scalar.to_string(), "{ S[] }");
    }
}
