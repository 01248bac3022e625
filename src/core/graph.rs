//! Linear factor graph container
//!
//! [`GaussianFactorGraph`] holds shared [`JacobianFactor`]s in numbered slots. Removed slots
//! stay empty so slot indices remain stable, and every traversal skips them.

use crate::core::{DimensionMap, JacobianFactor, Key, VectorValues};
use crate::linalg::LinAlgResult;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Statistics about a linear factor graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorGraphStatistics {
    pub num_variables: usize,
    pub num_factors: usize,
    pub num_empty_slots: usize,
    pub total_variable_dimension: usize,
    pub total_residual_dimension: usize,
}

impl fmt::Display for FactorGraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GaussianFactorGraph Statistics:\n\
             Variables: {} (dimension: {})\n\
             Factors: {} (empty slots: {})\n\
             Residual dimension: {}",
            self.num_variables,
            self.total_variable_dimension,
            self.num_factors,
            self.num_empty_slots,
            self.total_residual_dimension
        )
    }
}

/// Ordered collection of linear factors.
///
/// Slots may be empty (e.g. after a factor was removed by the caller); empty slots are
/// skipped everywhere and never treated as errors.
#[derive(Debug, Clone, Default)]
pub struct GaussianFactorGraph {
    factors: Vec<Option<Arc<JacobianFactor>>>,
}

impl GaussianFactorGraph {
    /// Creates a new, empty factor graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factor and return its slot index
    pub fn add(&mut self, factor: JacobianFactor) -> usize {
        self.add_shared(Arc::new(factor))
    }

    /// Append a shared factor and return its slot index
    pub fn add_shared(&mut self, factor: Arc<JacobianFactor>) -> usize {
        self.factors.push(Some(factor));
        self.factors.len() - 1
    }

    /// Append an empty slot
    pub fn add_empty(&mut self) -> usize {
        self.factors.push(None);
        self.factors.len() - 1
    }

    /// Remove the factor at `slot`, leaving the slot empty
    pub fn remove(&mut self, slot: usize) -> Option<Arc<JacobianFactor>> {
        self.factors.get_mut(slot).and_then(Option::take)
    }

    /// Factor at `slot`, `None` for empty or out-of-range slots
    pub fn get(&self, slot: usize) -> Option<&JacobianFactor> {
        self.factors.get(slot).and_then(|f| f.as_deref())
    }

    /// Number of slots, including empty ones
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    /// Whether the graph has no slots at all
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Number of non-empty factors
    pub fn num_factors(&self) -> usize {
        self.iter().count()
    }

    /// Iterate the non-empty factors in slot order
    pub fn iter(&self) -> impl Iterator<Item = &JacobianFactor> + '_ {
        self.factors.iter().filter_map(|f| f.as_deref())
    }

    /// All keys referenced by any factor
    pub fn keys(&self) -> BTreeSet<Key> {
        self.iter().flat_map(|f| f.keys().iter().copied()).collect()
    }

    /// Scan every factor and record the dimension of each key
    pub fn dimensions(&self) -> LinAlgResult<DimensionMap> {
        DimensionMap::from_graph(self)
    }

    /// Total number of rows over all factors
    pub fn total_residual_dimension(&self) -> usize {
        self.iter().map(JacobianFactor::rows).sum()
    }

    /// Total error `0.5 * Σ ||Aᵢx - bᵢ||²`, `None` if `values` misses a key
    pub fn error(&self, values: &VectorValues) -> Option<f64> {
        self.iter().map(|f| f.error(values)).sum()
    }

    /// Get statistics about the factor graph
    pub fn statistics(&self) -> LinAlgResult<FactorGraphStatistics> {
        let dims = self.dimensions()?;
        let num_factors = self.num_factors();
        Ok(FactorGraphStatistics {
            num_variables: dims.len(),
            num_factors,
            num_empty_slots: self.len() - num_factors,
            total_variable_dimension: dims.total_dimension(),
            total_residual_dimension: self.total_residual_dimension(),
        })
    }
}

impl FromIterator<JacobianFactor> for GaussianFactorGraph {
    fn from_iter<T: IntoIterator<Item = JacobianFactor>>(iter: T) -> Self {
        let mut graph = GaussianFactorGraph::new();
        for factor in iter {
            graph.add(factor);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    fn chain() -> GaussianFactorGraph {
        let x0 = Key::symbol('x', 0);
        let x1 = Key::symbol('x', 1);
        let mut graph = GaussianFactorGraph::new();
        graph.add(
            JacobianFactor::unary(x0, dmatrix![1.0, 0.0; 0.0, 1.0], dvector![0.0, 0.0]).unwrap(),
        );
        graph.add_empty();
        graph.add(
            JacobianFactor::binary(
                x0,
                dmatrix![-1.0, 0.0; 0.0, -1.0],
                x1,
                dmatrix![1.0, 0.0; 0.0, 1.0],
                dvector![1.0, 0.0],
            )
            .unwrap(),
        );
        graph
    }

    #[test]
    fn test_empty_slots_are_skipped() {
        let graph = chain();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.num_factors(), 2);
        assert!(graph.get(1).is_none());
        assert_eq!(graph.iter().count(), 2);
    }

    #[test]
    fn test_statistics() {
        let stats = chain().statistics().unwrap();
        assert_eq!(stats.num_variables, 2);
        assert_eq!(stats.num_factors, 2);
        assert_eq!(stats.num_empty_slots, 1);
        assert_eq!(stats.total_variable_dimension, 4);
        assert_eq!(stats.total_residual_dimension, 4);
        assert!(stats.to_string().contains("Variables: 2"));
    }

    #[test]
    fn test_remove_leaves_empty_slot() {
        let mut graph = chain();
        assert!(graph.remove(0).is_some());
        assert!(graph.remove(0).is_none());
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.num_factors(), 1);
    }
}
