//! Key dimension registry, variable ordering and column layout.
//!
//! The three types here carry all of the variable-to-column bookkeeping:
//! - [`DimensionMap`] records each key's tangent dimension, scanned from the factors
//! - [`Ordering`] is the caller-chosen permutation of the keys
//! - [`ColumnLayout`] assigns each key a contiguous column range by accumulating
//!   dimensions in ordering sequence
//!
//! Assembly and demultiplexing both go through [`ColumnLayout`], so the two passes can
//! never disagree about where a key's columns live.

use crate::core::{GaussianFactorGraph, Key};
use crate::linalg::{LinAlgError, LinAlgResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;

/// Tangent-space dimension of every key referenced by a graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionMap {
    dims: BTreeMap<Key, usize>,
}

impl DimensionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit every non-empty factor and every key it touches
    pub fn from_graph(graph: &GaussianFactorGraph) -> LinAlgResult<Self> {
        let mut dims = Self::new();
        for factor in graph.iter() {
            for (i, &key) in factor.keys().iter().enumerate() {
                dims.insert(key, factor.dim(i))?;
            }
        }
        Ok(dims)
    }

    /// Record `key` with dimension `dim`, or check it against the recorded one
    pub fn insert(&mut self, key: Key, dim: usize) -> LinAlgResult<()> {
        match self.dims.get(&key) {
            Some(&existing) if existing != dim => Err(LinAlgError::InconsistentDimension {
                key,
                existing,
                found: dim,
            }),
            Some(_) => Ok(()),
            None => {
                self.dims.insert(key, dim);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: Key) -> Option<usize> {
        self.dims.get(&key).copied()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.dims.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.dims.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, usize)> + '_ {
        self.dims.iter().map(|(&k, &d)| (k, d))
    }

    /// Sum of all dimensions
    pub fn total_dimension(&self) -> usize {
        self.dims.values().sum()
    }
}

/// Total order over the variables of a graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ordering {
    keys: Vec<Key>,
}

impl Ordering {
    /// Ordering from an explicit key sequence; validated against a graph when used
    pub fn from_keys(keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Ascending key order over all keys of `graph`
    pub fn natural(graph: &GaussianFactorGraph) -> Self {
        Self::from_keys(graph.keys())
    }

    /// Same keys, opposite order
    pub fn reversed(&self) -> Self {
        Self::from_keys(self.keys.iter().rev().copied())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Key> + '_ {
        self.keys.iter().copied()
    }

    pub fn as_slice(&self) -> &[Key] {
        &self.keys
    }

    /// Position of `key` in the ordering
    pub fn position_of(&self, key: Key) -> Option<usize> {
        self.keys.iter().position(|&k| k == key)
    }

    /// Map from key to position, for repeated lookups
    pub fn positions(&self) -> HashMap<Key, usize> {
        self.keys.iter().enumerate().map(|(i, &k)| (k, i)).collect()
    }

    /// Check that this ordering is a permutation of the keys in `dims`
    pub fn validate(&self, dims: &DimensionMap) -> LinAlgResult<()> {
        let mut seen = HashSet::with_capacity(self.keys.len());
        for &key in &self.keys {
            if !seen.insert(key) {
                return Err(LinAlgError::InvalidOrdering(format!(
                    "key {key} appears more than once"
                )));
            }
            if !dims.contains(key) {
                return Err(LinAlgError::InvalidOrdering(format!(
                    "key {key} is not referenced by any factor"
                )));
            }
        }
        if let Some(missing) = dims.keys().find(|k| !seen.contains(k)) {
            return Err(LinAlgError::InvalidOrdering(format!(
                "key {missing} is missing from the ordering"
            )));
        }
        Ok(())
    }
}

impl FromIterator<Key> for Ordering {
    fn from_iter<T: IntoIterator<Item = Key>>(iter: T) -> Self {
        Self::from_keys(iter)
    }
}

/// Starting column of every key, accumulated in ordering sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    /// `(key, offset, dim)` in ordering sequence
    columns: Vec<(Key, usize, usize)>,
    index: HashMap<Key, usize>,
    total: usize,
}

impl ColumnLayout {
    /// Validate `ordering` against `dims` and accumulate column offsets
    pub fn new(ordering: &Ordering, dims: &DimensionMap) -> LinAlgResult<Self> {
        ordering.validate(dims)?;

        let mut columns = Vec::with_capacity(ordering.len());
        let mut index = HashMap::with_capacity(ordering.len());
        let mut offset = 0;
        for key in ordering.iter() {
            let dim = dims.get(key).ok_or_else(|| {
                LinAlgError::InvalidOrdering(format!("key {key} has no dimension"))
            })?;
            index.insert(key, columns.len());
            columns.push((key, offset, dim));
            offset += dim;
        }

        Ok(Self {
            columns,
            index,
            total: offset,
        })
    }

    /// First column of `key`
    pub fn offset(&self, key: Key) -> Option<usize> {
        self.index.get(&key).map(|&i| self.columns[i].1)
    }

    /// Dimension of `key`
    pub fn dim(&self, key: Key) -> Option<usize> {
        self.index.get(&key).map(|&i| self.columns[i].2)
    }

    /// Column range of `key`
    pub fn range(&self, key: Key) -> Option<Range<usize>> {
        self.index.get(&key).map(|&i| {
            let (_, offset, dim) = self.columns[i];
            offset..offset + dim
        })
    }

    /// Total number of columns
    pub fn total_dimension(&self) -> usize {
        self.total
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `(key, offset, dim)` in ordering sequence
    pub fn iter(&self) -> impl Iterator<Item = (Key, usize, usize)> + '_ {
        self.columns.iter().copied()
    }

    /// Check that the key ranges tile `[0, total)` exactly, with no gap and no overlap
    pub fn verify_coverage(&self) -> LinAlgResult<()> {
        let mut ranges: Vec<(usize, usize, Key)> = self
            .columns
            .iter()
            .map(|&(key, offset, dim)| (offset, dim, key))
            .collect();
        ranges.sort_unstable_by_key(|&(offset, _, _)| offset);

        let mut cursor = 0;
        for (offset, dim, key) in ranges {
            if dim == 0 {
                return Err(LinAlgError::LayoutMismatch(format!(
                    "key {key} has zero dimension"
                )));
            }
            if offset != cursor {
                return Err(LinAlgError::LayoutMismatch(format!(
                    "key {key} starts at column {offset}, expected {cursor}"
                )));
            }
            cursor += dim;
        }
        if cursor != self.total {
            return Err(LinAlgError::LayoutMismatch(format!(
                "ranges cover {cursor} columns, expected {}",
                self.total
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JacobianFactor;
    use nalgebra::{DMatrix, DVector};

    fn key(i: u64) -> Key {
        Key::symbol('x', i)
    }

    fn dims(entries: &[(u64, usize)]) -> DimensionMap {
        let mut dims = DimensionMap::new();
        for &(k, d) in entries {
            dims.insert(key(k), d).unwrap();
        }
        dims
    }

    #[test]
    fn test_inconsistent_dimension() {
        let mut graph = GaussianFactorGraph::new();
        graph.add(
            JacobianFactor::unary(key(0), DMatrix::identity(3, 3), DVector::zeros(3)).unwrap(),
        );
        graph.add(
            JacobianFactor::unary(key(0), DMatrix::identity(2, 2), DVector::zeros(2)).unwrap(),
        );

        let result = DimensionMap::from_graph(&graph);
        assert_eq!(
            result,
            Err(LinAlgError::InconsistentDimension {
                key: key(0),
                existing: 3,
                found: 2
            })
        );
    }

    #[test]
    fn test_validate_rejects_duplicate() {
        let dims = dims(&[(0, 1), (1, 1)]);
        let ordering = Ordering::from_keys([key(0), key(0), key(1)]);
        assert!(matches!(
            ordering.validate(&dims),
            Err(LinAlgError::InvalidOrdering(_))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_and_extra() {
        let dims = dims(&[(0, 1), (1, 1)]);
        let missing = Ordering::from_keys([key(0)]);
        assert!(matches!(
            missing.validate(&dims),
            Err(LinAlgError::InvalidOrdering(_))
        ));

        let extra = Ordering::from_keys([key(0), key(1), key(2)]);
        assert!(matches!(
            extra.validate(&dims),
            Err(LinAlgError::InvalidOrdering(_))
        ));
    }

    #[test]
    fn test_layout_offsets_follow_ordering() {
        let dims = dims(&[(0, 3), (1, 2), (2, 6)]);
        let ordering = Ordering::from_keys([key(2), key(0), key(1)]);
        let layout = ColumnLayout::new(&ordering, &dims).unwrap();

        assert_eq!(layout.offset(key(2)), Some(0));
        assert_eq!(layout.offset(key(0)), Some(6));
        assert_eq!(layout.offset(key(1)), Some(9));
        assert_eq!(layout.range(key(1)), Some(9..11));
        assert_eq!(layout.total_dimension(), 11);
        assert!(layout.verify_coverage().is_ok());
    }

    #[test]
    fn test_layout_coverage_for_many_orderings() {
        let dims = dims(&[(0, 1), (1, 2), (2, 3), (3, 6), (4, 2)]);
        let base: Vec<Key> = dims.keys().collect();

        // rotations and reversals of the base order
        for shift in 0..base.len() {
            let mut keys = base.clone();
            keys.rotate_left(shift);
            for ordering in [
                Ordering::from_keys(keys.clone()),
                Ordering::from_keys(keys).reversed(),
            ] {
                let layout = ColumnLayout::new(&ordering, &dims).unwrap();
                layout.verify_coverage().unwrap();

                let mut covered = vec![0usize; layout.total_dimension()];
                for (k, _, _) in layout.iter() {
                    for col in layout.range(k).unwrap() {
                        covered[col] += 1;
                    }
                }
                assert!(covered.iter().all(|&c| c == 1));
                assert_eq!(layout.total_dimension(), dims.total_dimension());
            }
        }
    }

    #[test]
    fn test_reversed_and_positions() {
        let ordering = Ordering::from_keys([key(0), key(1), key(2)]);
        let reversed = ordering.reversed();
        assert_eq!(reversed.as_slice(), &[key(2), key(1), key(0)]);
        assert_eq!(reversed.position_of(key(2)), Some(0));
        assert_eq!(ordering.positions()[&key(2)], 2);
    }
}
