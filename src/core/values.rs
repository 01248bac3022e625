//! Per-key solution vectors
//!
//! [`VectorValues`] maps each [`Key`] to its block of the solution and can flatten itself
//! into one vector under an [`Ordering`].

use crate::core::{Key, Ordering};
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::fmt;

/// Per-variable solution vectors keyed by variable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorValues {
    values: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vector, returning the previous one for this key
    pub fn insert(&mut self, key: Key, value: DVector<f64>) -> Option<DVector<f64>> {
        self.values.insert(key, value)
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.values.get(&key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &DVector<f64>)> + '_ {
        self.values.iter().map(|(&k, v)| (k, v))
    }

    /// Sum of all vector dimensions
    pub fn total_dimension(&self) -> usize {
        self.values.values().map(|v| v.len()).sum()
    }

    /// Concatenate the vectors in `ordering` sequence, `None` if a key is missing
    pub fn vector(&self, ordering: &Ordering) -> Option<DVector<f64>> {
        let mut stacked = Vec::with_capacity(self.total_dimension());
        for key in ordering.iter() {
            stacked.extend_from_slice(self.values.get(&key)?.as_slice());
        }
        Some(DVector::from_vec(stacked))
    }

    /// Euclidean norm over all entries
    pub fn norm(&self) -> f64 {
        self.values
            .values()
            .map(|v| v.norm_squared())
            .sum::<f64>()
            .sqrt()
    }

    /// Same keys, same dimensions and entries within `tol`
    pub fn equals(&self, other: &VectorValues, tol: f64) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().all(|(key, v)| {
                other.values.get(key).is_some_and(|w| {
                    v.len() == w.len() && v.iter().zip(w.iter()).all(|(a, b)| (a - b).abs() <= tol)
                })
            })
    }
}

impl FromIterator<(Key, DVector<f64>)> for VectorValues {
    fn from_iter<T: IntoIterator<Item = (Key, DVector<f64>)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for VectorValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VectorValues: {} variables", self.values.len())?;
        for (key, value) in &self.values {
            let entries: Vec<String> = value.iter().map(|v| format!("{v:.6}")).collect();
            writeln!(f, "  {key}: [{}]", entries.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_vector_follows_ordering() {
        let a = Key::symbol('a', 0);
        let b = Key::symbol('b', 0);
        let values: VectorValues = [(a, dvector![1.0, 2.0]), (b, dvector![3.0])]
            .into_iter()
            .collect();

        let forward = values.vector(&Ordering::from_keys([a, b])).unwrap();
        assert_eq!(forward, dvector![1.0, 2.0, 3.0]);
        let backward = values.vector(&Ordering::from_keys([b, a])).unwrap();
        assert_eq!(backward, dvector![3.0, 1.0, 2.0]);

        assert!(values.vector(&Ordering::from_keys([Key::new(9)])).is_none());
    }

    #[test]
    fn test_equals_with_tolerance() {
        let a = Key::symbol('a', 0);
        let mut lhs = VectorValues::new();
        lhs.insert(a, dvector![1.0, 2.0]);
        let mut rhs = VectorValues::new();
        rhs.insert(a, dvector![1.0 + 1e-10, 2.0]);

        assert!(lhs.equals(&rhs, 1e-9));
        assert!(!lhs.equals(&rhs, 1e-12));

        rhs.insert(Key::symbol('b', 0), dvector![0.0]);
        assert!(!lhs.equals(&rhs, 1.0));
    }

    #[test]
    fn test_norm_and_display() {
        let values: VectorValues = [(Key::symbol('x', 1), dvector![3.0, 4.0])]
            .into_iter()
            .collect();
        assert!((values.norm() - 5.0).abs() < 1e-15);
        assert!(values.to_string().contains("x1: [3.000000, 4.000000]"));
    }
}
