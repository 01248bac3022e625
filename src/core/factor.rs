//! Linear (Gaussian) factors.
//!
//! A [`JacobianFactor`] represents the squared error `||A₁x₁ + ... + Aₖxₖ - b||²` over the
//! variables it touches. It is the linearization of a nonlinear factor around the current
//! estimate; the solver layer only ever sees this linear form.

use crate::core::{Key, VectorValues};
use crate::linalg::{LinAlgError, LinAlgResult};
use nalgebra::{DMatrix, DVector};
use std::collections::HashSet;

/// Linear factor over a set of keys with one dense Jacobian block per key
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianFactor {
    keys: Vec<Key>,
    blocks: Vec<DMatrix<f64>>,
    rhs: DVector<f64>,
}

impl JacobianFactor {
    /// Create a factor from `(key, block)` terms and the right-hand side `b`
    ///
    /// Every block must have `b.len()` rows and at least one column, and a key may appear
    /// only once.
    pub fn new(terms: Vec<(Key, DMatrix<f64>)>, rhs: DVector<f64>) -> LinAlgResult<Self> {
        if terms.is_empty() {
            return Err(LinAlgError::InvalidFactor(
                "factor must involve at least one key".to_string(),
            ));
        }
        if rhs.is_empty() {
            return Err(LinAlgError::InvalidFactor(
                "factor must have at least one row".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(terms.len());
        let mut keys = Vec::with_capacity(terms.len());
        let mut blocks = Vec::with_capacity(terms.len());
        for (key, block) in terms {
            if !seen.insert(key) {
                return Err(LinAlgError::InvalidFactor(format!(
                    "key {key} appears twice in the same factor"
                )));
            }
            if block.nrows() != rhs.len() {
                return Err(LinAlgError::InvalidFactor(format!(
                    "block for key {key} has {} rows, expected {}",
                    block.nrows(),
                    rhs.len()
                )));
            }
            if block.ncols() == 0 {
                return Err(LinAlgError::InvalidFactor(format!(
                    "block for key {key} has no columns"
                )));
            }
            keys.push(key);
            blocks.push(block);
        }

        Ok(Self { keys, blocks, rhs })
    }

    /// Factor on a single key: `||A x - b||²`
    pub fn unary(key: Key, a: DMatrix<f64>, rhs: DVector<f64>) -> LinAlgResult<Self> {
        Self::new(vec![(key, a)], rhs)
    }

    /// Factor on two keys: `||A₁x₁ + A₂x₂ - b||²`
    pub fn binary(
        key1: Key,
        a1: DMatrix<f64>,
        key2: Key,
        a2: DMatrix<f64>,
        rhs: DVector<f64>,
    ) -> LinAlgResult<Self> {
        Self::new(vec![(key1, a1), (key2, a2)], rhs)
    }

    /// Whiten the factor with per-row standard deviations.
    ///
    /// Row `i` of every block and of `b` is divided by `sigmas[i]`.
    pub fn whitened(mut self, sigmas: &DVector<f64>) -> LinAlgResult<Self> {
        if sigmas.len() != self.rows() {
            return Err(LinAlgError::InvalidFactor(format!(
                "{} sigmas given for a factor with {} rows",
                sigmas.len(),
                self.rows()
            )));
        }
        if let Some(bad) = sigmas.iter().find(|s| !(**s > 0.0) || !s.is_finite()) {
            return Err(LinAlgError::InvalidFactor(format!(
                "sigma must be positive and finite, got {bad}"
            )));
        }

        for (row, sigma) in sigmas.iter().enumerate() {
            let inv = 1.0 / sigma;
            for block in &mut self.blocks {
                for col in 0..block.ncols() {
                    block[(row, col)] *= inv;
                }
            }
            self.rhs[row] *= inv;
        }
        Ok(self)
    }

    /// Keys involved in this factor, in construction order
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Jacobian blocks, parallel to [`keys`](Self::keys)
    pub fn blocks(&self) -> &[DMatrix<f64>] {
        &self.blocks
    }

    /// Iterate `(key, block)` pairs
    pub fn terms(&self) -> impl Iterator<Item = (Key, &DMatrix<f64>)> + '_ {
        self.keys.iter().copied().zip(self.blocks.iter())
    }

    /// Right-hand side `b`
    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    /// Number of rows (measurement dimension)
    pub fn rows(&self) -> usize {
        self.rhs.len()
    }

    /// Tangent dimension this factor assumes for the `i`-th key
    pub fn dim(&self, i: usize) -> usize {
        self.blocks[i].ncols()
    }

    /// Whitened residual `A x - b` at the given values, `None` if a key is missing
    pub fn residual(&self, values: &VectorValues) -> Option<DVector<f64>> {
        let mut residual = -self.rhs.clone();
        for (key, block) in self.terms() {
            let x = values.get(key)?;
            if x.len() != block.ncols() {
                return None;
            }
            residual += block * x;
        }
        Some(residual)
    }

    /// Error `0.5 * ||A x - b||²`, `None` if a key is missing
    pub fn error(&self, values: &VectorValues) -> Option<f64> {
        self.residual(values).map(|r| 0.5 * r.norm_squared())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn test_rejects_row_mismatch() {
        let result = JacobianFactor::unary(Key::new(0), dmatrix![1.0, 0.0], dvector![1.0, 2.0]);
        assert!(matches!(result, Err(LinAlgError::InvalidFactor(_))));
    }

    #[test]
    fn test_rejects_duplicate_key() {
        let k = Key::new(3);
        let result =
            JacobianFactor::binary(k, dmatrix![1.0], k, dmatrix![2.0], dvector![0.0]);
        assert!(matches!(result, Err(LinAlgError::InvalidFactor(_))));
    }

    #[test]
    fn test_whitening_scales_rows() {
        let k = Key::symbol('x', 0);
        let factor = JacobianFactor::unary(k, dmatrix![2.0, 0.0; 0.0, 4.0], dvector![2.0, 8.0])
            .unwrap()
            .whitened(&dvector![2.0, 4.0])
            .unwrap();

        assert_eq!(factor.blocks()[0], dmatrix![1.0, 0.0; 0.0, 1.0]);
        assert_eq!(factor.rhs(), &dvector![1.0, 2.0]);
    }

    #[test]
    fn test_whitening_rejects_zero_sigma() {
        let k = Key::symbol('x', 0);
        let result = JacobianFactor::unary(k, dmatrix![1.0], dvector![1.0])
            .unwrap()
            .whitened(&dvector![0.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_at_solution_is_zero() {
        let a = Key::symbol('a', 0);
        let b = Key::symbol('b', 0);
        let factor =
            JacobianFactor::binary(a, dmatrix![-1.0], b, dmatrix![1.0], dvector![2.0]).unwrap();

        let mut values = VectorValues::new();
        values.insert(a, dvector![1.0]);
        values.insert(b, dvector![3.0]);
        assert!(factor.error(&values).unwrap().abs() < 1e-15);

        values.insert(b, dvector![4.0]);
        assert!((factor.error(&values).unwrap() - 0.5).abs() < 1e-15);
    }
}
