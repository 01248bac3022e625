//! Sparse Cholesky capability.
//!
//! The solver backends only see [`SparseCholeskyFactorization`]: given the upper triangle of
//! a symmetric matrix in compressed row form and a right-hand side, either produce the
//! solution or report that the matrix is not positive definite. [`HostCholesky`] implements
//! it on top of faer's supernodal sparse LLT.

use std::fmt::Debug;

use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::{Mat, Side};
use tracing::debug;

use crate::linalg::{CompressedMatrix, LinAlgError, LinAlgResult};

/// Result of a Cholesky factorize-and-solve call
#[derive(Debug, Clone, PartialEq)]
pub enum CholeskyOutcome {
    /// The matrix was positive definite; the solution in column order
    Solved(Vec<f64>),
    /// The matrix is not positive definite.
    ///
    /// `index` is the first column whose pivot fell at or below the tolerance, when the
    /// factorization can tell.
    Singular { index: Option<usize> },
}

/// External sparse Cholesky capability
pub trait SparseCholeskyFactorization: Send + Sync + Debug {
    /// Solve `H x = rhs` where `upper` holds the upper triangle of the symmetric `H`
    fn factorize_and_solve(
        &self,
        upper: &CompressedMatrix,
        rhs: &[f64],
        tolerance: f64,
    ) -> LinAlgResult<CholeskyOutcome>;
}

/// Host sparse Cholesky backed by faer
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCholesky;

impl HostCholesky {
    pub fn new() -> Self {
        Self
    }
}

impl SparseCholeskyFactorization for HostCholesky {
    fn factorize_and_solve(
        &self,
        upper: &CompressedMatrix,
        rhs: &[f64],
        tolerance: f64,
    ) -> LinAlgResult<CholeskyOutcome> {
        let n = upper.nrows();
        if upper.ncols() != n || rhs.len() != n {
            return Err(LinAlgError::MatrixConversion(format!(
                "Cholesky needs a square system, got {}x{} with rhs of length {}",
                upper.nrows(),
                upper.ncols(),
                rhs.len()
            )));
        }
        if n == 0 {
            return Ok(CholeskyOutcome::Solved(Vec::new()));
        }

        // A pivot of LLᵀ never exceeds its diagonal entry, so a small diagonal is already fatal.
        if let Some(index) = (0..n).find(|&j| !(upper.get(j, j) > tolerance)) {
            debug!(
                "Cholesky: diagonal entry {} at column {} is below tolerance {:.1e}",
                upper.get(index, index),
                index,
                tolerance
            );
            return Ok(CholeskyOutcome::Singular { index: Some(index) });
        }

        // The row-major upper triangle, transposed, is the column-major lower triangle.
        let lower = upper.transpose().to_faer()?;
        let symbolic = SymbolicLlt::try_new(lower.symbolic(), Side::Lower).map_err(|e| {
            LinAlgError::MatrixConversion(format!("Symbolic Cholesky failed: {:?}", e))
        })?;

        let llt = match Llt::try_new_with_symbolic(symbolic, lower.as_ref(), Side::Lower) {
            Ok(llt) => llt,
            Err(e) => {
                debug!("Cholesky factorization failed: {:?}", e);
                return Ok(CholeskyOutcome::Singular { index: None });
            }
        };

        let b = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let x = llt.solve(&b);
        let solution: Vec<f64> = (0..n).map(|i| x[(i, 0)]).collect();

        if solution.iter().any(|v| !v.is_finite()) {
            debug!("Cholesky produced a non-finite solution");
            return Ok(CholeskyOutcome::Singular { index: None });
        }
        Ok(CholeskyOutcome::Solved(solution))
    }
}
