//! Sparse QR capability.
//!
//! [`SparseQrFactorization`] takes the augmented Jacobian `[A | b]` and returns the
//! least-squares solution together with the numerical rank of `A`. [`HostQr`] implements it
//! with faer's sparse QR and reads the rank off the diagonal of `R`: a diagonal entry with
//! `|R_jj| <= tolerance * max |R_ii|` marks a dependent column. A rank-deficient system is
//! reported without a solution, whether or not `b` is consistent with it.

use std::fmt::Debug;

use faer::dyn_stack::{MemBuffer, MemStack, StackReq};
use faer::sparse::linalg::SupernodalThreshold;
use faer::sparse::linalg::qr::{QrSymbolicParams, factorize_symbolic_qr};
use faer::{Conj, Mat, get_global_parallelism};
use tracing::debug;

use crate::linalg::{CompressedMatrix, LinAlgError, LinAlgResult};

/// Least-squares solution and numerical rank
#[derive(Debug, Clone, PartialEq)]
pub struct QrSolution {
    /// Solution in column order; empty when the system is rank deficient
    pub solution: Vec<f64>,
    /// Numerical rank of `A`
    pub rank: usize,
}

impl QrSolution {
    /// Whether `A` has full column rank `n`
    pub fn is_full_rank(&self, n: usize) -> bool {
        self.rank == n
    }
}

/// External sparse QR capability
pub trait SparseQrFactorization: Send + Sync + Debug {
    /// Solve `min ||A x - b||` given `augmented = [A | b]`
    fn factorize_and_solve(
        &self,
        augmented: &CompressedMatrix,
        tolerance: f64,
    ) -> LinAlgResult<QrSolution>;
}

/// Host sparse QR backed by faer
#[derive(Debug, Clone, Copy, Default)]
pub struct HostQr;

impl HostQr {
    pub fn new() -> Self {
        Self
    }
}

/// Split `[A | b]` into `A` and a dense `b`
fn split_augmented(augmented: &CompressedMatrix) -> LinAlgResult<(CompressedMatrix, Vec<f64>)> {
    if augmented.ncols() == 0 {
        return Err(LinAlgError::MatrixConversion(
            "augmented Jacobian has no right-hand-side column".to_string(),
        ));
    }
    let (m, n) = (augmented.nrows(), augmented.ncols() - 1);
    let mut triplets = Vec::with_capacity(augmented.nnz());
    let mut rhs = vec![0.0; m];
    for (row, b) in rhs.iter_mut().enumerate() {
        let (cols, vals) = augmented.row(row);
        for (&col, &value) in cols.iter().zip(vals) {
            if col == n {
                *b = value;
            } else {
                triplets.push((row, col, value));
            }
        }
    }
    Ok((CompressedMatrix::from_triplets(m, n, &triplets)?, rhs))
}

/// Numerical rank from the diagonal of `R`.
///
/// `r_col_ptr` and `r_row_idx` describe `R` column by column, rows unsorted within a column.
fn rank_from_r(r_col_ptr: &[usize], r_row_idx: &[usize], r_val: &[f64], tolerance: f64) -> usize {
    let n = r_col_ptr.len() - 1;
    let diagonal: Vec<f64> = (0..n)
        .map(|j| {
            let range = r_col_ptr[j]..r_col_ptr[j + 1];
            r_row_idx[range.clone()]
                .iter()
                .zip(&r_val[range])
                .find(|&(&row, _)| row == j)
                .map_or(0.0, |(_, value)| value.abs())
        })
        .collect();

    let largest = diagonal.iter().copied().fold(0.0, f64::max);
    diagonal
        .iter()
        .filter(|&&d| d.is_finite() && d > tolerance * largest)
        .count()
}

fn workspace(req: StackReq, what: &str) -> LinAlgResult<MemBuffer> {
    MemBuffer::try_new(req).map_err(|_| {
        LinAlgError::MatrixConversion(format!("cannot allocate sparse QR {what} workspace"))
    })
}

impl SparseQrFactorization for HostQr {
    fn factorize_and_solve(
        &self,
        augmented: &CompressedMatrix,
        tolerance: f64,
    ) -> LinAlgResult<QrSolution> {
        let (a, b) = split_augmented(augmented)?;
        let (m, n) = (a.nrows(), a.ncols());
        if n == 0 {
            return Ok(QrSolution {
                solution: Vec::new(),
                rank: 0,
            });
        }

        let mut column_norms = vec![0.0; n];
        for row in 0..m {
            let (cols, vals) = a.row(row);
            for (&col, &value) in cols.iter().zip(vals) {
                column_norms[col] += value * value;
            }
        }
        let empty_columns = column_norms.iter().filter(|&&c| c == 0.0).count();
        if empty_columns > 0 || m < n {
            let rank = (n - empty_columns).min(m);
            debug!(
                "QR: {} rows, {} columns, {} empty columns: rank {} < {}",
                m, n, empty_columns, rank, n
            );
            return Ok(QrSolution {
                solution: Vec::new(),
                rank,
            });
        }

        let jacobian = a.to_faer()?;
        // The simplicial layout keeps R as plain compressed columns at the front of the
        // factorization buffers: indices = [R col ptr (n + 1) | R row idx | ...],
        // values = [R values | ...].
        let params = QrSymbolicParams {
            supernodal_flop_ratio_threshold: SupernodalThreshold::FORCE_SIMPLICIAL,
            ..Default::default()
        };
        let symbolic = factorize_symbolic_qr(jacobian.symbolic(), params).map_err(|e| {
            LinAlgError::MatrixConversion(format!("Symbolic QR failed: {:?}", e))
        })?;

        let mut indices = vec![0usize; symbolic.len_idx()];
        let mut values = vec![0.0f64; symbolic.len_val()];
        let par = get_global_parallelism();
        let mut factor_mem = workspace(
            symbolic.factorize_numeric_qr_scratch::<f64>(par, Default::default()),
            "factorization",
        )?;
        let mut solve_mem = workspace(symbolic.solve_in_place_scratch::<f64>(1, par), "solve")?;

        let mut rhs = Mat::from_fn(m, 1, |i, _| b[i]);
        let qr = symbolic.factorize_numeric_qr::<f64>(
            &mut indices,
            &mut values,
            jacobian.as_ref(),
            par,
            MemStack::new(&mut factor_mem),
            Default::default(),
        );
        qr.solve_in_place_with_conj(Conj::No, rhs.as_mut(), par, MemStack::new(&mut solve_mem));

        let (r_col_ptr, rest) = indices.split_at(n + 1);
        let r_len = r_col_ptr[n];
        let rank = rank_from_r(r_col_ptr, &rest[..r_len], &values[..r_len], tolerance);
        // The solution lives in the top n rows.
        let solution: Vec<f64> = (0..n).map(|i| rhs[(i, 0)]).collect();

        if rank < n {
            debug!("QR: R has {} of {} diagonal entries above tolerance", rank, n);
            return Ok(QrSolution {
                solution: Vec::new(),
                rank,
            });
        }
        if solution.iter().any(|v| !v.is_finite()) {
            debug!("QR: non-finite least-squares solution");
            return Ok(QrSolution {
                solution: Vec::new(),
                rank: n - 1,
            });
        }

        Ok(QrSolution { solution, rank: n })
    }
}
