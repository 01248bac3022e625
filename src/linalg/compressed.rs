//! Compressed sparse row matrices.
//!
//! [`CompressedMatrix`] is the exchange format between the assembler and the factorization
//! capabilities: zero-based row pointers, column indices sorted ascending within each row,
//! and a parallel values array. Symmetric matrices are stored as their upper triangle.

use crate::linalg::{LinAlgError, LinAlgResult};
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// Sparse matrix in compressed row form
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedMatrix {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CompressedMatrix {
    /// Empty `nrows x ncols` matrix
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            row_ptr: vec![0; nrows + 1],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from `(row, col, value)` triplets; duplicate positions are summed
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> LinAlgResult<Self> {
        let mut entries = BTreeMap::new();
        for &(row, col, value) in triplets {
            if row >= nrows || col >= ncols {
                return Err(LinAlgError::MatrixConversion(format!(
                    "entry ({row}, {col}) outside {nrows}x{ncols} matrix"
                )));
            }
            *entries.entry((row, col)).or_insert(0.0) += value;
        }
        Ok(Self::from_sorted_entries(nrows, ncols, &entries))
    }

    /// Build from entries already keyed and sorted by `(row, col)`.
    ///
    /// Callers guarantee every position lies inside the matrix.
    pub(crate) fn from_sorted_entries(
        nrows: usize,
        ncols: usize,
        entries: &BTreeMap<(usize, usize), f64>,
    ) -> Self {
        let mut row_ptr = vec![0; nrows + 1];
        let mut col_idx = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        for (&(row, col), &value) in entries {
            row_ptr[row + 1] += 1;
            col_idx.push(col);
            values.push(value);
        }
        for i in 0..nrows {
            row_ptr[i + 1] += row_ptr[i];
        }
        Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Build from raw compressed arrays, checking every structural invariant
    pub fn from_raw_parts(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> LinAlgResult<Self> {
        if row_ptr.len() != nrows + 1 {
            return Err(LinAlgError::MatrixConversion(format!(
                "row pointer array has {} entries, expected {}",
                row_ptr.len(),
                nrows + 1
            )));
        }
        if row_ptr[0] != 0 || row_ptr[nrows] != col_idx.len() || col_idx.len() != values.len() {
            return Err(LinAlgError::MatrixConversion(format!(
                "inconsistent compressed arrays: row_ptr ends at {}, {} column indices, {} values",
                row_ptr[nrows],
                col_idx.len(),
                values.len()
            )));
        }
        for row in 0..nrows {
            let (start, end) = (row_ptr[row], row_ptr[row + 1]);
            if start > end || end > col_idx.len() {
                return Err(LinAlgError::MatrixConversion(format!(
                    "invalid row pointers at row {row}"
                )));
            }
            let cols = &col_idx[start..end];
            if cols.iter().any(|&c| c >= ncols) {
                return Err(LinAlgError::MatrixConversion(format!(
                    "column index out of range in row {row}"
                )));
            }
            if cols.windows(2).any(|w| w[0] >= w[1]) {
                return Err(LinAlgError::MatrixConversion(format!(
                    "column indices of row {row} are not strictly ascending"
                )));
            }
        }
        Ok(Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Column indices and values of one row
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        (&self.col_idx[range.clone()], &self.values[range])
    }

    /// Value at `(row, col)`, zero if not stored
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (cols, vals) = self.row(row);
        cols.binary_search(&col).map_or(0.0, |i| vals[i])
    }

    /// Stored diagonal (zero where absent)
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.nrows.min(self.ncols))
            .map(|i| self.get(i, i))
            .collect()
    }

    /// Whether every stored entry satisfies `col >= row`
    pub fn is_upper_triangular(&self) -> bool {
        (0..self.nrows).all(|row| self.row(row).0.iter().all(|&col| col >= row))
    }

    /// Whether every stored entry satisfies `col <= row`
    pub fn is_lower_triangular(&self) -> bool {
        (0..self.nrows).all(|row| self.row(row).0.iter().all(|&col| col <= row))
    }

    /// Compressed row form of the transpose, with sorted column indices
    pub fn transpose(&self) -> Self {
        let mut row_ptr = vec![0; self.ncols + 1];
        for &col in &self.col_idx {
            row_ptr[col + 1] += 1;
        }
        for i in 0..self.ncols {
            row_ptr[i + 1] += row_ptr[i];
        }

        let mut next = row_ptr.clone();
        let mut col_idx = vec![0; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        // Source rows are visited in ascending order, so each target row comes out sorted.
        for row in 0..self.nrows {
            let (cols, vals) = self.row(row);
            for (&col, &value) in cols.iter().zip(vals) {
                let slot = next[col];
                col_idx[slot] = row;
                values[slot] = value;
                next[col] += 1;
            }
        }

        Self {
            nrows: self.ncols,
            ncols: self.nrows,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// `y = A x`
    pub fn multiply(&self, x: &[f64]) -> Vec<f64> {
        (0..self.nrows)
            .map(|row| {
                let (cols, vals) = self.row(row);
                cols.iter().zip(vals).map(|(&c, &v)| v * x[c]).sum()
            })
            .collect()
    }

    /// Convert to a faer column-major sparse matrix holding the same entries
    pub fn to_faer(&self) -> LinAlgResult<SparseColMat<usize, f64>> {
        let triplets: Vec<_> = (0..self.nrows)
            .flat_map(|row| {
                let (cols, vals) = self.row(row);
                cols.iter()
                    .zip(vals)
                    .map(move |(&col, &value)| Triplet::new(row, col, value))
            })
            .collect();

        SparseColMat::try_new_from_triplets(self.nrows, self.ncols, &triplets).map_err(|e| {
            LinAlgError::MatrixConversion(format!("Failed to create sparse matrix: {:?}", e))
        })
    }

    /// Dense copy, for debugging and reference computations
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.nrows, self.ncols);
        for row in 0..self.nrows {
            let (cols, vals) = self.row(row);
            for (&col, &value) in cols.iter().zip(vals) {
                dense[(row, col)] = value;
            }
        }
        dense
    }
}
