//! Linear system assembly.
//!
//! Turns a [`GaussianFactorGraph`] and an [`Ordering`] into compressed sparse systems:
//! - [`assemble_jacobian`]: the stacked whitened Jacobian `A` (one block row per factor) and
//!   the stacked right-hand side `b`
//! - [`assemble_normal_equations`]: the upper triangle of the information matrix `AᵀA` and
//!   the vector `Aᵀb`
//!
//! Both passes derive their [`ColumnLayout`] the same way, from the graph's dimension map and
//! the caller's ordering. Per-factor contributions are linearized independently (optionally
//! in parallel with rayon) and then reduced in factor order, so the floating-point result does
//! not depend on thread scheduling.

use crate::core::{ColumnLayout, DimensionMap, GaussianFactorGraph, JacobianFactor, Ordering};
use crate::linalg::{CompressedMatrix, LinAlgError, LinAlgResult};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

/// Stacked Jacobian `A` and right-hand side `b` of a factor graph
#[derive(Debug, Clone)]
pub struct JacobianSystem {
    /// `m x n` Jacobian in compressed row form
    pub jacobian: CompressedMatrix,
    /// Right-hand side `b` of length `m`
    pub rhs: Vec<f64>,
    /// Column placement of every key
    pub layout: ColumnLayout,
}

impl JacobianSystem {
    /// Number of rows `m`
    pub fn rows(&self) -> usize {
        self.jacobian.nrows()
    }

    /// Number of unknowns `n`
    pub fn dimension(&self) -> usize {
        self.jacobian.ncols()
    }

    /// Augmented matrix `[A | b]`, with `b` as the last column
    pub fn augmented(&self) -> CompressedMatrix {
        let (m, n) = (self.jacobian.nrows(), self.jacobian.ncols());
        let mut entries = BTreeMap::new();
        for row in 0..m {
            let (cols, vals) = self.jacobian.row(row);
            for (&col, &value) in cols.iter().zip(vals) {
                entries.insert((row, col), value);
            }
            if self.rhs[row] != 0.0 {
                entries.insert((row, n), self.rhs[row]);
            }
        }
        CompressedMatrix::from_sorted_entries(m, n + 1, &entries)
    }
}

/// Normal equations `(AᵀA) x = Aᵀb`, with only the upper triangle of `AᵀA` stored
#[derive(Debug, Clone)]
pub struct NormalEquations {
    /// Upper triangle of the `n x n` information matrix; every diagonal entry is stored
    pub information: CompressedMatrix,
    /// `Aᵀb`
    pub rhs: Vec<f64>,
    /// Column placement of every key
    pub layout: ColumnLayout,
}

impl NormalEquations {
    /// Number of unknowns `n`
    pub fn dimension(&self) -> usize {
        self.information.nrows()
    }

    /// Stored entries of the upper triangle
    pub fn nnz(&self) -> usize {
        self.information.nnz()
    }
}

/// Column layout for `graph` under `ordering`, validating both
pub fn column_layout(
    graph: &GaussianFactorGraph,
    ordering: &Ordering,
) -> LinAlgResult<ColumnLayout> {
    let dims = DimensionMap::from_graph(graph)?;
    ColumnLayout::new(ordering, &dims)
}

/// Column offsets of a factor's keys, in the factor's term order
fn factor_offsets(factor: &JacobianFactor, layout: &ColumnLayout) -> LinAlgResult<Vec<usize>> {
    factor
        .keys()
        .iter()
        .map(|&key| {
            layout.offset(key).ok_or_else(|| {
                LinAlgError::InvalidOrdering(format!("key {key} has no column in the layout"))
            })
        })
        .collect()
}

/// Contribution of one factor to the normal equations
struct HessianContribution {
    /// Upper-triangle entries `(row, col, value)` with `row <= col`
    entries: Vec<(usize, usize, f64)>,
    /// `(index, value)` pairs of `Aᵀb`
    gradient: Vec<(usize, f64)>,
}

fn linearize_hessian(
    factor: &JacobianFactor,
    layout: &ColumnLayout,
) -> LinAlgResult<HessianContribution> {
    let offsets = factor_offsets(factor, layout)?;
    let blocks = factor.blocks();
    let rhs = factor.rhs();

    let mut entries = Vec::new();
    let mut gradient = Vec::new();
    for (i, a_i) in blocks.iter().enumerate() {
        let a_i_t = a_i.transpose();
        let g_i = &a_i_t * rhs;
        for (r, &value) in g_i.iter().enumerate() {
            gradient.push((offsets[i] + r, value));
        }

        for (j, a_j) in blocks.iter().enumerate() {
            let block = &a_i_t * a_j;
            for r in 0..block.nrows() {
                let row = offsets[i] + r;
                for c in 0..block.ncols() {
                    let col = offsets[j] + c;
                    if row <= col {
                        entries.push((row, col, block[(r, c)]));
                    }
                }
            }
        }
    }

    Ok(HessianContribution { entries, gradient })
}

fn linearize_jacobian(
    factor: &JacobianFactor,
    layout: &ColumnLayout,
    row_offset: usize,
) -> LinAlgResult<Vec<(usize, usize, f64)>> {
    let offsets = factor_offsets(factor, layout)?;
    let mut entries = Vec::new();
    for (block, &col_offset) in factor.blocks().iter().zip(&offsets) {
        for r in 0..block.nrows() {
            for c in 0..block.ncols() {
                let value = block[(r, c)];
                if value != 0.0 {
                    entries.push((row_offset + r, col_offset + c, value));
                }
            }
        }
    }
    Ok(entries)
}

/// Map `f` over the factors in order, in parallel when requested
fn map_factors<T, F>(factors: &[&JacobianFactor], parallel: bool, f: F) -> LinAlgResult<Vec<T>>
where
    T: Send,
    F: Fn(usize, &JacobianFactor) -> LinAlgResult<T> + Sync + Send,
{
    if parallel {
        factors
            .par_iter()
            .enumerate()
            .map(|(i, factor)| f(i, *factor))
            .collect()
    } else {
        factors
            .iter()
            .enumerate()
            .map(|(i, factor)| f(i, *factor))
            .collect()
    }
}

/// Assemble the stacked Jacobian `A` and right-hand side `b`.
///
/// Rows follow the graph's slot order (empty slots contribute nothing); columns follow
/// `ordering`. Exact zeros in the factor blocks are not stored.
pub fn assemble_jacobian(
    graph: &GaussianFactorGraph,
    ordering: &Ordering,
    parallel: bool,
) -> LinAlgResult<JacobianSystem> {
    let layout = column_layout(graph, ordering)?;
    let factors: Vec<&JacobianFactor> = graph.iter().collect();

    let mut row_offsets = Vec::with_capacity(factors.len());
    let mut rows = 0;
    for factor in &factors {
        row_offsets.push(rows);
        rows += factor.rows();
    }

    let contributions = map_factors(&factors, parallel, |i, factor| {
        linearize_jacobian(factor, &layout, row_offsets[i])
    })?;

    let mut entries = BTreeMap::new();
    for (row, col, value) in contributions.into_iter().flatten() {
        *entries.entry((row, col)).or_insert(0.0) += value;
    }
    let mut rhs = Vec::with_capacity(rows);
    for factor in &factors {
        rhs.extend_from_slice(factor.rhs().as_slice());
    }

    let jacobian = CompressedMatrix::from_sorted_entries(rows, layout.total_dimension(), &entries);
    debug!(
        "Assembled Jacobian: {} x {}, nnz = {}",
        jacobian.nrows(),
        jacobian.ncols(),
        jacobian.nnz()
    );

    Ok(JacobianSystem {
        jacobian,
        rhs,
        layout,
    })
}

/// Assemble the normal equations `AᵀA x = Aᵀb`.
///
/// Only entries with `row <= col` are materialized. Every diagonal position is stored, with
/// an explicit zero for a variable no factor constrains, so that factorization sees it.
pub fn assemble_normal_equations(
    graph: &GaussianFactorGraph,
    ordering: &Ordering,
    parallel: bool,
) -> LinAlgResult<NormalEquations> {
    let layout = column_layout(graph, ordering)?;
    let n = layout.total_dimension();
    let factors: Vec<&JacobianFactor> = graph.iter().collect();

    let contributions = map_factors(&factors, parallel, |_, factor| {
        linearize_hessian(factor, &layout)
    })?;

    // Deterministic reduction: factors in slot order, entries in generation order.
    let mut entries: BTreeMap<(usize, usize), f64> = (0..n).map(|i| ((i, i), 0.0)).collect();
    let mut rhs = vec![0.0; n];
    for contribution in contributions {
        for (row, col, value) in contribution.entries {
            *entries.entry((row, col)).or_insert(0.0) += value;
        }
        for (index, value) in contribution.gradient {
            rhs[index] += value;
        }
    }

    let information = CompressedMatrix::from_sorted_entries(n, n, &entries);
    debug!(
        "Assembled normal equations: dimension = {}, upper nnz = {}, factors = {}",
        n,
        information.nnz(),
        factors.len()
    );

    Ok(NormalEquations {
        information,
        rhs,
        layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Key;
    use nalgebra::{DMatrix, DVector, dmatrix, dvector};

    const TOLERANCE: f64 = 1e-12;

    fn key(i: u64) -> Key {
        Key::symbol('x', i)
    }

    /// x0 (2-dim) -- x1 (1-dim) -- x2 (2-dim), with an empty slot in the middle
    fn graph() -> GaussianFactorGraph {
        let mut graph = GaussianFactorGraph::new();
        graph.add(
            JacobianFactor::unary(key(0), dmatrix![2.0, 0.0; 0.0, 1.0], dvector![1.0, -1.0])
                .unwrap(),
        );
        graph.add_empty();
        graph.add(
            JacobianFactor::binary(
                key(0),
                dmatrix![1.0, -1.0],
                key(1),
                dmatrix![3.0],
                dvector![0.5],
            )
            .unwrap(),
        );
        graph.add(
            JacobianFactor::binary(
                key(1),
                dmatrix![1.0; 0.0],
                key(2),
                dmatrix![1.0, 2.0; 0.0, 4.0],
                dvector![2.0, 1.0],
            )
            .unwrap(),
        );
        graph
    }

    #[test]
    fn test_jacobian_placement() {
        let graph = graph();
        let ordering = Ordering::from_keys([key(2), key(0), key(1)]);
        let system = assemble_jacobian(&graph, &ordering, false).unwrap();

        assert_eq!(system.rows(), 5);
        assert_eq!(system.dimension(), 5);
        // columns: x2 -> 0..2, x0 -> 2..4, x1 -> 4
        let expected = dmatrix![
            0.0, 0.0, 2.0, 0.0, 0.0;
            0.0, 0.0, 0.0, 1.0, 0.0;
            0.0, 0.0, 1.0, -1.0, 3.0;
            1.0, 2.0, 0.0, 0.0, 1.0;
            0.0, 4.0, 0.0, 0.0, 0.0
        ];
        assert_eq!(system.jacobian.to_dense(), expected);
        assert_eq!(system.rhs, vec![1.0, -1.0, 0.5, 2.0, 1.0]);

        let augmented = system.augmented();
        assert_eq!(augmented.ncols(), 6);
        assert_eq!(augmented.get(2, 5), 0.5);
        assert_eq!(augmented.get(4, 1), 4.0);
    }

    #[test]
    fn test_normal_equations_match_dense_product() {
        let graph = graph();
        let ordering = Ordering::natural(&graph);
        let jacobian = assemble_jacobian(&graph, &ordering, false).unwrap();
        let normal = assemble_normal_equations(&graph, &ordering, false).unwrap();

        let a = jacobian.jacobian.to_dense();
        let b = DVector::from_vec(jacobian.rhs.clone());
        let h = a.transpose() * &a;
        let g = a.transpose() * b;

        assert!(normal.information.is_upper_triangular());
        let upper = normal.information.to_dense();
        for r in 0..h.nrows() {
            for c in 0..h.ncols() {
                let expected = if r <= c { h[(r, c)] } else { 0.0 };
                assert!((upper[(r, c)] - expected).abs() < TOLERANCE);
            }
            assert!((normal.rhs[r] - g[r]).abs() < TOLERANCE);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let graph = graph();
        let ordering = Ordering::natural(&graph).reversed();
        let sequential = assemble_normal_equations(&graph, &ordering, false).unwrap();
        let parallel = assemble_normal_equations(&graph, &ordering, true).unwrap();

        assert_eq!(sequential.information, parallel.information);
        assert_eq!(sequential.rhs, parallel.rhs);
    }

    #[test]
    fn test_diagonal_always_stored() {
        // x1 only appears with an all-zero block
        let mut graph = GaussianFactorGraph::new();
        graph.add(
            JacobianFactor::binary(
                key(0),
                dmatrix![1.0],
                key(1),
                DMatrix::zeros(1, 1),
                dvector![1.0],
            )
            .unwrap(),
        );
        let normal =
            assemble_normal_equations(&graph, &Ordering::natural(&graph), false).unwrap();
        assert_eq!(normal.information.row(1).0, &[1]);
        assert_eq!(normal.information.diagonal(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_invalid_ordering_is_rejected() {
        let graph = graph();
        let ordering = Ordering::from_keys([key(0), key(1)]);
        assert!(matches!(
            assemble_normal_equations(&graph, &ordering, true),
            Err(LinAlgError::InvalidOrdering(_))
        ));
    }
}
