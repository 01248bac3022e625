//! Sequential variable elimination.
//!
//! Eliminates the variables one at a time in ordering sequence. Eliminating a key gathers
//! every remaining factor that touches it (its clique), factors the dense clique system and
//! splits the result into:
//! - a [`GaussianConditional`] `R x_k + Σ Sⱼ xⱼ = d` on the eliminated key given its separator
//! - a new factor on the separator that replaces the gathered ones
//!
//! The conditionals form a [`GaussianBayesNet`] that is solved by back-substitution in
//! reverse elimination order. The normal equations of the whole graph are never formed.
//!
//! Two clique factorizations are supported:
//! - QR: Householder QR of the stacked clique Jacobian `[A_k | A_s | b]`
//! - Cholesky: dense Cholesky of the clique information matrix, with the separator updated by
//!   the Schur complement `H_ss - SᵀS`

use crate::core::{DimensionMap, GaussianFactorGraph, JacobianFactor, Key, Ordering, VectorValues};
use crate::linalg::{LinAlgError, LinAlgResult, SolverMethod};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use tracing::debug;

/// Density `p(x_k | separator)` in square-root form: `R x_k + Σ Sⱼ xⱼ = d`
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianConditional {
    frontal: Key,
    r: DMatrix<f64>,
    parents: Vec<(Key, DMatrix<f64>)>,
    d: DVector<f64>,
}

impl GaussianConditional {
    /// Eliminated key
    pub fn frontal(&self) -> Key {
        self.frontal
    }

    /// Upper-triangular `R`
    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    /// Separator keys with their `S` blocks
    pub fn parents(&self) -> &[(Key, DMatrix<f64>)] {
        &self.parents
    }

    pub fn d(&self) -> &DVector<f64> {
        &self.d
    }

    /// Dimension of the frontal key
    pub fn dim(&self) -> usize {
        self.d.len()
    }

    /// Solve for the frontal key given already-solved parents
    pub fn solve(&self, solved: &VectorValues) -> LinAlgResult<DVector<f64>> {
        let mut rhs = self.d.clone();
        for (parent, s) in &self.parents {
            let x = solved.get(*parent).ok_or_else(|| LinAlgError::EliminationFailure {
                key: self.frontal,
                reason: format!("parent {parent} has not been solved"),
            })?;
            rhs -= s * x;
        }
        self.r
            .solve_upper_triangular(&rhs)
            .ok_or_else(|| LinAlgError::EliminationFailure {
                key: self.frontal,
                reason: "triangular solve failed".to_string(),
            })
    }
}

/// Conditionals in elimination order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaussianBayesNet {
    conditionals: Vec<GaussianConditional>,
}

impl GaussianBayesNet {
    pub fn len(&self) -> usize {
        self.conditionals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditionals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GaussianConditional> + '_ {
        self.conditionals.iter()
    }

    /// Solve every conditional in reverse elimination order
    pub fn back_substitute(&self) -> LinAlgResult<VectorValues> {
        let mut solution = VectorValues::new();
        for conditional in self.conditionals.iter().rev() {
            let x = conditional.solve(&solution)?;
            solution.insert(conditional.frontal(), x);
        }
        Ok(solution)
    }
}

/// Information-form factor `½xᵀHx - xᵀg` over a set of keys
#[derive(Debug, Clone)]
struct HessianFactor {
    keys: Vec<Key>,
    offsets: Vec<usize>,
    dims: Vec<usize>,
    information: DMatrix<f64>,
    linear: DVector<f64>,
}

impl HessianFactor {
    fn from_jacobian(factor: &JacobianFactor) -> Self {
        let dims: Vec<usize> = factor.blocks().iter().map(|b| b.ncols()).collect();
        let offsets = running_offsets(&dims);
        let total: usize = dims.iter().sum();

        let mut a = DMatrix::zeros(factor.rows(), total);
        for (block, &offset) in factor.blocks().iter().zip(&offsets) {
            a.columns_mut(offset, block.ncols()).copy_from(block);
        }
        let a_t = a.transpose();

        Self {
            keys: factor.keys().to_vec(),
            information: &a_t * &a,
            linear: &a_t * factor.rhs(),
            offsets,
            dims,
        }
    }
}

trait CliqueFactor {
    fn involves(&self, key: Key) -> bool;
    fn factor_keys(&self) -> &[Key];
}

impl CliqueFactor for JacobianFactor {
    fn involves(&self, key: Key) -> bool {
        self.keys().contains(&key)
    }

    fn factor_keys(&self) -> &[Key] {
        self.keys()
    }
}

impl CliqueFactor for HessianFactor {
    fn involves(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }

    fn factor_keys(&self) -> &[Key] {
        &self.keys
    }
}

fn running_offsets(dims: &[usize]) -> Vec<usize> {
    dims.iter()
        .scan(0, |acc, &d| {
            let offset = *acc;
            *acc += d;
            Some(offset)
        })
        .collect()
}

/// Remove and return every working factor that touches `key`
fn take_clique<F: CliqueFactor>(working: &mut [Option<F>], key: Key) -> Vec<F> {
    working
        .iter_mut()
        .filter(|slot| slot.as_ref().is_some_and(|f| f.involves(key)))
        .filter_map(Option::take)
        .collect()
}

/// Clique layout: frontal key first, then the separator in ordering sequence
struct CliqueLayout {
    separator: Vec<(Key, usize)>,
    offsets: HashMap<Key, usize>,
    frontal_dim: usize,
    total: usize,
}

impl CliqueLayout {
    fn new<F: CliqueFactor>(
        key: Key,
        clique: &[F],
        dims: &DimensionMap,
        positions: &HashMap<Key, usize>,
    ) -> LinAlgResult<Self> {
        let lookup = |k: Key| {
            dims.get(k).ok_or_else(|| LinAlgError::EliminationFailure {
                key: k,
                reason: "key has no recorded dimension".to_string(),
            })
        };

        let mut separator_keys: Vec<Key> = clique
            .iter()
            .flat_map(|f| f.factor_keys().iter().copied())
            .filter(|&k| k != key)
            .collect();
        separator_keys.sort_by_key(|k| positions.get(k).copied().unwrap_or(usize::MAX));
        separator_keys.dedup();

        let frontal_dim = lookup(key)?;
        let mut offsets = HashMap::new();
        offsets.insert(key, 0);
        let mut separator = Vec::with_capacity(separator_keys.len());
        let mut total = frontal_dim;
        for k in separator_keys {
            let dim = lookup(k)?;
            offsets.insert(k, total);
            separator.push((k, dim));
            total += dim;
        }

        Ok(Self {
            separator,
            offsets,
            frontal_dim,
            total,
        })
    }

    fn separator_dim(&self) -> usize {
        self.total - self.frontal_dim
    }

    fn offset(&self, key: Key) -> usize {
        self.offsets.get(&key).copied().unwrap_or(0)
    }

    /// Split the separator columns of `s` into per-key blocks
    fn split_separator(&self, s: &DMatrix<f64>) -> Vec<(Key, DMatrix<f64>)> {
        self.separator
            .iter()
            .map(|&(k, dim)| {
                let col = self.offset(k) - self.frontal_dim;
                (k, s.columns(col, dim).clone_owned())
            })
            .collect()
    }
}

/// Eliminate every key of `graph` in `ordering` sequence.
///
/// Fails with [`LinAlgError::EliminationFailure`] when a key is left without constraints or its
/// clique pivot falls at or below `pivot_tolerance`.
pub fn eliminate_sequential(
    graph: &GaussianFactorGraph,
    ordering: &Ordering,
    method: SolverMethod,
    pivot_tolerance: f64,
) -> LinAlgResult<GaussianBayesNet> {
    let dims = DimensionMap::from_graph(graph)?;
    ordering.validate(&dims)?;
    let positions = ordering.positions();

    let conditionals = match method {
        SolverMethod::Qr => {
            let mut working: Vec<Option<JacobianFactor>> =
                graph.iter().cloned().map(Some).collect();
            ordering
                .iter()
                .map(|key| {
                    eliminate_qr(key, &mut working, &dims, &positions, pivot_tolerance)
                })
                .collect::<LinAlgResult<Vec<_>>>()?
        }
        SolverMethod::Cholesky => {
            let mut working: Vec<Option<HessianFactor>> = graph
                .iter()
                .map(|f| Some(HessianFactor::from_jacobian(f)))
                .collect();
            ordering
                .iter()
                .map(|key| {
                    eliminate_cholesky(key, &mut working, &dims, &positions, pivot_tolerance)
                })
                .collect::<LinAlgResult<Vec<_>>>()?
        }
    };

    debug!(
        "Sequential {} elimination produced {} conditionals",
        method,
        conditionals.len()
    );
    Ok(GaussianBayesNet { conditionals })
}

fn eliminate_qr(
    key: Key,
    working: &mut Vec<Option<JacobianFactor>>,
    dims: &DimensionMap,
    positions: &HashMap<Key, usize>,
    pivot_tolerance: f64,
) -> LinAlgResult<GaussianConditional> {
    let clique = take_clique(working, key);
    if clique.is_empty() {
        return Err(LinAlgError::EliminationFailure {
            key,
            reason: "no remaining factor constrains this variable".to_string(),
        });
    }
    let layout = CliqueLayout::new(key, &clique, dims, positions)?;
    let dk = layout.frontal_dim;
    let rows: usize = clique.iter().map(JacobianFactor::rows).sum();
    if rows < dk {
        return Err(LinAlgError::EliminationFailure {
            key,
            reason: format!("{rows} rows cannot determine {dk} unknowns"),
        });
    }

    // [A_k | A_s | b]
    let cols = layout.total + 1;
    let mut stacked = DMatrix::zeros(rows, cols);
    let mut row = 0;
    for factor in &clique {
        for (k, block) in factor.terms() {
            stacked
                .view_mut((row, layout.offset(k)), (block.nrows(), block.ncols()))
                .copy_from(block);
        }
        stacked
            .view_mut((row, layout.total), (factor.rows(), 1))
            .copy_from(factor.rhs());
        row += factor.rows();
    }

    let r = stacked.qr().r();
    if let Some(i) = (0..dk).find(|&i| !(r[(i, i)].abs() > pivot_tolerance)) {
        return Err(LinAlgError::EliminationFailure {
            key,
            reason: format!("QR pivot {} at row {i} is below tolerance", r[(i, i)]),
        });
    }

    let ds = layout.separator_dim();
    let s = r.view((0, dk), (dk, ds)).clone_owned();
    let conditional = GaussianConditional {
        frontal: key,
        r: r.view((0, 0), (dk, dk)).upper_triangle(),
        parents: layout.split_separator(&s),
        d: r.view((0, layout.total), (dk, 1)).column(0).clone_owned(),
    };

    // Rows of R below the frontal block constrain the separator alone.
    let remaining = r.nrows() - dk;
    if ds > 0 && remaining > 0 {
        let a_s = r.view((dk, dk), (remaining, ds)).clone_owned();
        let b_s = r.view((dk, layout.total), (remaining, 1)).column(0).clone_owned();
        let terms = layout.split_separator(&a_s);
        working.push(Some(JacobianFactor::new(terms, b_s)?));
    }

    Ok(conditional)
}

fn eliminate_cholesky(
    key: Key,
    working: &mut Vec<Option<HessianFactor>>,
    dims: &DimensionMap,
    positions: &HashMap<Key, usize>,
    pivot_tolerance: f64,
) -> LinAlgResult<GaussianConditional> {
    let clique = take_clique(working, key);
    if clique.is_empty() {
        return Err(LinAlgError::EliminationFailure {
            key,
            reason: "no remaining factor constrains this variable".to_string(),
        });
    }
    let layout = CliqueLayout::new(key, &clique, dims, positions)?;
    let (dk, ds) = (layout.frontal_dim, layout.separator_dim());

    let mut information = DMatrix::zeros(layout.total, layout.total);
    let mut linear = DVector::zeros(layout.total);
    for factor in &clique {
        for (a, &key_a) in factor.keys.iter().enumerate() {
            let (local_a, dim_a, clique_a) =
                (factor.offsets[a], factor.dims[a], layout.offset(key_a));
            for i in 0..dim_a {
                linear[clique_a + i] += factor.linear[local_a + i];
            }
            for (b, &key_b) in factor.keys.iter().enumerate() {
                let (local_b, dim_b, clique_b) =
                    (factor.offsets[b], factor.dims[b], layout.offset(key_b));
                for i in 0..dim_a {
                    for j in 0..dim_b {
                        information[(clique_a + i, clique_b + j)] +=
                            factor.information[(local_a + i, local_b + j)];
                    }
                }
            }
        }
    }

    let h_kk = information.view((0, 0), (dk, dk)).clone_owned();
    let cholesky = nalgebra::Cholesky::new(h_kk).ok_or_else(|| LinAlgError::EliminationFailure {
        key,
        reason: "clique information matrix is not positive definite".to_string(),
    })?;
    let l = cholesky.l();
    if let Some(i) = (0..dk).find(|&i| !(l[(i, i)] * l[(i, i)] > pivot_tolerance)) {
        return Err(LinAlgError::EliminationFailure {
            key,
            reason: format!(
                "Cholesky pivot {} at row {i} is below tolerance",
                l[(i, i)] * l[(i, i)]
            ),
        });
    }

    let lower_solve = |rhs: DMatrix<f64>| {
        l.solve_lower_triangular(&rhs)
            .ok_or_else(|| LinAlgError::EliminationFailure {
                key,
                reason: "triangular solve failed".to_string(),
            })
    };
    let s = if ds > 0 {
        lower_solve(information.view((0, dk), (dk, ds)).clone_owned())?
    } else {
        DMatrix::zeros(dk, 0)
    };
    let d = lower_solve(DMatrix::from_column_slice(dk, 1, &linear.as_slice()[..dk]))?
        .column(0)
        .clone_owned();

    if ds > 0 {
        let s_t = s.transpose();
        let separator_information = information.view((dk, dk), (ds, ds)).clone_owned() - &s_t * &s;
        let separator_linear = linear.rows(dk, ds).clone_owned() - &s_t * &d;
        let sep_dims: Vec<usize> = layout.separator.iter().map(|&(_, dim)| dim).collect();
        working.push(Some(HessianFactor {
            keys: layout.separator.iter().map(|&(k, _)| k).collect(),
            offsets: running_offsets(&sep_dims),
            dims: sep_dims,
            information: separator_information,
            linear: separator_linear,
        }));
    }

    Ok(GaussianConditional {
        frontal: key,
        r: l.transpose(),
        parents: layout.split_separator(&s),
        d,
    })
}
