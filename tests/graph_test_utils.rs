//! Shared utilities for solver integration tests
//!
//! Provides deterministic linear factor graphs and a dense reference solver to compare the
//! backends against.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use nalgebra::{DMatrix, DVector, dmatrix, dvector};
use sparse_linear_solver::{GaussianFactorGraph, JacobianFactor, Key, Ordering, VectorValues};

/// The three-variable chain
///
/// - `2a = 2`
/// - `b - a = 2`
/// - `0.5c = 1.5`
/// - `c - b = 0`
///
/// Exact solution: `a = 1`, `b = 3`, `c = 3`.
pub fn three_variable_chain() -> GaussianFactorGraph {
    let (a, b, c) = chain_keys();
    let mut graph = GaussianFactorGraph::new();
    graph.add(JacobianFactor::unary(a, dmatrix![2.0], dvector![2.0]).unwrap());
    graph.add(JacobianFactor::binary(a, dmatrix![-1.0], b, dmatrix![1.0], dvector![2.0]).unwrap());
    graph.add(JacobianFactor::unary(c, dmatrix![0.5], dvector![1.5]).unwrap());
    graph.add(JacobianFactor::binary(b, dmatrix![-1.0], c, dmatrix![1.0], dvector![0.0]).unwrap());
    graph
}

/// Keys `a`, `b`, `c` of [`three_variable_chain`]
pub fn chain_keys() -> (Key, Key, Key) {
    (Key::symbol('a', 0), Key::symbol('b', 0), Key::symbol('c', 0))
}

/// Expected solution of [`three_variable_chain`]
pub fn chain_solution() -> VectorValues {
    let (a, b, c) = chain_keys();
    [(a, dvector![1.0]), (b, dvector![3.0]), (c, dvector![3.0])]
        .into_iter()
        .collect()
}

/// Closed loop of five scalar unknowns tied only by weighted differences
///
/// Each factor is `w_i * (x_{i+1} - x_i) = w_i * (t_{i+1} - t_i)` for a ground truth `t`, with
/// the last factor closing `x_4 -> x_0`. The data is consistent but nothing anchors the loop,
/// so the system has rank 4.
pub fn consistent_loop() -> GaussianFactorGraph {
    let weights = [0.3, 0.7, 1.9, 0.45, 1.3];
    let truth = [0.0, 1.0, 3.0, 6.0, 10.0];
    let mut graph = GaussianFactorGraph::new();
    for (i, &w) in weights.iter().enumerate() {
        let j = (i + 1) % truth.len();
        graph.add(
            JacobianFactor::binary(
                Key::symbol('x', i as u64),
                dmatrix![-w],
                Key::symbol('x', j as u64),
                dmatrix![w],
                dvector![w * (truth[j] - truth[i])],
            )
            .unwrap(),
        );
    }
    graph
}

/// Planar rotation block with a small deterministic perturbation on the last column
fn odometry_block(angle: f64) -> DMatrix<f64> {
    let (s, c) = angle.sin_cos();
    dmatrix![
        c, -s, 0.1 * angle;
        s, c, -0.05 * angle;
        0.0, 0.0, 1.0
    ]
}

/// Deterministic right-hand side for factor `i`
fn measurement(i: usize) -> DVector<f64> {
    let t = i as f64;
    dvector![(t * 0.7).sin(), (t * 1.3).cos(), 0.1 * (t * 0.4).sin()]
}

/// Linearized 2D pose chain with `length` poses of dimension 3
///
/// - A prior on `x0`
/// - Odometry between consecutive poses: `R(θ) x_{i+1} - x_i = z_i`
/// - A loop closure every `loop_every` poses back to `x0` (0 disables them)
pub fn pose_chain(length: usize, loop_every: usize) -> GaussianFactorGraph {
    let mut graph = GaussianFactorGraph::new();
    if length == 0 {
        return graph;
    }

    let x = |i: usize| Key::symbol('x', i as u64);
    graph.add(
        JacobianFactor::unary(x(0), DMatrix::identity(3, 3), dvector![0.0, 0.0, 0.0]).unwrap(),
    );

    for i in 0..length.saturating_sub(1) {
        let angle = 0.3 * ((i as f64) * 0.9).sin();
        let factor = JacobianFactor::binary(
            x(i),
            -DMatrix::identity(3, 3),
            x(i + 1),
            odometry_block(angle),
            measurement(i),
        )
        .unwrap()
        .whitened(&dvector![0.5, 0.5, 0.1])
        .unwrap();
        graph.add(factor);
    }

    if loop_every > 0 {
        for i in (loop_every..length).step_by(loop_every) {
            let factor = JacobianFactor::binary(
                x(0),
                -DMatrix::identity(3, 3),
                x(i),
                odometry_block(0.1 * i as f64),
                measurement(length + i),
            )
            .unwrap();
            graph.add(factor);
        }
    }

    graph
}

/// Dense Jacobian `A` and right-hand side `b` under `ordering`
pub fn dense_system(
    graph: &GaussianFactorGraph,
    ordering: &Ordering,
) -> (DMatrix<f64>, DVector<f64>) {
    let dims = graph.dimensions().unwrap();
    let mut offsets = std::collections::HashMap::new();
    let mut n = 0;
    for key in ordering.iter() {
        offsets.insert(key, n);
        n += dims.get(key).unwrap();
    }

    let m = graph.total_residual_dimension();
    let mut a = DMatrix::zeros(m, n);
    let mut b = DVector::zeros(m);
    let mut row = 0;
    for factor in graph.iter() {
        let rows = factor.rows();
        for (key, block) in factor.terms() {
            let col = offsets[&key];
            a.view_mut((row, col), (rows, block.ncols())).copy_from(block);
        }
        b.rows_mut(row, rows).copy_from(factor.rhs());
        row += rows;
    }
    (a, b)
}

/// Least-squares solution by dense normal equations
pub fn dense_reference(graph: &GaussianFactorGraph) -> VectorValues {
    let ordering = Ordering::natural(graph);
    let (a, b) = dense_system(graph, &ordering);
    let at = a.transpose();
    let x = (&at * &a).cholesky().unwrap().solve(&(&at * &b));

    let dims = graph.dimensions().unwrap();
    let mut values = VectorValues::new();
    let mut offset = 0;
    for key in ordering.iter() {
        let dim = dims.get(key).unwrap();
        values.insert(key, x.rows(offset, dim).clone_owned());
        offset += dim;
    }
    values
}

/// Deterministic permutation of the natural ordering
pub fn shuffled_ordering(graph: &GaussianFactorGraph, stride: usize) -> Ordering {
    let keys: Vec<Key> = Ordering::natural(graph).iter().collect();
    let n = keys.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| ((i * stride) % n.max(1), i));
    Ordering::from_keys(order.into_iter().map(|i| keys[i]))
}
