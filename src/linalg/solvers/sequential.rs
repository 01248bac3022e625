//! Sequential elimination backend.

use crate::core::{GaussianFactorGraph, Ordering, VectorValues};
use crate::linalg::solvers::{LinearSolveStats, LinearSolverBackend};
use crate::linalg::{LinAlgResult, LinearSolverConfig, SolverMethod, eliminate_sequential};
use std::time::Instant;
use tracing::debug;

/// Direct solve by dense per-clique elimination, without forming the global normal equations
#[derive(Debug, Clone)]
pub struct SequentialSolver {
    method: SolverMethod,
    ordering: Ordering,
    pivot_tolerance: f64,
    stats: Option<LinearSolveStats>,
}

impl SequentialSolver {
    pub fn new(method: SolverMethod, ordering: Ordering) -> Self {
        Self::from_config(&LinearSolverConfig::new().with_method(method), ordering)
    }

    pub fn from_config(config: &LinearSolverConfig, ordering: Ordering) -> Self {
        Self {
            method: config.method,
            ordering,
            pivot_tolerance: config.pivot_tolerance,
            stats: None,
        }
    }

    pub fn with_pivot_tolerance(mut self, tolerance: f64) -> Self {
        self.pivot_tolerance = tolerance;
        self
    }
}

impl LinearSolverBackend for SequentialSolver {
    fn solve(&mut self, graph: &GaussianFactorGraph) -> LinAlgResult<VectorValues> {
        let start = Instant::now();
        let bayes_net =
            eliminate_sequential(graph, &self.ordering, self.method, self.pivot_tolerance)?;
        let values = bayes_net.back_substitute()?;

        let stats = LinearSolveStats {
            dimension: values.total_dimension(),
            rows: graph.total_residual_dimension(),
            nnz: graph
                .iter()
                .flat_map(|f| f.blocks().iter().map(|b| b.len()))
                .sum(),
            elapsed: start.elapsed(),
        };
        debug!("Sequential solve: {}", stats);
        self.stats = Some(stats);
        Ok(values)
    }

    fn is_iterative(&self) -> bool {
        false
    }

    fn is_sequential(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Sequential"
    }

    fn method(&self) -> SolverMethod {
        self.method
    }

    fn ordering(&self) -> &Ordering {
        &self.ordering
    }

    fn last_stats(&self) -> Option<&LinearSolveStats> {
        self.stats.as_ref()
    }
}
