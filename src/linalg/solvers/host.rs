//! Host sparse backend.
//!
//! Runs the whole system through one sparse factorization:
//! - Cholesky: assemble the normal equations and hand their upper triangle to the sparse
//!   Cholesky capability
//! - QR: assemble the augmented Jacobian `[A | b]` and hand it to the sparse QR capability

use crate::core::{GaussianFactorGraph, Ordering, VectorValues};
use crate::linalg::solvers::{LinearSolveStats, LinearSolverBackend};
use crate::linalg::{
    CholeskyOutcome, HostCholesky, HostQr, LinAlgError, LinAlgResult, LinearSolverConfig,
    SolverMethod, SparseCholeskyFactorization, SparseQrFactorization, assemble_jacobian,
    assemble_normal_equations, demultiplex,
};
use std::time::Instant;
use tracing::{debug, warn};

/// Sparse Cholesky or QR on the host
#[derive(Debug)]
pub struct HostSparseSolver {
    method: SolverMethod,
    ordering: Ordering,
    pivot_tolerance: f64,
    rank_tolerance: f64,
    parallel_assembly: bool,
    cholesky: Box<dyn SparseCholeskyFactorization>,
    qr: Box<dyn SparseQrFactorization>,
    stats: Option<LinearSolveStats>,
}

impl HostSparseSolver {
    pub fn new(method: SolverMethod, ordering: Ordering) -> Self {
        Self::from_config(&LinearSolverConfig::new().with_method(method), ordering)
    }

    pub fn from_config(config: &LinearSolverConfig, ordering: Ordering) -> Self {
        Self {
            method: config.method,
            ordering,
            pivot_tolerance: config.pivot_tolerance,
            rank_tolerance: config.rank_tolerance,
            parallel_assembly: config.parallel_assembly,
            cholesky: Box::new(HostCholesky),
            qr: Box::new(HostQr),
            stats: None,
        }
    }

    /// Replace the sparse Cholesky capability
    pub fn with_cholesky(mut self, cholesky: Box<dyn SparseCholeskyFactorization>) -> Self {
        self.cholesky = cholesky;
        self
    }

    /// Replace the sparse QR capability
    pub fn with_qr(mut self, qr: Box<dyn SparseQrFactorization>) -> Self {
        self.qr = qr;
        self
    }

    fn solve_cholesky(
        &self,
        graph: &GaussianFactorGraph,
    ) -> LinAlgResult<(VectorValues, LinearSolveStats)> {
        let start = Instant::now();
        let system = assemble_normal_equations(graph, &self.ordering, self.parallel_assembly)?;
        let outcome = self.cholesky.factorize_and_solve(
            &system.information,
            &system.rhs,
            self.pivot_tolerance,
        )?;

        let solution = match outcome {
            CholeskyOutcome::Solved(solution) => solution,
            CholeskyOutcome::Singular { index } => {
                warn!("Host Cholesky: normal equations are not positive definite");
                return Err(LinAlgError::NumericalSingularity {
                    index,
                    detail: "sparse Cholesky found a non-positive pivot".to_string(),
                });
            }
        };

        let values = demultiplex(&solution, &system.layout)?;
        let stats = LinearSolveStats {
            dimension: system.dimension(),
            rows: graph.total_residual_dimension(),
            nnz: system.nnz(),
            elapsed: start.elapsed(),
        };
        Ok((values, stats))
    }

    fn solve_qr(
        &self,
        graph: &GaussianFactorGraph,
    ) -> LinAlgResult<(VectorValues, LinearSolveStats)> {
        let start = Instant::now();
        let system = assemble_jacobian(graph, &self.ordering, self.parallel_assembly)?;
        let n = system.dimension();
        let result = self
            .qr
            .factorize_and_solve(&system.augmented(), self.rank_tolerance)?;

        if !result.is_full_rank(n) {
            warn!("Host QR: Jacobian has rank {} of {}", result.rank, n);
            return Err(LinAlgError::RankDeficiency {
                rank: result.rank,
                expected: n,
            });
        }

        let values = demultiplex(&result.solution, &system.layout)?;
        let stats = LinearSolveStats {
            dimension: n,
            rows: system.rows(),
            nnz: system.jacobian.nnz(),
            elapsed: start.elapsed(),
        };
        Ok((values, stats))
    }
}

impl LinearSolverBackend for HostSparseSolver {
    fn solve(&mut self, graph: &GaussianFactorGraph) -> LinAlgResult<VectorValues> {
        let (values, stats) = match self.method {
            SolverMethod::Cholesky => self.solve_cholesky(graph)?,
            SolverMethod::Qr => self.solve_qr(graph)?,
        };
        debug!("{} solve: {}", self.name(), stats);
        self.stats = Some(stats);
        Ok(values)
    }

    fn is_iterative(&self) -> bool {
        false
    }

    fn is_sequential(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        match self.method {
            SolverMethod::Cholesky => "HostCholesky",
            SolverMethod::Qr => "HostQR",
        }
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
