//! Linear solver backends.
//!
//! Every backend implements [`LinearSolverBackend`]. The ordering and the factorization method
//! are bound at construction and never change; `solve` takes a linear factor graph and returns
//! one vector per variable.
//!
//! | Backend | Methods | Failure on a singular system |
//! |---------|---------|------------------------------|
//! | [`SequentialSolver`] | QR, Cholesky (per clique) | `EliminationFailure` |
//! | [`HostSparseSolver`] | Cholesky (normal equations) | `NumericalSingularity` |
//! | [`HostSparseSolver`] | QR (augmented Jacobian) | `RankDeficiency` |
//! | [`DeviceCholeskySolver`] | Cholesky only | `NumericalSingularity` |
//!
//! A backend instance is not meant to be shared between threads; give each thread its own.

use crate::core::{GaussianFactorGraph, Ordering, VectorValues};
use crate::linalg::{BackendKind, DeviceCapability, LinAlgResult, LinearSolverConfig, SolverMethod};
use std::fmt;
use std::time::Duration;
use tracing::info;

pub mod device;
pub mod host;
pub mod sequential;

pub use device::DeviceCholeskySolver;
pub use host::HostSparseSolver;
pub use sequential::SequentialSolver;

/// Sizes and timing of the last solve
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSolveStats {
    /// Number of unknowns
    pub dimension: usize,
    /// Number of measurement rows
    pub rows: usize,
    /// Stored entries of the factorized matrix (Jacobian blocks for the sequential backend)
    pub nnz: usize,
    /// Wall-clock time of the solve
    pub elapsed: Duration,
}

impl fmt::Display for LinearSolveStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dimension: {}, rows: {}, nnz: {}, time: {:.3} ms",
            self.dimension,
            self.rows,
            self.nnz,
            self.elapsed.as_secs_f64() * 1000.0
        )
    }
}

/// Common interface of the linear solver backends
pub trait LinearSolverBackend: Send {
    /// Solve the least-squares problem of `graph` under the bound ordering.
    ///
    /// The result holds exactly the keys referenced by the graph.
    fn solve(&mut self, graph: &GaussianFactorGraph) -> LinAlgResult<VectorValues>;

    /// Whether the backend solves iteratively
    fn is_iterative(&self) -> bool;

    /// Whether the backend eliminates variables one at a time
    fn is_sequential(&self) -> bool;

    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Factorization method bound at construction
    fn method(&self) -> SolverMethod;

    /// Ordering bound at construction
    fn ordering(&self) -> &Ordering;

    /// Statistics of the last successful solve
    fn last_stats(&self) -> Option<&LinearSolveStats>;
}

/// Create the backend selected by `config`.
///
/// Device backends fail with `FeatureUnavailable` here when `capability` holds no device.
pub fn create_linear_solver(
    config: &LinearSolverConfig,
    ordering: Ordering,
    capability: &DeviceCapability,
) -> LinAlgResult<Box<dyn LinearSolverBackend>> {
    let backend: Box<dyn LinearSolverBackend> = match config.backend {
        BackendKind::Sequential => Box::new(SequentialSolver::from_config(config, ordering)),
        BackendKind::HostSparse => Box::new(HostSparseSolver::from_config(config, ordering)),
        BackendKind::Device => Box::new(DeviceCholeskySolver::from_config(
            config, ordering, capability,
        )?),
    };
    info!(
        "Created {} linear solver ({} keys)",
        backend.name(),
        backend.ordering().len()
    );
    Ok(backend)
}
