//! # Sparse Linear Solver
//!
//! The linear-solve layer of a nonlinear least-squares optimizer. Each iteration of the outer
//! optimizer linearizes its problem into a [`GaussianFactorGraph`] of Jacobian factors; this
//! crate solves that graph for the per-variable update vectors.
//!
//! ## Backends
//!
//! - **Sequential**: dense per-clique elimination (QR or Cholesky) into a Bayes net, followed by
//!   back-substitution
//! - **Host sparse Cholesky**: upper-triangle normal equations factorized with faer
//! - **Host sparse QR**: augmented Jacobian `[A | b]` solved in the least-squares sense with faer
//! - **Device Cholesky**: normal equations copied to an accelerator device behind scoped buffers
//!
//! Backends are selected with a [`LinearSolverConfig`] through [`create_linear_solver`]:
//!
//! ```no_run
//! use sparse_linear_solver::{
//!     BackendKind, DeviceCapability, GaussianFactorGraph, LinearSolverConfig, Ordering,
//!     SolverMethod, create_linear_solver,
//! };
//!
//! # fn run(graph: &GaussianFactorGraph) -> Result<(), sparse_linear_solver::SolverError> {
//! let config = LinearSolverConfig::new()
//!     .with_backend(BackendKind::HostSparse)
//!     .with_method(SolverMethod::Cholesky);
//! let mut solver =
//!     create_linear_solver(&config, Ordering::natural(graph), &DeviceCapability::unavailable())?;
//! let delta = solver.solve(graph)?;
//! println!("{delta}");
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod linalg;
pub mod logger;

pub use core::{
    ColumnLayout, DimensionMap, FactorGraphStatistics, GaussianFactorGraph, JacobianFactor, Key,
    Ordering, VectorValues,
};
pub use error::{SolverError, SolverResult};
pub use linalg::{
    BackendKind, DeviceCapability, DeviceCholeskySolver, HostEmulatedDevice, HostSparseSolver,
    LinAlgError, LinAlgErrorKind, LinAlgResult, LinearSolveStats, LinearSolverBackend,
    LinearSolverConfig, SequentialSolver, SolverMethod, SparseDevice, create_linear_solver,
};
pub use logger::{init_logger, init_logger_with_level};
