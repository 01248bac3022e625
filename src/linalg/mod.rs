//! Linear algebra layer.
//!
//! This module turns a [`GaussianFactorGraph`](crate::core::GaussianFactorGraph) into a sparse
//! linear system, hands it to one of the solver backends and maps the flat solution back to
//! per-variable vectors:
//! - [`assembly`]: Jacobian and normal-equation assembly in compressed row form
//! - [`cholesky`] / [`qr`]: host sparse factorization capabilities backed by faer
//! - [`elimination`]: dense per-clique sequential elimination
//! - [`device`]: device memory primitives and the scoped buffer guards used by the device backend
//! - [`solvers`]: the backend implementations and the factory
//! - [`demux`]: solution demultiplexing

use crate::core::Key;
use std::fmt;
use thiserror::Error;

pub mod assembly;
pub mod cholesky;
pub mod compressed;
pub mod config;
pub mod demux;
pub mod device;
pub mod elimination;
pub mod qr;
pub mod solvers;

pub use assembly::{JacobianSystem, NormalEquations, assemble_jacobian, assemble_normal_equations};
pub use cholesky::{CholeskyOutcome, HostCholesky, SparseCholeskyFactorization};
pub use compressed::CompressedMatrix;
pub use config::{BackendKind, LinearSolverConfig, SolverMethod};
pub use demux::demultiplex;
pub use device::{
    DeviceCapability, DeviceError, DevicePtr, HostEmulatedDevice, SINGULARITY_NONE, SolverHandle,
    SparseDevice,
};
pub use elimination::{GaussianBayesNet, GaussianConditional, eliminate_sequential};
pub use qr::{HostQr, QrSolution, SparseQrFactorization};
pub use solvers::{
    DeviceCholeskySolver, HostSparseSolver, LinearSolveStats, LinearSolverBackend,
    SequentialSolver, create_linear_solver,
};

/// Errors raised by the linear solver layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinAlgError {
    /// A key is referenced with two different dimensions
    #[error("Inconsistent dimension for key {key}: {existing} vs {found}")]
    InconsistentDimension {
        key: Key,
        existing: usize,
        found: usize,
    },

    /// The ordering is not a permutation of the graph's keys
    #[error("Invalid ordering: {0}")]
    InvalidOrdering(String),

    /// The requested method is not supported by the backend
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A device buffer could not be allocated
    #[error("Device allocation failed for {buffer} ({bytes} bytes): {reason}")]
    DeviceAllocationFailure {
        buffer: &'static str,
        bytes: usize,
        reason: String,
    },

    /// Cholesky factorization found a non-positive pivot
    #[error(
        "Numerically singular system{}: {detail}",
        .index.map(|i| format!(" at column {i}")).unwrap_or_default()
    )]
    NumericalSingularity { index: Option<usize>, detail: String },

    /// QR factorization revealed a rank lower than the number of unknowns
    #[error("Rank deficient system: rank {rank} < {expected}")]
    RankDeficiency { rank: usize, expected: usize },

    /// Sequential elimination could not eliminate a variable
    #[error("Elimination failed at key {key}: {reason}")]
    EliminationFailure { key: Key, reason: String },

    /// The backend needs a capability that is not present
    #[error("Feature unavailable: {0}")]
    FeatureUnavailable(String),

    /// A factor was constructed with malformed blocks
    #[error("Invalid factor: {0}")]
    InvalidFactor(String),

    /// Conversion to the factorization library's matrix types failed
    #[error("Matrix conversion failed: {0}")]
    MatrixConversion(String),

    /// The solution vector does not match the column layout
    #[error("Solution layout mismatch: {0}")]
    LayoutMismatch(String),

    /// A device copy or launch failed
    #[error("Device error: {0}")]
    Device(String),
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Discriminant of [`LinAlgError`], used by callers to pick a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinAlgErrorKind {
    InconsistentDimension,
    InvalidOrdering,
    UnsupportedOperation,
    DeviceAllocationFailure,
    NumericalSingularity,
    RankDeficiency,
    EliminationFailure,
    FeatureUnavailable,
    InvalidFactor,
    MatrixConversion,
    LayoutMismatch,
    Device,
}

impl LinAlgErrorKind {
    /// Whether the failure is a property of the linear system rather than of the backend.
    ///
    /// Numerical kinds may succeed with another ordering or after damping; the others will not.
    pub fn is_numerical(self) -> bool {
        matches!(
            self,
            LinAlgErrorKind::NumericalSingularity
                | LinAlgErrorKind::RankDeficiency
                | LinAlgErrorKind::EliminationFailure
        )
    }
}

impl fmt::Display for LinAlgErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinAlgErrorKind::InconsistentDimension => "InconsistentDimension",
            LinAlgErrorKind::InvalidOrdering => "InvalidOrdering",
            LinAlgErrorKind::UnsupportedOperation => "UnsupportedOperation",
            LinAlgErrorKind::DeviceAllocationFailure => "DeviceAllocationFailure",
            LinAlgErrorKind::NumericalSingularity => "NumericalSingularity",
            LinAlgErrorKind::RankDeficiency => "RankDeficiency",
            LinAlgErrorKind::EliminationFailure => "EliminationFailure",
            LinAlgErrorKind::FeatureUnavailable => "FeatureUnavailable",
            LinAlgErrorKind::InvalidFactor => "InvalidFactor",
            LinAlgErrorKind::MatrixConversion => "MatrixConversion",
            LinAlgErrorKind::LayoutMismatch => "LayoutMismatch",
            LinAlgErrorKind::Device => "Device",
        };
        write!(f, "{name}")
    }
}

impl LinAlgError {
    /// Kind of this error
    pub fn kind(&self) -> LinAlgErrorKind {
        match self {
            LinAlgError::InconsistentDimension { .. } => LinAlgErrorKind::InconsistentDimension,
            LinAlgError::InvalidOrdering(_) => LinAlgErrorKind::InvalidOrdering,
            LinAlgError::UnsupportedOperation(_) => LinAlgErrorKind::UnsupportedOperation,
            LinAlgError::DeviceAllocationFailure { .. } => {
                LinAlgErrorKind::DeviceAllocationFailure
            }
            LinAlgError::NumericalSingularity { .. } => LinAlgErrorKind::NumericalSingularity,
            LinAlgError::RankDeficiency { .. } => LinAlgErrorKind::RankDeficiency,
            LinAlgError::EliminationFailure { .. } => LinAlgErrorKind::EliminationFailure,
            LinAlgError::FeatureUnavailable(_) => LinAlgErrorKind::FeatureUnavailable,
            LinAlgError::InvalidFactor(_) => LinAlgErrorKind::InvalidFactor,
            LinAlgError::MatrixConversion(_) => LinAlgErrorKind::MatrixConversion,
            LinAlgError::LayoutMismatch(_) => LinAlgErrorKind::LayoutMismatch,
            LinAlgError::Device(_) => LinAlgErrorKind::Device,
        }
    }

    /// Attach the optimizer iteration at which this error surfaced
    pub fn at_iteration(self, iteration: usize) -> crate::error::SolverError {
        crate::error::SolverError::IterationFailed {
            iteration,
            kind: self.kind(),
            source: self,
        }
    }
}
