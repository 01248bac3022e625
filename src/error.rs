//! Error types for the sparse-linear-solver library
//!
//! This module provides the top-level error and result types. Errors from the linear algebra
//! layer convert into [`SolverError`] with `?`; callers driving an iterative optimizer use
//! [`LinAlgError::at_iteration`] to record where a solve failed.

use crate::linalg::{LinAlgError, LinAlgErrorKind};
use thiserror::Error;

/// Main result type used throughout the library
pub type SolverResult<T> = Result<T, SolverError>;

/// Main error type for the library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// Linear algebra related errors
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(#[from] LinAlgError),

    /// A linear solve failed inside an outer iteration
    #[error("Linear solve failed at iteration {iteration} ({kind})")]
    IterationFailed {
        iteration: usize,
        kind: LinAlgErrorKind,
        #[source]
        source: LinAlgError,
    },

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SolverError {
    /// Kind of the underlying linear algebra error, if any
    pub fn linalg_kind(&self) -> Option<LinAlgErrorKind> {
        match self {
            SolverError::LinearAlgebra(e) => Some(e.kind()),
            SolverError::IterationFailed { kind, .. } => Some(*kind),
            SolverError::InvalidInput(_) => None,
        }
    }

    /// Iteration at which the error surfaced, if recorded
    pub fn iteration(&self) -> Option<usize> {
        match self {
            SolverError::IterationFailed { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_solver_error_display() {
        let error = SolverError::from(LinAlgError::FeatureUnavailable("no device".to_string()));
        assert_eq!(
            error.to_string(),
            "Linear algebra error: Feature unavailable: no device"
        );
    }

    #[test]
    fn test_at_iteration() {
        let error = LinAlgError::RankDeficiency {
            rank: 4,
            expected: 6,
        }
        .at_iteration(7);

        assert_eq!(
            error.to_string(),
            "Linear solve failed at iteration 7 (RankDeficiency)"
        );
        assert_eq!(error.iteration(), Some(7));
        assert_eq!(error.linalg_kind(), Some(LinAlgErrorKind::RankDeficiency));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_question_mark_conversion() {
        fn fails() -> SolverResult<()> {
            Err(LinAlgError::InvalidOrdering("missing key x0".to_string()))?;
            Ok(())
        }

        match fails() {
            Err(SolverError::LinearAlgebra(LinAlgError::InvalidOrdering(msg))) => {
                assert!(msg.contains("x0"))
            }
            other => panic!("Expected linear algebra error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_input_has_no_kind() {
        let error = SolverError::InvalidInput("chain length must be positive".to_string());
        assert_eq!(error.linalg_kind(), None);
        assert_eq!(error.iteration(), None);
    }
}
