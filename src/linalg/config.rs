//! Linear solver configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Factorization method bound to a backend at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SolverMethod {
    /// Cholesky on the normal equations (or on per-clique information matrices)
    #[default]
    Cholesky,
    /// QR on the Jacobian (or on per-clique stacked Jacobians)
    Qr,
}

impl fmt::Display for SolverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverMethod::Cholesky => write!(f, "Cholesky"),
            SolverMethod::Qr => write!(f, "QR"),
        }
    }
}

/// Backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Dense per-clique variable elimination
    Sequential,
    /// Host sparse factorization of the whole system
    #[default]
    HostSparse,
    /// Device sparse Cholesky
    Device,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sequential => write!(f, "Sequential"),
            BackendKind::HostSparse => write!(f, "Host Sparse"),
            BackendKind::Device => write!(f, "Device"),
        }
    }
}

/// Configuration for creating a linear solver backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSolverConfig {
    /// Backend family
    pub backend: BackendKind,
    /// Factorization method
    pub method: SolverMethod,
    /// Pivot threshold handed to the device Cholesky routine
    pub device_tolerance: f64,
    /// Pivots at or below this value are treated as singular on the host paths
    pub pivot_tolerance: f64,
    /// Jacobian columns with norm at or below this value are treated as rank deficient
    pub rank_tolerance: f64,
    /// Linearize factor contributions in parallel
    pub parallel_assembly: bool,
}

impl Default for LinearSolverConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            method: SolverMethod::default(),
            device_tolerance: 1e-5,
            pivot_tolerance: 1e-10,
            rank_tolerance: 1e-10,
            parallel_assembly: true,
        }
    }
}

impl LinearSolverConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend family
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the factorization method
    pub fn with_method(mut self, method: SolverMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the device Cholesky tolerance
    pub fn with_device_tolerance(mut self, tolerance: f64) -> Self {
        self.device_tolerance = tolerance;
        self
    }

    /// Set the host pivot tolerance
    pub fn with_pivot_tolerance(mut self, tolerance: f64) -> Self {
        self.pivot_tolerance = tolerance;
        self
    }

    /// Set the QR column tolerance
    pub fn with_rank_tolerance(mut self, tolerance: f64) -> Self {
        self.rank_tolerance = tolerance;
        self
    }

    /// Enable or disable parallel assembly
    pub fn with_parallel_assembly(mut self, parallel: bool) -> Self {
        self.parallel_assembly = parallel;
        self
    }
}

impl fmt::Display for LinearSolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LinearSolverConfig {{ backend: {}, method: {}, device_tolerance: {:.1e}, \
             pivot_tolerance: {:.1e}, rank_tolerance: {:.1e}, parallel_assembly: {} }}",
            self.backend,
            self.method,
            self.device_tolerance,
            self.pivot_tolerance,
            self.rank_tolerance,
            self.parallel_assembly
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LinearSolverConfig::default();
        assert_eq!(config.backend, BackendKind::HostSparse);
        assert_eq!(config.method, SolverMethod::Cholesky);
        assert_eq!(config.device_tolerance, 1e-5);
        assert!(config.parallel_assembly);
    }

    #[test]
    fn test_config_builder() {
        let config = LinearSolverConfig::new()
            .with_backend(BackendKind::Device)
            .with_method(SolverMethod::Qr)
            .with_parallel_assembly(false);
        assert_eq!(config.backend, BackendKind::Device);
        assert_eq!(config.method, SolverMethod::Qr);
        assert!(!config.parallel_assembly);
        assert!(config.to_string().contains("backend: Device"));
    }
}
