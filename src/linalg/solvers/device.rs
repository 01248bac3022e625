//! Device sparse Cholesky backend.
//!
//! Solve protocol:
//! 1. Assemble the normal equations on the host
//! 2. Transpose the upper triangle into the lower-triangle row layout the device routine reads,
//!    with 32-bit indices
//! 3. Allocate row pointers, column indices, values, right-hand side and solution buffers
//! 4. Upload matrix and right-hand side
//! 5. Run the device Cholesky with the configured tolerance and no internal reordering
//! 6. Decode the singularity indicator
//! 7. Download the solution; the buffer guards release device memory on every path
//! 8. Rebuild the column layout from the graph and the bound ordering and demultiplex
//!
//! The solver handle is created with the backend and destroyed when it is dropped.

use crate::core::{GaussianFactorGraph, Ordering, VectorValues};
use crate::linalg::assembly::column_layout;
use crate::linalg::device::{DeviceSystem, decode_singularity};
use crate::linalg::solvers::{LinearSolveStats, LinearSolverBackend};
use crate::linalg::{
    CompressedMatrix, DeviceCapability, LinAlgError, LinAlgResult, LinearSolverConfig,
    SolverHandle, SolverMethod, SparseDevice, assemble_normal_equations, demultiplex,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Sparse Cholesky on an accelerator device
#[derive(Debug)]
pub struct DeviceCholeskySolver {
    method: SolverMethod,
    ordering: Ordering,
    device: Arc<dyn SparseDevice>,
    handle: SolverHandle,
    tolerance: f64,
    parallel_assembly: bool,
    stats: Option<LinearSolveStats>,
}

/// Convert indices to the device's 32-bit form
fn device_indices(indices: &[usize], what: &str) -> LinAlgResult<Vec<i32>> {
    indices
        .iter()
        .map(|&i| {
            i32::try_from(i).map_err(|_| {
                LinAlgError::MatrixConversion(format!("{what} {i} does not fit a 32-bit index"))
            })
        })
        .collect()
}

impl DeviceCholeskySolver {
    /// Bind `method` and `ordering` to the device held by `capability`.
    ///
    /// Fails with `FeatureUnavailable` when no device is present. The method is checked at
    /// solve time.
    pub fn new(
        method: SolverMethod,
        ordering: Ordering,
        capability: &DeviceCapability,
    ) -> LinAlgResult<Self> {
        Self::from_config(
            &LinearSolverConfig::new().with_method(method),
            ordering,
            capability,
        )
    }

    pub fn from_config(
        config: &LinearSolverConfig,
        ordering: Ordering,
        capability: &DeviceCapability,
    ) -> LinAlgResult<Self> {
        let device = capability.require()?;
        let handle = device.create_handle()?;
        info!("Device Cholesky backend on {}", device.name());
        Ok(Self {
            method: config.method,
            ordering,
            device,
            handle,
            tolerance: config.device_tolerance,
            parallel_assembly: config.parallel_assembly,
            stats: None,
        })
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Steps 2-7: solve the upper-triangle normal equations on the device
    fn solve_on_device(&self, upper: &CompressedMatrix, rhs: &[f64]) -> LinAlgResult<Vec<f64>> {
        let n = upper.nrows();
        let lower = upper.transpose();
        let row_ptr = device_indices(lower.row_ptr(), "row pointer")?;
        let col_idx = device_indices(lower.col_idx(), "column index")?;
        i32::try_from(n).map_err(|_| {
            LinAlgError::MatrixConversion(format!("dimension {n} does not fit a 32-bit index"))
        })?;

        let device: &dyn SparseDevice = self.device.as_ref();
        let mut system = DeviceSystem::allocate(device, n, lower.nnz())?;
        system.upload(&row_ptr, &col_idx, lower.values(), rhs)?;

        let launch = system.launch(self.tolerance, false);
        let indicator = device.csr_cholesky_solve(self.handle, &launch)?;
        if let Some(index) = decode_singularity(indicator)? {
            warn!("Device Cholesky reported singularity at row {}", index);
            return Err(LinAlgError::NumericalSingularity {
                index: Some(index),
                detail: format!(
                    "device Cholesky pivot at row {index} is below tolerance {:.1e}",
                    self.tolerance
                ),
            });
        }

        system.solution.download()
    }
}

impl LinearSolverBackend for DeviceCholeskySolver {
    fn solve(&mut self, graph: &GaussianFactorGraph) -> LinAlgResult<VectorValues> {
        if self.method != SolverMethod::Cholesky {
            return Err(LinAlgError::UnsupportedOperation(format!(
                "{} is not supported by the device backend, only Cholesky",
                self.method
            )));
        }

        let start = Instant::now();
        let system = assemble_normal_equations(graph, &self.ordering, self.parallel_assembly)?;
        let solution = if system.dimension() == 0 {
            Vec::new()
        } else {
            self.solve_on_device(&system.information, &system.rhs)?
        };

        let layout = column_layout(graph, &self.ordering)?;
        if layout != system.layout {
            return Err(LinAlgError::LayoutMismatch(
                "solution layout differs from the assembly layout".to_string(),
            ));
        }
        let values = demultiplex(&solution, &layout)?;

        let stats = LinearSolveStats {
            dimension: system.dimension(),
            rows: graph.total_residual_dimension(),
            nnz: system.nnz(),
            elapsed: start.elapsed(),
        };
        debug!("Device Cholesky solve: {}", stats);
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
        "DeviceCholesky"
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

impl Drop for DeviceCholeskySolver {
    fn drop(&mut self) {
        if let Err(e) = self.device.destroy_handle(self.handle) {
            warn!("Failed to destroy device solver handle: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JacobianFactor, Key};
    use crate::linalg::HostEmulatedDevice;
    use nalgebra::{dmatrix, dvector};

    fn emulated() -> (Arc<HostEmulatedDevice>, DeviceCapability) {
        let device = Arc::new(HostEmulatedDevice::new());
        let capability = DeviceCapability::new(device.clone());
        (device, capability)
    }

    fn graph() -> GaussianFactorGraph {
        let x = Key::symbol('x', 0);
        let y = Key::symbol('y', 0);
        let mut graph = GaussianFactorGraph::new();
        graph.add(
            JacobianFactor::unary(x, dmatrix![1.0, 0.0; 0.0, 2.0], dvector![1.0, 4.0]).unwrap(),
        );
        graph.add(
            JacobianFactor::binary(x, dmatrix![-1.0, 0.0], y, dmatrix![1.0], dvector![1.0])
                .unwrap(),
        );
        graph
    }

    #[test]
    fn test_solve_releases_buffers() {
        let (device, capability) = emulated();
        let graph = graph();
        let mut solver = DeviceCholeskySolver::new(
            SolverMethod::Cholesky,
            Ordering::natural(&graph),
            &capability,
        )
        .unwrap();
        let values = solver.solve(&graph).unwrap();

        assert!((values.get(Key::symbol('x', 0)).unwrap() - dvector![1.0, 2.0]).norm() < 1e-10);
        assert!((values.get(Key::symbol('y', 0)).unwrap()[0] - 2.0).abs() < 1e-10);
        assert_eq!(device.malloc_calls(), 5);
        assert_eq!(device.live_allocations(), 0);
        assert_eq!(device.live_handles(), 1);

        drop(solver);
        assert_eq!(device.live_handles(), 0);
    }

    #[test]
    fn test_qr_is_rejected_before_allocation() {
        let (device, capability) = emulated();
        let graph = graph();
        let mut solver =
            DeviceCholeskySolver::new(SolverMethod::Qr, Ordering::natural(&graph), &capability)
                .unwrap();
        assert!(matches!(
            solver.solve(&graph),
            Err(LinAlgError::UnsupportedOperation(_))
        ));
        assert_eq!(device.malloc_calls(), 0);
    }

    #[test]
    fn test_unavailable_device() {
        let result = DeviceCholeskySolver::new(
            SolverMethod::Cholesky,
            Ordering::default(),
            &DeviceCapability::unavailable(),
        );
        assert!(matches!(result, Err(LinAlgError::FeatureUnavailable(_))));
    }

    #[test]
    fn test_singular_system_releases_buffers() {
        let (device, capability) = emulated();
        let a = Key::symbol('a', 0);
        let b = Key::symbol('b', 0);
        let mut graph = GaussianFactorGraph::new();
        graph.add(JacobianFactor::unary(a, dmatrix![1.0], dvector![1.0]).unwrap());
        graph.add(
            JacobianFactor::binary(a, dmatrix![1.0], b, dmatrix![0.0], dvector![0.0]).unwrap(),
        );

        let mut solver = DeviceCholeskySolver::new(
            SolverMethod::Cholesky,
            Ordering::natural(&graph),
            &capability,
        )
        .unwrap();
        let result = solver.solve(&graph);
        assert!(matches!(
            result,
            Err(LinAlgError::NumericalSingularity { index: Some(1), .. })
        ));
        assert_eq!(device.live_allocations(), 0);
    }
}
