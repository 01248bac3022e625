//! Device memory and sparse Cholesky primitives.
//!
//! [`SparseDevice`] is the boundary to an accelerator runtime: explicit allocate/copy/free
//! calls plus a sparse Cholesky routine that reads a compressed row matrix resident in device
//! memory. Every primitive signals failure through [`DeviceError`].
//!
//! The device backend never calls `malloc`/`free` directly. It goes through the scoped guards
//! in [`buffer`], so every allocation is released on every exit path.
//!
//! Availability is a runtime property: [`DeviceCapability`] either holds a device or reports
//! [`LinAlgError::FeatureUnavailable`]. [`HostEmulatedDevice`] implements the primitives in
//! host memory for machines without an accelerator.

use crate::linalg::{LinAlgError, LinAlgResult};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod buffer;
pub mod emulated;

pub use buffer::{DeviceBuffer, DeviceElement, DeviceSystem};
pub use emulated::HostEmulatedDevice;

/// Singularity indicator returned by [`SparseDevice::csr_cholesky_solve`] when the
/// factorization succeeded. Any non-negative value is the row at which it broke down.
pub const SINGULARITY_NONE: i32 = -1;

/// Opaque device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

/// Opaque handle to a device solver context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SolverHandle(pub u64);

/// Failures reported by device primitives
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("out of device memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("invalid device pointer {0:?}")]
    InvalidPointer(DevicePtr),

    #[error("invalid solver handle {0:?}")]
    InvalidHandle(SolverHandle),

    #[error("copy size mismatch: device buffer holds {device} bytes, host side has {host}")]
    SizeMismatch { device: usize, host: usize },

    #[error("device routine failed: {0}")]
    LaunchFailed(String),
}

impl From<DeviceError> for LinAlgError {
    fn from(error: DeviceError) -> Self {
        LinAlgError::Device(error.to_string())
    }
}

/// Arguments of a device sparse Cholesky solve.
///
/// The matrix is `n x n` in zero-based compressed row form with 32-bit indices; only its
/// lower triangle is read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CsrCholeskyLaunch {
    pub n: usize,
    pub nnz: usize,
    pub row_ptr: DevicePtr,
    pub col_idx: DevicePtr,
    pub values: DevicePtr,
    pub rhs: DevicePtr,
    pub solution: DevicePtr,
    /// Pivots at or below this value are reported as singular
    pub tolerance: f64,
    /// Whether the routine may apply its own fill-reducing reordering
    pub reorder: bool,
}

/// Accelerator runtime primitives
pub trait SparseDevice: Send + Sync + fmt::Debug {
    /// Human-readable device name
    fn name(&self) -> &str;

    fn create_handle(&self) -> Result<SolverHandle, DeviceError>;

    fn destroy_handle(&self, handle: SolverHandle) -> Result<(), DeviceError>;

    /// Allocate `bytes` of device memory
    fn malloc(&self, bytes: usize) -> Result<DevicePtr, DeviceError>;

    fn free(&self, ptr: DevicePtr) -> Result<(), DeviceError>;

    /// Copy `src` into the allocation at `dst`; sizes must match exactly
    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), DeviceError>;

    /// Copy the allocation at `src` into `dst`; sizes must match exactly
    fn copy_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), DeviceError>;

    /// Factorize the lower triangle and solve, blocking until the result is in device memory.
    ///
    /// Returns [`SINGULARITY_NONE`] on success, otherwise the row at which the
    /// factorization broke down.
    fn csr_cholesky_solve(
        &self,
        handle: SolverHandle,
        launch: &CsrCholeskyLaunch,
    ) -> Result<i32, DeviceError>;
}

/// Interpret a singularity indicator: `None` on success, the failing row otherwise
pub fn decode_singularity(indicator: i32) -> LinAlgResult<Option<usize>> {
    match indicator {
        SINGULARITY_NONE => Ok(None),
        index if index >= 0 => Ok(Some(index as usize)),
        other => Err(LinAlgError::Device(format!(
            "unexpected singularity indicator {other}"
        ))),
    }
}

/// Runtime descriptor of the device solver capability
#[derive(Debug, Clone, Default)]
pub struct DeviceCapability {
    device: Option<Arc<dyn SparseDevice>>,
}

impl DeviceCapability {
    /// No device present
    pub fn unavailable() -> Self {
        Self { device: None }
    }

    pub fn new(device: Arc<dyn SparseDevice>) -> Self {
        Self {
            device: Some(device),
        }
    }

    /// Device primitives emulated in host memory
    pub fn host_emulated() -> Self {
        Self::new(Arc::new(HostEmulatedDevice::new()))
    }

    pub fn is_available(&self) -> bool {
        self.device.is_some()
    }

    /// Name of the device, if any
    pub fn name(&self) -> Option<&str> {
        self.device.as_deref().map(|d| d.name())
    }

    /// The device, or [`LinAlgError::FeatureUnavailable`]
    pub fn require(&self) -> LinAlgResult<Arc<dyn SparseDevice>> {
        self.device.clone().ok_or_else(|| {
            LinAlgError::FeatureUnavailable(
                "no sparse device is available for the device Cholesky backend".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_singularity() {
        assert_eq!(decode_singularity(SINGULARITY_NONE), Ok(None));
        assert_eq!(decode_singularity(0), Ok(Some(0)));
        assert_eq!(decode_singularity(7), Ok(Some(7)));
        assert!(matches!(decode_singularity(-5), Err(LinAlgError::Device(_))));
    }

    #[test]
    fn test_capability() {
        let none = DeviceCapability::unavailable();
        assert!(!none.is_available());
        assert!(matches!(
            none.require(),
            Err(LinAlgError::FeatureUnavailable(_))
        ));

        let emulated = DeviceCapability::host_emulated();
        assert!(emulated.is_available());
        assert_eq!(emulated.name(), Some("host-emulated"));
        assert!(emulated.require().is_ok());
    }

    #[test]
    fn test_device_error_converts() {
        let error: LinAlgError = DeviceError::OutOfMemory { requested: 64 }.into();
        assert_eq!(
            error,
            LinAlgError::Device("out of device memory: requested 64 bytes".to_string())
        );
    }
}
