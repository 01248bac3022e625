//! Device primitives emulated in host memory.
//!
//! [`HostEmulatedDevice`] keeps every allocation in a byte vector behind a mutex and runs
//! the Cholesky routine with [`HostCholesky`]. It honours the same contract as a real device
//! (exact-size copies, explicit frees, handle lifetimes, singularity indicator) and adds
//! accounting and failure injection so the device backend's resource discipline can be
//! checked without an accelerator.

use crate::linalg::cholesky::{CholeskyOutcome, HostCholesky, SparseCholeskyFactorization};
use crate::linalg::device::{
    CsrCholeskyLaunch, DeviceElement, DeviceError, DevicePtr, SINGULARITY_NONE, SolverHandle,
    SparseDevice,
};
use crate::linalg::CompressedMatrix;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct EmulatorState {
    next_id: u64,
    allocations: HashMap<u64, Vec<u8>>,
    handles: HashSet<u64>,
    malloc_calls: usize,
    fail_at: Option<usize>,
}

impl EmulatorState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, ptr: DevicePtr) -> Result<&Vec<u8>, DeviceError> {
        self.allocations
            .get(&ptr.0)
            .ok_or(DeviceError::InvalidPointer(ptr))
    }

    fn read<T: DeviceElement>(&self, ptr: DevicePtr, len: usize) -> Result<Vec<T>, DeviceError> {
        let bytes = self.buffer(ptr)?;
        if bytes.len() != len * T::SIZE {
            return Err(DeviceError::SizeMismatch {
                device: bytes.len(),
                host: len * T::SIZE,
            });
        }
        Ok(T::from_bytes(bytes))
    }

    fn live_bytes(&self) -> usize {
        self.allocations.values().map(Vec::len).sum()
    }
}

/// Sparse device emulated in host memory
#[derive(Debug, Default)]
pub struct HostEmulatedDevice {
    state: Mutex<EmulatorState>,
    memory_limit: Option<usize>,
}

impl HostEmulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulated device with a fixed amount of memory
    pub fn with_memory_limit(bytes: usize) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, EmulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the `n`-th `malloc` call from now on (1-based) fail with out-of-memory
    pub fn fail_allocation_at(&self, n: usize) {
        let mut state = self.state();
        state.fail_at = Some(state.malloc_calls + n);
    }

    /// Number of allocations not yet freed
    pub fn live_allocations(&self) -> usize {
        self.state().allocations.len()
    }

    /// Bytes held by allocations not yet freed
    pub fn live_bytes(&self) -> usize {
        self.state().live_bytes()
    }

    /// Number of solver handles not yet destroyed
    pub fn live_handles(&self) -> usize {
        self.state().handles.len()
    }

    /// Total number of `malloc` calls, failed ones included
    pub fn malloc_calls(&self) -> usize {
        self.state().malloc_calls
    }
}

fn launch_error(message: impl Into<String>) -> DeviceError {
    DeviceError::LaunchFailed(message.into())
}

fn to_usize(values: Vec<i32>) -> Result<Vec<usize>, DeviceError> {
    values
        .into_iter()
        .map(|v| usize::try_from(v).map_err(|_| launch_error(format!("negative index {v}"))))
        .collect()
}

impl SparseDevice for HostEmulatedDevice {
    fn name(&self) -> &str {
        "host-emulated"
    }

    fn create_handle(&self) -> Result<SolverHandle, DeviceError> {
        let mut state = self.state();
        let id = state.next_id();
        state.handles.insert(id);
        Ok(SolverHandle(id))
    }

    fn destroy_handle(&self, handle: SolverHandle) -> Result<(), DeviceError> {
        if self.state().handles.remove(&handle.0) {
            Ok(())
        } else {
            Err(DeviceError::InvalidHandle(handle))
        }
    }

    fn malloc(&self, bytes: usize) -> Result<DevicePtr, DeviceError> {
        let mut state = self.state();
        state.malloc_calls += 1;
        if state.fail_at == Some(state.malloc_calls) {
            state.fail_at = None;
            return Err(DeviceError::OutOfMemory { requested: bytes });
        }
        if let Some(limit) = self.memory_limit {
            if state.live_bytes() + bytes > limit {
                return Err(DeviceError::OutOfMemory { requested: bytes });
            }
        }
        let id = state.next_id();
        state.allocations.insert(id, vec![0; bytes]);
        Ok(DevicePtr(id))
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), DeviceError> {
        self.state()
            .allocations
            .remove(&ptr.0)
            .map(|_| ())
            .ok_or(DeviceError::InvalidPointer(ptr))
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state();
        let buffer = state
            .allocations
            .get_mut(&dst.0)
            .ok_or(DeviceError::InvalidPointer(dst))?;
        if buffer.len() != src.len() {
            return Err(DeviceError::SizeMismatch {
                device: buffer.len(),
                host: src.len(),
            });
        }
        buffer.copy_from_slice(src);
        Ok(())
    }

    fn copy_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), DeviceError> {
        let state = self.state();
        let buffer = state.buffer(src)?;
        if buffer.len() != dst.len() {
            return Err(DeviceError::SizeMismatch {
                device: buffer.len(),
                host: dst.len(),
            });
        }
        dst.copy_from_slice(buffer);
        Ok(())
    }

    fn csr_cholesky_solve(
        &self,
        handle: SolverHandle,
        launch: &CsrCholeskyLaunch,
    ) -> Result<i32, DeviceError> {
        let mut state = self.state();
        if !state.handles.contains(&handle.0) {
            return Err(DeviceError::InvalidHandle(handle));
        }
        if launch.reorder {
            debug!("Emulated device ignores the reordering flag");
        }

        let n = launch.n;
        let row_ptr = to_usize(state.read::<i32>(launch.row_ptr, n + 1)?)?;
        let col_idx = to_usize(state.read::<i32>(launch.col_idx, launch.nnz)?)?;
        let values = state.read::<f64>(launch.values, launch.nnz)?;
        let rhs = state.read::<f64>(launch.rhs, n)?;

        let lower = CompressedMatrix::from_raw_parts(n, n, row_ptr, col_idx, values)
            .map_err(|e| launch_error(e.to_string()))?;
        if !lower.is_lower_triangular() {
            return Err(launch_error("matrix has entries above the diagonal"));
        }

        let outcome = HostCholesky
            .factorize_and_solve(&lower.transpose(), &rhs, launch.tolerance)
            .map_err(|e| launch_error(e.to_string()))?;
        match outcome {
            CholeskyOutcome::Solved(x) => {
                let solution = state
                    .allocations
                    .get_mut(&launch.solution.0)
                    .ok_or(DeviceError::InvalidPointer(launch.solution))?;
                let bytes = f64::to_bytes(&x);
                if solution.len() != bytes.len() {
                    return Err(DeviceError::SizeMismatch {
                        device: solution.len(),
                        host: bytes.len(),
                    });
                }
                solution.copy_from_slice(&bytes);
                Ok(SINGULARITY_NONE)
            }
            // A breakdown the factorization cannot localize is reported at row 0.
            CholeskyOutcome::Singular { index } => i32::try_from(index.unwrap_or(0))
                .map_err(|_| launch_error("singular row does not fit the indicator")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload<T: DeviceElement>(device: &HostEmulatedDevice, values: &[T]) -> DevicePtr {
        let ptr = device.malloc(values.len() * T::SIZE).unwrap();
        device.copy_to_device(ptr, &T::to_bytes(values)).unwrap();
        ptr
    }

    fn launch(device: &HostEmulatedDevice, diagonal: [f64; 2]) -> CsrCholeskyLaunch {
        // lower triangle of [d0 1; 1 d1]
        CsrCholeskyLaunch {
            n: 2,
            nnz: 3,
            row_ptr: upload(device, &[0i32, 1, 3]),
            col_idx: upload(device, &[0i32, 0, 1]),
            values: upload(device, &[diagonal[0], 1.0, diagonal[1]]),
            rhs: upload(device, &[3.0f64, 3.0]),
            solution: upload(device, &[0.0f64, 0.0]),
            tolerance: 1e-5,
            reorder: false,
        }
    }

    #[test]
    fn test_solve_writes_solution() {
        let device = HostEmulatedDevice::new();
        let handle = device.create_handle().unwrap();
        let args = launch(&device, [2.0, 2.0]);

        assert_eq!(device.csr_cholesky_solve(handle, &args), Ok(SINGULARITY_NONE));
        let mut bytes = vec![0u8; 16];
        device.copy_to_host(&mut bytes, args.solution).unwrap();
        let x = f64::from_bytes(&bytes);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_indicator() {
        let device = HostEmulatedDevice::new();
        let handle = device.create_handle().unwrap();
        let args = launch(&device, [1.0, 0.0]);
        assert_eq!(device.csr_cholesky_solve(handle, &args), Ok(1));
    }

    #[test]
    fn test_accounting_and_failure_injection() {
        let device = HostEmulatedDevice::with_memory_limit(64);
        let a = device.malloc(32).unwrap();
        assert!(device.malloc(40).is_err());

        device.fail_allocation_at(2);
        let b = device.malloc(8).unwrap();
        assert_eq!(
            device.malloc(8),
            Err(DeviceError::OutOfMemory { requested: 8 })
        );
        assert_eq!(device.live_allocations(), 2);
        assert_eq!(device.live_bytes(), 40);

        device.free(a).unwrap();
        device.free(b).unwrap();
        assert_eq!(device.free(b), Err(DeviceError::InvalidPointer(b)));
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_handles_and_copy_checks() {
        let device = HostEmulatedDevice::new();
        let handle = device.create_handle().unwrap();
        assert_eq!(device.live_handles(), 1);
        device.destroy_handle(handle).unwrap();
        assert!(device.destroy_handle(handle).is_err());
        assert_eq!(device.live_handles(), 0);

        let ptr = device.malloc(8).unwrap();
        assert!(matches!(
            device.copy_to_device(ptr, &[0u8; 4]),
            Err(DeviceError::SizeMismatch { .. })
        ));
    }
}
