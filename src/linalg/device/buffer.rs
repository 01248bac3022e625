//! Scoped device buffers.
//!
//! A [`DeviceBuffer`] owns one device allocation and frees it when dropped. Allocating the
//! buffers of a solve one after another with `?` therefore releases everything acquired so
//! far whenever a later step fails: the guards already bound go out of scope with the early
//! return.

use crate::linalg::device::{CsrCholeskyLaunch, DevicePtr, SparseDevice};
use crate::linalg::{LinAlgError, LinAlgResult};
use std::marker::PhantomData;
use tracing::{trace, warn};

/// Plain element type that can be moved to and from device memory
pub trait DeviceElement: Copy + Send {
    /// Size of one element in bytes
    const SIZE: usize;

    fn to_bytes(values: &[Self]) -> Vec<u8>;

    fn from_bytes(bytes: &[u8]) -> Vec<Self>;
}

macro_rules! impl_device_element {
    ($($t:ty),*) => {
        $(
            impl DeviceElement for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn to_bytes(values: &[Self]) -> Vec<u8> {
                    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
                }

                fn from_bytes(bytes: &[u8]) -> Vec<Self> {
                    bytes
                        .chunks_exact(Self::SIZE)
                        .map(|chunk| {
                            let mut raw = [0u8; std::mem::size_of::<$t>()];
                            raw.copy_from_slice(chunk);
                            <$t>::from_ne_bytes(raw)
                        })
                        .collect()
                }
            }
        )*
    };
}

impl_device_element!(f64, i32);

/// Device allocation of `len` elements of `T`, freed on drop
#[derive(Debug)]
pub struct DeviceBuffer<'a, T: DeviceElement> {
    device: &'a dyn SparseDevice,
    ptr: DevicePtr,
    len: usize,
    label: &'static str,
    _marker: PhantomData<T>,
}

impl<'a, T: DeviceElement> DeviceBuffer<'a, T> {
    /// Allocate room for `len` elements; `label` names the buffer in errors and logs
    pub fn allocate(
        device: &'a dyn SparseDevice,
        label: &'static str,
        len: usize,
    ) -> LinAlgResult<Self> {
        let bytes = len * T::SIZE;
        let ptr = device
            .malloc(bytes)
            .map_err(|e| LinAlgError::DeviceAllocationFailure {
                buffer: label,
                bytes,
                reason: e.to_string(),
            })?;
        trace!("Allocated device buffer {} ({} bytes) at {:?}", label, bytes, ptr);
        Ok(Self {
            device,
            ptr,
            len,
            label,
            _marker: PhantomData,
        })
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len * T::SIZE
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Copy `data` host to device; `data` must have exactly [`len`](Self::len) elements
    pub fn upload(&mut self, data: &[T]) -> LinAlgResult<()> {
        if data.len() != self.len {
            return Err(LinAlgError::Device(format!(
                "cannot upload {} elements into {} buffer of {}",
                data.len(),
                self.label,
                self.len
            )));
        }
        self.device.copy_to_device(self.ptr, &T::to_bytes(data))?;
        Ok(())
    }

    /// Copy the whole buffer device to host
    pub fn download(&self) -> LinAlgResult<Vec<T>> {
        let mut bytes = vec![0u8; self.byte_len()];
        self.device.copy_to_host(&mut bytes, self.ptr)?;
        Ok(T::from_bytes(&bytes))
    }
}

impl<T: DeviceElement> Drop for DeviceBuffer<'_, T> {
    fn drop(&mut self) {
        match self.device.free(self.ptr) {
            Ok(()) => trace!("Released device buffer {} at {:?}", self.label, self.ptr),
            Err(e) => warn!("Failed to release device buffer {}: {}", self.label, e),
        }
    }
}

/// The five device buffers of one Cholesky solve
#[derive(Debug)]
pub struct DeviceSystem<'a> {
    pub row_ptr: DeviceBuffer<'a, i32>,
    pub col_idx: DeviceBuffer<'a, i32>,
    pub values: DeviceBuffer<'a, f64>,
    pub rhs: DeviceBuffer<'a, f64>,
    pub solution: DeviceBuffer<'a, f64>,
}

impl<'a> DeviceSystem<'a> {
    /// Allocate row pointers, column indices, values, right-hand side and solution, in
    /// that order
    pub fn allocate(device: &'a dyn SparseDevice, n: usize, nnz: usize) -> LinAlgResult<Self> {
        let row_ptr = DeviceBuffer::allocate(device, "row pointers", n + 1)?;
        let col_idx = DeviceBuffer::allocate(device, "column indices", nnz)?;
        let values = DeviceBuffer::allocate(device, "values", nnz)?;
        let rhs = DeviceBuffer::allocate(device, "right-hand side", n)?;
        let solution = DeviceBuffer::allocate(device, "solution", n)?;
        Ok(Self {
            row_ptr,
            col_idx,
            values,
            rhs,
            solution,
        })
    }

    /// Copy the matrix and right-hand side host to device
    pub fn upload(
        &mut self,
        row_ptr: &[i32],
        col_idx: &[i32],
        values: &[f64],
        rhs: &[f64],
    ) -> LinAlgResult<()> {
        self.row_ptr.upload(row_ptr)?;
        self.col_idx.upload(col_idx)?;
        self.values.upload(values)?;
        self.rhs.upload(rhs)
    }

    /// Launch arguments for these buffers
    pub fn launch(&self, tolerance: f64, reorder: bool) -> CsrCholeskyLaunch {
        CsrCholeskyLaunch {
            n: self.rhs.len(),
            nnz: self.values.len(),
            row_ptr: self.row_ptr.ptr(),
            col_idx: self.col_idx.ptr(),
            values: self.values.ptr(),
            rhs: self.rhs.ptr(),
            solution: self.solution.ptr(),
            tolerance,
            reorder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::HostEmulatedDevice;

    #[test]
    fn test_element_bytes() {
        let values = [1.5f64, -2.0];
        assert_eq!(f64::from_bytes(&f64::to_bytes(&values)), values.to_vec());
        let indices = [0i32, 7, -1];
        assert_eq!(i32::to_bytes(&indices).len(), 12);
    }

    #[test]
    fn test_buffer_released_on_drop() {
        let device = HostEmulatedDevice::new();
        {
            let mut buffer = DeviceBuffer::<f64>::allocate(&device, "values", 3).unwrap();
            assert_eq!(device.live_allocations(), 1);
            assert_eq!(device.live_bytes(), 24);
            buffer.upload(&[1.0, 2.0, 3.0]).unwrap();
            assert_eq!(buffer.download().unwrap(), vec![1.0, 2.0, 3.0]);
            assert!(buffer.upload(&[1.0]).is_err());
        }
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_system_allocation_failure_releases_earlier_buffers() {
        for step in 1..=5 {
            let device = HostEmulatedDevice::new();
            device.fail_allocation_at(step);
            let result = DeviceSystem::allocate(&device, 4, 10);
            assert!(matches!(
                result,
                Err(LinAlgError::DeviceAllocationFailure { .. })
            ));
            assert_eq!(device.malloc_calls(), step);
            assert_eq!(device.live_allocations(), 0);
        }
    }
}
