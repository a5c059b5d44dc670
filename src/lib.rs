//! Parallel algorithms over data on OpenCL devices.
//!
//! Kernels are generated at runtime for the element type, the kind of input and the predicate,
//! and then built for the device. Built programs are cached in memory per [`Queue`] and on disk,
//! see [`Settings`].
//!
//! ```no_run
//! use rust_gpu_compute::lambda::_1;
//! use rust_gpu_compute::{count, count_if, GPUError, Queue};
//!
//! let queue = Queue::default_queue()?;
//! let data = queue.create_buffer_from_slice(&[1, 2, 1, 2, 3])?;
//! assert_eq!(count(&queue, &data, 1)?, 2);
//! assert_eq!(count(&queue, &data.slice(1..)?, 1)?, 1);
//! assert_eq!(count_if(&queue, &data, _1.gt(1))?, 3);
//! # Ok::<(), GPUError>(())
//! ```
//!
//! Device selection
//! ----------------
//!
//! [`Queue::default_queue`] runs on the first GPU that is found. The choice can be changed with
//! environment variables, e.g. `RUST_GPU_COMPUTE_DEFAULT_DEVICE_TYPE=CPU`, see [`Settings`].

#![warn(missing_docs)]

pub mod algorithm;
mod config;
mod device;
mod error;
pub mod iterator;
pub mod lambda;
pub mod meta_kernel;
pub mod opencl;
mod program_cache;
pub mod types;

pub use algorithm::{count, count_if};
pub use config::{settings, Settings};
pub use device::{Device, DeviceKind, DeviceUuid, PciId, UniqueId, Vendor};
pub use error::{GPUError, GPUResult};
pub use iterator::{BufferSlice, ConstantRange, CountingRange, DeviceInput};
pub use meta_kernel::MetaKernel;
pub use opencl::{Buffer, Queue};

/// A buffer in the local memory of a work-group.
///
/// It isn't allocated directly via an API call. Instead its size is passed in as kernel argument,
/// see [`MetaKernel::add_local`].
#[derive(Debug)]
pub struct LocalBuffer<T> {
    /// The number of T sized elements.
    length: usize,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> LocalBuffer<T> {
    /// Returns a new buffer of the specified `length`.
    pub fn new(length: usize) -> Self {
        LocalBuffer::<T> {
            length,
            _phantom: std::marker::PhantomData,
        }
    }
}
