//! The OpenCL specific implementation of a [`Queue`], [`Buffer`], [`Program`] and [`Kernel`].

pub(crate) mod utils;

use std::collections::HashMap;
use std::mem;
use std::ops::{Bound, RangeBounds};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::error_codes::ClError;
use opencl3::kernel::ExecuteKernel;
use opencl3::memory::CL_MEM_READ_WRITE;
use opencl3::types::CL_BLOCKING;

use log::{debug, warn};

use crate::config::settings;
use crate::device::Device;
use crate::error::{GPUError, GPUResult};
use crate::iterator::BufferSlice;
use crate::program_cache::{program_key, ProgramCache};
use crate::LocalBuffer;

/// The lowest level identifier of an OpenCL device, it changes whenever a device is initialized.
#[allow(non_camel_case_types)]
pub type cl_device_id = opencl3::types::cl_device_id;

/// Options every program is built with.
const BUILD_OPTIONS: &str = "";

/// A Buffer to be used for sending and receiving data to/from the device.
#[derive(Debug)]
pub struct Buffer<T> {
    buffer: opencl3::memory::Buffer<u8>,
    /// The number of T-sized elements.
    length: usize,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Buffer<T> {
    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if the buffer has no elements.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns a view of a part of the buffer, e.g. `buffer.slice(1..buffer.len() - 1)`.
    pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> GPUResult<BufferSlice<'_, T>> {
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end.saturating_add(1),
            Bound::Excluded(&end) => end,
            Bound::Unbounded => self.length,
        };
        if start > end || end > self.length {
            return Err(GPUError::InvalidRange {
                start,
                end,
                length: self.length,
            });
        }
        Ok(BufferSlice::new(self, start, end))
    }
}

/// Abstraction that contains everything to run OpenCL kernels on a device.
///
/// It owns the context, the command queue and the programs that were built for it. All
/// operations are blocking, once a method returns, the device is done with the work.
pub struct Queue {
    device: Device,
    queue: CommandQueue,
    context: Context,
    programs: Mutex<ProgramCache<Arc<Program>>>,
}

impl Queue {
    /// Creates a queue for a specific device.
    pub fn new(device: &Device) -> GPUResult<Queue> {
        debug!("Creating OpenCL queue for {}.", device.name());
        let context = Context::from_device(&device.device)?;
        let queue = CommandQueue::create_default(&context, 0)?;
        Ok(Queue {
            device: device.clone(),
            queue,
            context,
            programs: Mutex::new(ProgramCache::new(settings().program_cache_size)),
        })
    }

    /// Creates a queue for the default device, see [`Device::default_device`].
    pub fn default_queue() -> GPUResult<Queue> {
        Self::new(Device::default_device()?)
    }

    /// Returns the device the queue runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns the name of the device, e.g. "GeForce RTX 3090".
    pub fn device_name(&self) -> &str {
        &self.device.name
    }

    /// Returns the program built from the given source.
    ///
    /// Programs are kept in memory, see [`crate::Settings::program_cache_size`], and their
    /// binaries on disk, so that the source is only compiled once.
    pub fn program(&self, source: &str) -> GPUResult<Arc<Program>> {
        let key = program_key(source, BUILD_OPTIONS);
        let mut programs = self.programs.lock().unwrap_or_else(PoisonError::into_inner);
        let capacity = programs.capacity();
        programs.get_or_try_insert_with(&key, || {
            debug!(
                "Program {} is not in memory (keeping up to {} programs).",
                key, capacity
            );
            Program::from_opencl(&self.context, &self.device, source).map(Arc::new)
        })
    }

    /// Returns the number of programs that are currently kept in memory.
    pub fn cached_programs(&self) -> usize {
        // A panic while holding the lock can't leave the cache in an inconsistent state.
        self.programs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops all programs that are kept in memory.
    pub fn clear_program_cache(&self) {
        self.programs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Creates a new buffer that can be used for input/output with the device.
    ///
    /// The `length` is the number of elements to create.
    ///
    /// It is usually used to create buffers that are initialized by the device. If you want to
    /// directly transfer data from the host to the device, you would use the safe
    /// [`Queue::create_buffer_from_slice`] instead.
    ///
    /// # Safety
    ///
    /// The content of the buffer is uninitialized.
    pub unsafe fn create_buffer<T>(&self, length: usize) -> GPUResult<Buffer<T>> {
        assert!(length > 0);
        let mut buff = opencl3::memory::Buffer::create(
            &self.context,
            CL_MEM_READ_WRITE,
            // The input length is the number of elements, but we create a `u8` buffer. Hence the
            // length needs to be the number of bytes.
            length * std::mem::size_of::<T>(),
            ptr::null_mut(),
        )?;

        // Write some data right-away. This makes a significant performance different.
        self.queue
            .enqueue_write_buffer(&mut buff, CL_BLOCKING, 0, &[0u8], &[])?;

        Ok(Buffer::<T> {
            buffer: buff,
            length,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Creates a new buffer on the device and initializes with the given slice.
    pub fn create_buffer_from_slice<T>(&self, slice: &[T]) -> GPUResult<Buffer<T>> {
        if slice.is_empty() {
            return Err(GPUError::Generic(
                "Cannot create a buffer without elements.".to_string(),
            ));
        }
        // The underlying buffer is `u8`, hence we need the number of bytes.
        let bytes_len = mem::size_of_val(slice);

        let mut buffer = unsafe {
            opencl3::memory::Buffer::create(
                &self.context,
                CL_MEM_READ_WRITE,
                bytes_len,
                ptr::null_mut(),
            )?
        };
        // Transmuting types is safe as long a sizes match.
        let bytes = unsafe {
            std::slice::from_raw_parts(slice.as_ptr() as *const T as *const u8, bytes_len)
        };
        // Write some data right-away. This makes a significant performance different.
        unsafe {
            self.queue
                .enqueue_write_buffer(&mut buffer, CL_BLOCKING, 0, &[0u8], &[])?;
            self.queue
                .enqueue_write_buffer(&mut buffer, CL_BLOCKING, 0, bytes, &[])?;
        };

        Ok(Buffer::<T> {
            buffer,
            length: slice.len(),
            _phantom: std::marker::PhantomData,
        })
    }

    /// Puts data from an existing buffer onto the device, starting at the first element.
    pub fn write_from_buffer<T>(
        &self,
        // The memory on the device changes, even though the handle doesn't.
        buffer: &mut Buffer<T>,
        data: &[T],
    ) -> GPUResult<()> {
        assert!(data.len() <= buffer.length, "Buffer is too small");

        // It is safe as long as the sizes match.
        let bytes = unsafe {
            std::slice::from_raw_parts(
                data.as_ptr() as *const T as *const u8,
                mem::size_of_val(data),
            )
        };
        unsafe {
            self.queue
                .enqueue_write_buffer(&mut buffer.buffer, CL_BLOCKING, 0, bytes, &[])?;
        }
        Ok(())
    }

    /// Reads data from the device into an existing buffer, starting at the first element.
    pub fn read_into_buffer<T>(&self, buffer: &Buffer<T>, data: &mut [T]) -> GPUResult<()> {
        assert!(data.len() <= buffer.length, "Buffer is too small");

        // It is safe as long as the sizes match.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(
                data.as_mut_ptr() as *mut T as *mut u8,
                mem::size_of_val(data),
            )
        };
        unsafe {
            self.queue
                .enqueue_read_buffer(&buffer.buffer, CL_BLOCKING, 0, bytes, &[])?;
        };
        Ok(())
    }

    /// Reads the whole buffer into a new vector.
    pub fn read_to_vec<T: Copy + Default>(&self, buffer: &Buffer<T>) -> GPUResult<Vec<T>> {
        let mut data = vec![T::default(); buffer.length];
        self.read_into_buffer(buffer, &mut data)?;
        Ok(data)
    }
}

/// A program that was built for a device, it contains one or more kernels.
///
/// Programs are shared between all users of a [`Queue`]. The arguments of an OpenCL kernel are
/// state of the kernel object, hence only one [`Kernel`] of a program can exist at a time, see
/// [`Program::create_kernel`].
pub struct Program {
    kernels_by_name: HashMap<String, opencl3::kernel::Kernel>,
    launch: Mutex<()>,
}

impl Program {
    /// Creates a program for a specific device from OpenCL source code.
    ///
    /// If there is a compiled binary of the same source for the same device on disk, it is used
    /// instead of compiling the source again.
    pub(crate) fn from_opencl(context: &Context, device: &Device, src: &str) -> GPUResult<Program> {
        debug!("Creating OpenCL program from source.");
        let cached = match utils::cache_path(device, src) {
            Ok(cached) => cached,
            Err(error) => {
                warn!("Cannot use the program cache directory: {}", error);
                None
            }
        };

        if let Some(cached) = cached.as_ref().filter(|path| path.exists()) {
            match std::fs::read(cached)
                .map_err(GPUError::from)
                .and_then(|bin| Program::from_binary(context, bin))
            {
                Ok(program) => return Ok(program),
                Err(error) => warn!(
                    "Cannot use cached program {}, building it from source: {}",
                    cached.to_string_lossy(),
                    error
                ),
            }
        }

        debug!("Building kernel from source…");
        let mut program = opencl3::program::Program::create_from_source(context, src)?;
        if let Err(build_error) = program.build(context.devices(), BUILD_OPTIONS) {
            let log = program.get_build_log(context.devices()[0])?;
            return Err(GPUError::Opencl3(build_error, Some(log)));
        }
        debug!("Building kernel from source: done.");
        let prog = Program::with_kernels(&program)?;

        if let Some(cached) = cached {
            let binaries = program
                .get_binaries()
                .map_err(GPUError::ProgramInfoNotAvailable)?;
            if let Err(error) = std::fs::write(&cached, &binaries[0]) {
                warn!(
                    "Cannot write program cache {}: {}",
                    cached.to_string_lossy(),
                    error
                );
            }
        }
        Ok(prog)
    }

    /// Creates a program for a specific device from a compiled OpenCL binary.
    pub(crate) fn from_binary(context: &Context, bin: Vec<u8>) -> GPUResult<Program> {
        debug!("Creating OpenCL program from binary.");
        let bins = vec![&bin[..]];
        let mut program = unsafe {
            opencl3::program::Program::create_from_binary(context, context.devices(), &bins)
        }?;
        if let Err(build_error) = program.build(context.devices(), BUILD_OPTIONS) {
            let log = program.get_build_log(context.devices()[0])?;
            return Err(GPUError::Opencl3(build_error, Some(log)));
        }
        Program::with_kernels(&program)
    }

    fn with_kernels(program: &opencl3::program::Program) -> GPUResult<Program> {
        let kernels = opencl3::kernel::create_program_kernels(program)?;
        let kernels_by_name = kernels
            .into_iter()
            .map(|kernel| {
                let name = kernel.function_name()?;
                Ok((name, kernel))
            })
            .collect::<Result<_, ClError>>()?;
        Ok(Program {
            kernels_by_name,
            launch: Mutex::new(()),
        })
    }

    /// Returns the maximum work-group size the kernel can be launched with on the device.
    ///
    /// It may be smaller than [`Device::max_work_group_size`], e.g. if the kernel uses barriers.
    pub fn work_group_size(&self, device: &Device, name: &str) -> GPUResult<usize> {
        let kernel = self.kernel(name)?;
        Ok(kernel.get_work_group_size(device.cl_device_id())?)
    }

    fn kernel(&self, name: &str) -> GPUResult<&opencl3::kernel::Kernel> {
        self.kernels_by_name
            .get(name)
            .ok_or_else(|| GPUError::KernelNotFound(name.to_string()))
    }

    /// Returns a kernel.
    ///
    /// The `global_work_size` does *not* follow the OpenCL definition. It is *not* the total
    /// number of threads. Instead it follows CUDA's definition and is the number of
    /// `local_work_size` sized thread groups. So the total number of threads is
    /// `global_work_size * local_work_size`.
    ///
    /// The returned kernel blocks other threads from creating a kernel of this program until it
    /// was run or dropped. Creating a second kernel of the same program on the same thread while
    /// the first one is alive deadlocks.
    pub fn create_kernel<'a>(
        &'a self,
        queue: &'a Queue,
        name: &str,
        global_work_size: usize,
        local_work_size: usize,
    ) -> GPUResult<Kernel<'a>> {
        let kernel = self.kernel(name)?;
        let launch = self.launch.lock().unwrap_or_else(PoisonError::into_inner);
        let mut builder = ExecuteKernel::new(kernel);
        builder.set_global_work_size(global_work_size * local_work_size);
        builder.set_local_work_size(local_work_size);
        Ok(Kernel {
            builder,
            queue: &queue.queue,
            num_local_buffers: 0,
            _launch: launch,
        })
    }
}

/// Abstraction for kernel arguments.
///
/// The kernel doesn't support being called with custom types, hence some conversion might be
/// needed. This trait enables automatic coversions, so that any type implementing it can be
/// passed into a [`Kernel`].
pub trait KernelArgument {
    /// Apply the kernel argument to the kernel.
    fn push(&self, kernel: &mut Kernel);
}

impl<T: KernelArgument + ?Sized> KernelArgument for &T {
    fn push(&self, kernel: &mut Kernel) {
        (**self).push(kernel)
    }
}

impl<T> KernelArgument for Buffer<T> {
    fn push(&self, kernel: &mut Kernel) {
        unsafe {
            kernel.builder.set_arg(&self.buffer);
        }
    }
}

macro_rules! scalar_kernel_argument {
    ($($ty:ty),*) => {
        $(
            impl KernelArgument for $ty {
                fn push(&self, kernel: &mut Kernel) {
                    unsafe {
                        kernel.builder.set_arg(self);
                    }
                }
            }
        )*
    };
}

scalar_kernel_argument!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl<T> KernelArgument for LocalBuffer<T> {
    fn push(&self, kernel: &mut Kernel) {
        unsafe {
            kernel
                .builder
                .set_arg_local_buffer(self.length * std::mem::size_of::<T>());
        }
        kernel.num_local_buffers += 1;
    }
}

/// A kernel that can be executed.
#[derive(Debug)]
pub struct Kernel<'a> {
    /// The underlying kernel builder.
    pub builder: ExecuteKernel<'a>,
    queue: &'a CommandQueue,
    /// There can only be a single [`LocalBuffer`] as parameter. This counts them, so that there
    /// can be an error if there are more `LocalBuffer` arguments.
    num_local_buffers: u8,
    /// Held from setting the first argument until the kernel is enqueued.
    _launch: MutexGuard<'a, ()>,
}

impl<'a> Kernel<'a> {
    /// Set a kernel argument.
    ///
    /// The arguments must live as long as the kernel. Hence make sure they are not dropped as
    /// long as the kernel is in use.
    ///
    /// Example where this behaviour is enforced and leads to a compile-time error:
    ///
    /// ```compile_fail
    /// use rust_gpu_compute::opencl::Queue;
    ///
    /// fn would_break(queue: &Queue) {
    ///    let data = vec![1, 2, 3, 4];
    ///    let buffer = queue.create_buffer_from_slice(&data).unwrap();
    ///    let program = queue.program("__kernel void my_kernel(__global int* a) {}").unwrap();
    ///    let kernel = program.create_kernel(queue, "my_kernel", 4, 256).unwrap();
    ///    let kernel = kernel.arg(&buffer);
    ///    // This drop wouldn't error if the arguments wouldn't be bound to the kernels lifetime.
    ///    drop(buffer);
    ///    kernel.run().unwrap();
    /// }
    /// ```
    pub fn arg<T: KernelArgument + ?Sized>(mut self, t: &'a T) -> Self {
        t.push(&mut self);
        self
    }

    /// Actually run the kernel.
    pub fn run(mut self) -> GPUResult<()> {
        if self.num_local_buffers > 1 {
            return Err(GPUError::Generic(
                "There cannot be more than one `LocalBuffer`.".to_string(),
            ));
        }
        unsafe {
            self.builder.enqueue_nd_range(self.queue)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::Queue;

    #[test]
    fn program_cache_survives_panics() {
        let queue = match Queue::default_queue() {
            Ok(queue) => queue,
            Err(_) => return,
        };
        queue.program("__kernel void noop() {}").unwrap();

        let panicked = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _programs = queue.programs.lock().unwrap();
                    panic!("panic while holding the program cache");
                })
                .join()
        });
        assert!(panicked.is_err());
        assert!(queue.programs.is_poisoned());

        assert_eq!(queue.cached_programs(), 1);
        queue.program("__kernel void noop() {}").unwrap();
        assert_eq!(queue.cached_programs(), 1, "The cached program is reused.");
        queue.clear_program_cache();
        assert_eq!(queue.cached_programs(), 0);
    }
}
