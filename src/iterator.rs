//! Sequences algorithms can run over.
//!
//! Besides device buffers and slices of them, there are ranges that are generated on the fly
//! within the kernel and don't need any device memory.

use crate::meta_kernel::MetaKernel;
use crate::opencl::Buffer;
use crate::types::{ClScalar, ClType};

/// A finite sequence of elements that can be read from within a kernel.
pub trait DeviceInput {
    /// The type of the elements.
    type Item: ClType;

    /// Returns the number of elements.
    fn len(&self) -> usize;

    /// Returns true if there are no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds the kernel parameters the input needs and returns an OpenCL C expression for the
    /// element at position `index` (counted from the start of the input).
    fn read<'a>(&'a self, kernel: &mut MetaKernel<'a>, index: &str) -> String;
}

impl<T: ClType> DeviceInput for Buffer<T> {
    type Item = T;

    fn len(&self) -> usize {
        Buffer::len(self)
    }

    fn read<'a>(&'a self, kernel: &mut MetaKernel<'a>, index: &str) -> String {
        let buffer = kernel.add_buffer(self);
        format!("{}[{}]", buffer, index)
    }
}

/// A contiguous part of a [`Buffer`], created with [`Buffer::slice`].
#[derive(Debug)]
pub struct BufferSlice<'b, T> {
    buffer: &'b Buffer<T>,
    start: usize,
    end: usize,
}

impl<'b, T> BufferSlice<'b, T> {
    pub(crate) fn new(buffer: &'b Buffer<T>, start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= buffer.len());
        Self { buffer, start, end }
    }

    /// Index of the first element within the buffer.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Index one past the last element within the buffer.
    pub fn end(&self) -> usize {
        self.end
    }

    /// The buffer the slice is taken from.
    pub fn buffer(&self) -> &'b Buffer<T> {
        self.buffer
    }
}

impl<T> Clone for BufferSlice<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BufferSlice<'_, T> {}

impl<T: ClType> DeviceInput for BufferSlice<'_, T> {
    type Item = T;

    fn len(&self) -> usize {
        self.end - self.start
    }

    fn read<'a>(&'a self, kernel: &mut MetaKernel<'a>, index: &str) -> String {
        let buffer = kernel.add_buffer(self.buffer);
        // The offset is an argument, so that all slices share the same program.
        let offset = kernel.add_scalar(self.start as u64);
        format!("{}[{} + {}]", buffer, offset, index)
    }
}

/// The same value repeated `len` times.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantRange<T> {
    value: T,
    len: usize,
}

impl<T: ClType> ConstantRange<T> {
    /// Creates a range of `len` copies of `value`.
    pub fn new(value: T, len: usize) -> Self {
        Self { value, len }
    }

    /// The repeated value.
    pub fn value(&self) -> T {
        self.value
    }
}

impl<T: ClType> DeviceInput for ConstantRange<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.len
    }

    fn read<'a>(&'a self, kernel: &mut MetaKernel<'a>, _index: &str) -> String {
        if T::FP64 {
            kernel.enable_fp64();
        }
        self.value.literal()
    }
}

/// The values `start`, `start + 1`, ... with `len` elements.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountingRange<T> {
    start: T,
    len: usize,
}

impl<T: ClScalar> CountingRange<T> {
    /// Creates a range of `len` consecutive values, beginning with `start`.
    pub fn new(start: T, len: usize) -> Self {
        Self { start, len }
    }
}

impl<T: ClScalar> DeviceInput for CountingRange<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.len
    }

    fn read<'a>(&'a self, kernel: &mut MetaKernel<'a>, index: &str) -> String {
        if T::FP64 {
            kernel.enable_fp64();
        }
        format!("({} + ({})({}))", self.start.literal(), T::NAME, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Int4;

    #[test]
    fn constant_range() {
        let range = ConstantRange::new(18, 5);
        assert_eq!(range.len(), 5);
        assert!(!range.is_empty());
        assert_eq!(range.value(), 18);

        let mut kernel = MetaKernel::new("k");
        assert_eq!(range.read(&mut kernel, "i"), "18");
        assert!(
            kernel.source().contains("__kernel void k()"),
            "No parameters are needed."
        );

        let vector = ConstantRange::new(Int4::new(1, 2, 3, 4), 0);
        assert!(vector.is_empty());
        let mut kernel = MetaKernel::new("k");
        assert_eq!(vector.read(&mut kernel, "i"), "(int4)(1, 2, 3, 4)");
    }

    #[test]
    fn counting_range() {
        let range = CountingRange::new(10u32, 3);
        assert_eq!(range.len(), 3);
        let mut kernel = MetaKernel::new("k");
        assert_eq!(range.read(&mut kernel, "i"), "(10u + (uint)(i))");

        let mut kernel = MetaKernel::new("k");
        CountingRange::new(0.5f64, 3).read(&mut kernel, "i");
        assert!(kernel.source().contains("cl_khr_fp64"));
    }
}
