//! Assembling OpenCL kernels from pieces at runtime.
//!
//! Algorithms don't ship with precompiled kernels. The element type, the way elements are read
//! and the predicate are only known at the call site, hence the kernel source is generated for
//! each combination and then built (and cached) by the [`Queue`].

use std::fmt;

use crate::error::{GPUError, GPUResult};
use crate::opencl::{Buffer, KernelArgument, Queue};
use crate::types::{ClScalar, ClType};
use crate::LocalBuffer;

const FP64_PRAGMA: &str = "#pragma OPENCL EXTENSION cl_khr_fp64 : enable";

/// A kernel parameter that was declared, but not bound to a value yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Param {
    index: usize,
    name: String,
}

impl Param {
    /// The name of the parameter within the kernel source.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builder for the source code of a single kernel together with its arguments.
///
/// Parameters are named `arg0`, `arg1`, ... in the order they are added. The generated source
/// only depends on the sequence of calls, not on the values of the arguments, so that the
/// program cache is hit for e.g. different ranges of the same buffer.
pub struct MetaKernel<'a> {
    name: String,
    fp64: bool,
    functions: Vec<String>,
    /// Type and name of each parameter.
    params: Vec<(String, String)>,
    args: Vec<Option<Box<dyn KernelArgument + 'a>>>,
    body: String,
}

impl<'a> MetaKernel<'a> {
    /// Creates an empty kernel with the given entry point name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fp64: false,
            functions: Vec::new(),
            params: Vec::new(),
            args: Vec::new(),
            body: String::new(),
        }
    }

    /// The name of the kernel function.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enables double precision floating point support.
    pub fn enable_fp64(&mut self) {
        self.fp64 = true;
    }

    /// Adds a helper function that is defined before the kernel. Adding the same source twice
    /// only defines it once.
    pub fn add_function(&mut self, source: &str) {
        let source = source.trim();
        if !self.functions.iter().any(|function| function == source) {
            self.functions.push(source.to_string());
        }
    }

    /// Declares a parameter without binding a value to it, the value needs to be set with
    /// [`MetaKernel::bind`] before the kernel is launched.
    pub fn declare(&mut self, ty: &str) -> Param {
        let index = self.params.len();
        let name = format!("arg{}", index);
        self.params.push((ty.to_string(), name.clone()));
        self.args.push(None);
        Param { index, name }
    }

    /// Binds a value to a previously declared parameter.
    pub fn bind<A: KernelArgument + 'a>(&mut self, param: &Param, arg: A) {
        self.args[param.index] = Some(Box::new(arg));
    }

    /// Adds a read-only buffer and returns the name of the parameter.
    pub fn add_buffer<T: ClType>(&mut self, buffer: &'a Buffer<T>) -> String {
        if T::FP64 {
            self.enable_fp64();
        }
        let param = self.declare(&format!("__global const {}*", T::NAME));
        self.bind(&param, buffer);
        param.name
    }

    /// Declares a buffer the kernel writes to.
    pub fn declare_output<T: ClType>(&mut self) -> Param {
        if T::FP64 {
            self.enable_fp64();
        }
        self.declare(&format!("__global {}*", T::NAME))
    }

    /// Adds a scalar value and returns the name of the parameter.
    pub fn add_scalar<T: ClScalar + KernelArgument>(&mut self, value: T) -> String {
        if T::FP64 {
            self.enable_fp64();
        }
        let param = self.declare(&format!("const {}", T::NAME));
        self.bind(&param, value);
        param.name
    }

    /// Adds local memory for `length` elements and returns the name of the parameter.
    pub fn add_local<T: ClType>(&mut self, length: usize) -> String {
        let param = self.declare(&format!("__local {}*", T::NAME));
        self.bind(&param, LocalBuffer::<T>::new(length));
        param.name
    }

    /// Sets the statements of the kernel function.
    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    /// Returns the complete OpenCL C source of the program.
    pub fn source(&self) -> String {
        let mut source = String::new();
        if self.fp64 {
            source.push_str(FP64_PRAGMA);
            source.push_str("\n\n");
        }
        for function in &self.functions {
            source.push_str(function);
            source.push_str("\n\n");
        }
        let params = self
            .params
            .iter()
            .map(|(ty, name)| format!("{} {}", ty, name))
            .collect::<Vec<_>>()
            .join(", ");
        source.push_str(&format!("__kernel void {}({})\n{{\n", self.name, params));
        source.push_str(&self.body);
        if !self.body.ends_with('\n') {
            source.push('\n');
        }
        source.push_str("}\n");
        source
    }

    /// Returns the largest work-group size the kernel can be launched with on the device of the
    /// queue. The program is built if it isn't cached yet.
    pub fn work_group_size(&self, queue: &Queue) -> GPUResult<usize> {
        let program = queue.program(&self.source())?;
        program.work_group_size(queue.device(), &self.name)
    }

    /// Builds the program (or takes it from the cache of the queue) and runs the kernel.
    ///
    /// `global_work_size` is the number of work-groups, each having `local_work_size`
    /// work-items, see [`crate::opencl::Program::create_kernel`].
    pub fn launch(
        &self,
        queue: &Queue,
        global_work_size: usize,
        local_work_size: usize,
    ) -> GPUResult<()> {
        let program = queue.program(&self.source())?;
        let mut kernel =
            program.create_kernel(queue, &self.name, global_work_size, local_work_size)?;
        for ((_, name), arg) in self.params.iter().zip(self.args.iter()) {
            let arg = arg.as_ref().ok_or_else(|| {
                GPUError::Generic(format!(
                    "Argument {} of kernel {} is not set.",
                    name, self.name
                ))
            })?;
            kernel = kernel.arg(&**arg);
        }
        kernel.run()
    }
}

impl fmt::Debug for MetaKernel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaKernel")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_layout() {
        let mut kernel = MetaKernel::new("fill");
        let value = kernel.add_scalar(7u32);
        let output = kernel.declare_output::<u32>();
        kernel.set_body(format!("    {}[get_global_id(0)] = {};", output, value));

        assert_eq!(value, "arg0");
        assert_eq!(output.name(), "arg1");
        assert_eq!(
            kernel.source(),
            r"__kernel void fill(const uint arg0, __global uint* arg1)
{
    arg1[get_global_id(0)] = arg0;
}
"
        );
    }

    #[test]
    fn functions_are_defined_once() {
        let mut kernel = MetaKernel::new("k");
        kernel.add_function("bool is_odd(int x) { return x & 1; }");
        kernel.add_function("  bool is_odd(int x) { return x & 1; }\n");
        kernel.add_function("bool is_even(int x) { return !(x & 1); }");
        let source = kernel.source();
        assert_eq!(source.matches("bool is_odd").count(), 1);
        assert!(source.find("is_odd").unwrap() < source.find("is_even").unwrap());
        assert!(source.find("is_even").unwrap() < source.find("__kernel").unwrap());
    }

    #[test]
    fn fp64_pragma() {
        let mut kernel = MetaKernel::new("k");
        assert!(!kernel.source().contains("cl_khr_fp64"));
        kernel.add_scalar(1.5f64);
        assert!(kernel.source().starts_with(FP64_PRAGMA));
        assert!(kernel.source().contains("const double arg0"));
    }

    #[test]
    fn local_memory() {
        let mut kernel = MetaKernel::new("k");
        let scratch = kernel.add_local::<u64>(256);
        assert!(kernel
            .source()
            .contains(&format!("__local ulong* {}", scratch)));
    }

    #[test]
    fn source_is_independent_of_argument_values() {
        let build = |offset: u64| {
            let mut kernel = MetaKernel::new("k");
            kernel.add_scalar(offset);
            kernel.source()
        };
        assert_eq!(build(0), build(42));
    }
}
