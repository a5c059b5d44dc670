use std::convert::TryFrom;

use log::debug;

use crate::device::DeviceKind;
use crate::error::{GPUError, GPUResult};
use crate::iterator::DeviceInput;
use crate::lambda::{_1, all, Predicate};
use crate::meta_kernel::{MetaKernel, Param};
use crate::opencl::Queue;
use crate::types::ClType;

/// Inputs shorter than this are counted by a single work-item.
pub const SERIAL_THRESHOLD: usize = 32;

/// Upper bound for the work-group size of the tree reduction.
const MAX_REDUCE_LOCAL_SIZE: usize = 256;

/// Number of work-groups per compute unit for the tree reduction.
const GROUPS_PER_COMPUTE_UNIT: usize = 8;

/// How the elements are distributed over the device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// A single work-item counts all elements.
    Serial,
    /// One work-item per compute unit, each counting a contiguous chunk.
    Threads,
    /// Every work-item counts a strided part of the input, the counts of a work-group are then
    /// reduced in local memory.
    Reduce,
}

impl Strategy {
    /// Returns the strategy that suits the device and the input length best.
    pub fn select(kind: DeviceKind, len: usize) -> Self {
        if len < SERIAL_THRESHOLD {
            Strategy::Serial
        } else if kind == DeviceKind::Cpu {
            Strategy::Threads
        } else {
            Strategy::Reduce
        }
    }

    fn kernel_name(self) -> &'static str {
        match self {
            Strategy::Serial => "count_if_serial",
            Strategy::Threads => "count_if_threads",
            Strategy::Reduce => "count_if_reduce",
        }
    }
}

/// Number of work-groups, number of work-items per group and the number of partial counts that
/// are written.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Geometry {
    groups: usize,
    local_size: usize,
    /// Elements per work-item, only used by [`Strategy::Threads`].
    chunk: usize,
}

impl Geometry {
    fn new(
        strategy: Strategy,
        len: usize,
        compute_units: usize,
        max_work_group_size: usize,
    ) -> Self {
        match strategy {
            Strategy::Serial => Geometry {
                groups: 1,
                local_size: 1,
                chunk: len,
            },
            Strategy::Threads => {
                let threads = compute_units.min(len).max(1);
                Geometry {
                    groups: threads,
                    local_size: 1,
                    chunk: div_ceil(len, threads),
                }
            }
            Strategy::Reduce => {
                let local_size = reduce_local_size(max_work_group_size);
                let groups = div_ceil(len, local_size)
                    .min(compute_units.max(1) * GROUPS_PER_COMPUTE_UNIT)
                    .max(1);
                Geometry {
                    groups,
                    local_size,
                    chunk: 0,
                }
            }
        }
    }
}

impl Geometry {
    /// Shrinks the work-groups to at most `limit` work-items, keeping their number.
    fn limit_local_size(self, limit: usize) -> Self {
        Geometry {
            local_size: reduce_local_size(self.local_size.min(limit)),
            ..self
        }
    }
}

fn div_ceil(dividend: usize, divisor: usize) -> usize {
    (dividend + divisor - 1) / divisor
}

/// The largest power of two that is a valid work-group size for the device, at most
/// [`MAX_REDUCE_LOCAL_SIZE`]. The tree reduction halves the work-group in every step.
fn reduce_local_size(max_work_group_size: usize) -> usize {
    let limit = max_work_group_size.clamp(1, MAX_REDUCE_LOCAL_SIZE);
    let mut size = 1;
    while size * 2 <= limit {
        size *= 2;
    }
    size
}

/// A loop over `range` that counts the elements for which `condition` is true into `count`.
fn counting_loop(range: &str, ty: &str, element: &str, condition: &str) -> String {
    format!(
        r"    ulong count = 0;
    for ({range}) {{
        const {ty} value = {element};
        if ({condition}) {{
            count++;
        }}
    }}
",
        range = range,
        ty = ty,
        element = element,
        condition = condition
    )
}

/// Generates the kernel and returns it together with the parameter the partial counts are
/// written to.
fn build_kernel<'a, I, P>(
    strategy: Strategy,
    geometry: Geometry,
    input: &'a I,
    predicate: &P,
) -> (MetaKernel<'a>, Param)
where
    I: DeviceInput + ?Sized,
    P: Predicate + ?Sized,
{
    let mut kernel = MetaKernel::new(strategy.kernel_name());
    let element = input.read(&mut kernel, "i");
    let condition = predicate.apply(&mut kernel, "value");
    let len = kernel.add_scalar(input.len() as u64);

    let count_loop = |range: &str| {
        counting_loop(range, <I::Item as ClType>::NAME, &element, &condition)
    };

    let (body, output) = match strategy {
        Strategy::Serial => {
            let output = kernel.declare_output::<u64>();
            let body = format!(
                r"{counting}    {output}[0] = count;
",
                counting = count_loop(&format!("ulong i = 0; i < {}; i++", len)),
                output = output
            );
            (body, output)
        }
        Strategy::Threads => {
            let chunk = kernel.add_scalar(geometry.chunk as u64);
            let output = kernel.declare_output::<u64>();
            let body = format!(
                r"    const ulong begin = get_global_id(0) * {chunk};
    const ulong end = min(begin + {chunk}, {len});
{counting}    {output}[get_global_id(0)] = count;
",
                chunk = chunk,
                len = len,
                counting = count_loop("ulong i = begin; i < end; i++"),
                output = output
            );
            (body, output)
        }
        Strategy::Reduce => {
            let output = kernel.declare_output::<u64>();
            let scratch = kernel.add_local::<u64>(geometry.local_size);
            let range = format!(
                "ulong i = get_global_id(0); i < {}; i += get_global_size(0)",
                len
            );
            let body = format!(
                r"    const ulong lid = get_local_id(0);
{counting}    {scratch}[lid] = count;
    barrier(CLK_LOCAL_MEM_FENCE);
    for (ulong offset = get_local_size(0) / 2; offset > 0; offset /= 2) {{
        if (lid < offset) {{
            {scratch}[lid] += {scratch}[lid + offset];
        }}
        barrier(CLK_LOCAL_MEM_FENCE);
    }}
    if (lid == 0) {{
        {output}[get_group_id(0)] = {scratch}[0];
    }}
",
                counting = count_loop(&range),
                scratch = scratch,
                output = output
            );
            (body, output)
        }
    };
    kernel.set_body(body);
    (kernel, output)
}

/// Counts the elements that are equal to `value`.
///
/// Vectors are only counted if all of their lanes are equal.
pub fn count<I>(queue: &Queue, input: &I, value: I::Item) -> GPUResult<usize>
where
    I: DeviceInput + ?Sized,
{
    let equal = _1.equal(value);
    if <I::Item as ClType>::WIDTH > 1 {
        count_if(queue, input, all(equal))
    } else {
        count_if(queue, input, equal)
    }
}

/// Counts the elements for which the predicate is true.
pub fn count_if<I, P>(queue: &Queue, input: &I, predicate: P) -> GPUResult<usize>
where
    I: DeviceInput + ?Sized,
    P: Predicate,
{
    let strategy = Strategy::select(queue.device().kind(), input.len());
    count_if_with(queue, input, predicate, strategy)
}

/// Same as [`count_if`], but with an explicitly chosen strategy.
pub fn count_if_with<I, P>(
    queue: &Queue,
    input: &I,
    predicate: P,
    strategy: Strategy,
) -> GPUResult<usize>
where
    I: DeviceInput + ?Sized,
    P: Predicate,
{
    let len = input.len();
    if len == 0 {
        return Ok(0);
    }

    let device = queue.device();
    let mut geometry = Geometry::new(
        strategy,
        len,
        device.compute_units() as usize,
        device.max_work_group_size(),
    );
    if strategy == Strategy::Reduce {
        // The limit of the kernel is only known once it is built. The source doesn't depend on
        // the local size, so both kernels share a program.
        let (unbound, _) = build_kernel(strategy, geometry, input, &predicate);
        geometry = geometry.limit_local_size(unbound.work_group_size(queue)?);
    }
    debug!(
        "Counting {} elements on {} with {:?} ({} groups of {}).",
        len,
        device.name(),
        strategy,
        geometry.groups,
        geometry.local_size
    );

    // Allocated before the kernel, as the kernel borrows it.
    let partials = unsafe { queue.create_buffer::<u64>(geometry.groups)? };
    let (mut kernel, output) = build_kernel(strategy, geometry, input, &predicate);
    kernel.bind(&output, &partials);
    kernel.launch(queue, geometry.groups, geometry.local_size)?;

    let total: u64 = queue.read_to_vec(&partials)?.into_iter().sum();
    usize::try_from(total)
        .map_err(|_| GPUError::Generic(format!("Count {} doesn't fit into usize.", total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::{ConstantRange, CountingRange};
    use crate::lambda::get;
    use crate::types::Int2;

    #[test]
    fn strategy_selection() {
        assert_eq!(Strategy::select(DeviceKind::Gpu, 0), Strategy::Serial);
        assert_eq!(Strategy::select(DeviceKind::Gpu, 31), Strategy::Serial);
        assert_eq!(Strategy::select(DeviceKind::Cpu, 31), Strategy::Serial);
        assert_eq!(Strategy::select(DeviceKind::Gpu, 32), Strategy::Reduce);
        assert_eq!(Strategy::select(DeviceKind::Accelerator, 1000), Strategy::Reduce);
        assert_eq!(Strategy::select(DeviceKind::Cpu, 32), Strategy::Threads);
        assert_eq!(Strategy::select(DeviceKind::Cpu, 1 << 20), Strategy::Threads);
    }

    #[test]
    fn reduce_local_sizes() {
        assert_eq!(reduce_local_size(1024), 256);
        assert_eq!(reduce_local_size(256), 256);
        assert_eq!(reduce_local_size(200), 128);
        assert_eq!(reduce_local_size(64), 64);
        assert_eq!(reduce_local_size(1), 1);
        assert_eq!(reduce_local_size(0), 1);
    }

    #[test]
    fn geometries() {
        assert_eq!(
            Geometry::new(Strategy::Serial, 20, 16, 256),
            Geometry {
                groups: 1,
                local_size: 1,
                chunk: 20
            }
        );

        // 100 elements on 8 cores: 8 work-items with up to 13 elements each.
        assert_eq!(
            Geometry::new(Strategy::Threads, 100, 8, 1),
            Geometry {
                groups: 8,
                local_size: 1,
                chunk: 13
            }
        );
        // Never more work-items than elements.
        assert_eq!(Geometry::new(Strategy::Threads, 3, 8, 1).groups, 3);
        assert_eq!(Geometry::new(Strategy::Threads, 40, 0, 1).groups, 1);

        let small = Geometry::new(Strategy::Reduce, 1000, 20, 1024);
        assert_eq!(small.local_size, 256);
        assert_eq!(small.groups, 4);
        let large = Geometry::new(Strategy::Reduce, 100_000_000, 20, 1024);
        assert_eq!(large.groups, 20 * GROUPS_PER_COMPUTE_UNIT);
    }

    #[test]
    fn local_size_limited_by_kernel() {
        let geometry = Geometry::new(Strategy::Reduce, 100_000, 4, 1024);
        assert_eq!(geometry.local_size, 256);

        let limited = geometry.limit_local_size(1);
        assert_eq!(limited.local_size, 1);
        assert_eq!(limited.groups, geometry.groups);

        assert_eq!(geometry.limit_local_size(200).local_size, 128);
        assert_eq!(geometry.limit_local_size(4096), geometry);
    }

    #[test]
    fn reduce_source_is_independent_of_local_size() {
        let input = CountingRange::new(0i32, 5000);
        let source = |max_work_group_size| {
            let geometry = Geometry::new(Strategy::Reduce, 5000, 4, max_work_group_size);
            build_kernel(Strategy::Reduce, geometry, &input, &_1.gt(7))
                .0
                .source()
        };
        assert_eq!(source(256), source(1));
    }

    #[test]
    fn serial_kernel() {
        let input = ConstantRange::new(18, 5);
        let geometry = Geometry::new(Strategy::Serial, 5, 1, 1);
        let (kernel, output) = build_kernel(Strategy::Serial, geometry, &input, &_1.equal(18));
        let source = kernel.source();
        assert_eq!(output.name(), "arg1");
        assert!(source
            .contains("__kernel void count_if_serial(const ulong arg0, __global ulong* arg1)"));
        assert!(source.contains("const int value = 18;"));
        assert!(source.contains("if ((value == 18))"));
        assert!(source.contains("arg1[0] = count;"));
    }

    #[test]
    fn threads_kernel() {
        let input = CountingRange::new(0u32, 100);
        let geometry = Geometry::new(Strategy::Threads, 100, 4, 1);
        let (kernel, _) = build_kernel(Strategy::Threads, geometry, &input, &_1.lt(50u32));
        let source = kernel.source();
        assert!(source.contains("const ulong arg0, const ulong arg1, __global ulong* arg2"));
        assert!(source.contains("const ulong begin = get_global_id(0) * arg1;"));
        assert!(source.contains("const uint value = (0u + (uint)(i));"));
        assert!(source.contains("arg2[get_global_id(0)] = count;"));
    }

    #[test]
    fn reduce_kernel() {
        let input = ConstantRange::new(Int2::new(1, 2), 1000);
        let geometry = Geometry::new(Strategy::Reduce, 1000, 4, 256);
        let (kernel, output) =
            build_kernel(Strategy::Reduce, geometry, &input, &get(0, _1).lt(4));
        let source = kernel.source();
        assert_eq!(output.name(), "arg1");
        assert!(source.contains("__global ulong* arg1, __local ulong* arg2"));
        assert!(source.contains("const int2 value = (int2)(1, 2);"));
        assert!(source.contains("if ((value.s0 < 4))"));
        assert!(source.contains("i += get_global_size(0)"));
        assert!(source.contains("barrier(CLK_LOCAL_MEM_FENCE);"));
        assert!(source.contains("arg1[get_group_id(0)] = arg2[0];"));
    }

    #[test]
    fn predicates_can_enable_fp64() {
        let input = ConstantRange::new(1.0f32, 100);
        let geometry = Geometry::new(Strategy::Reduce, 100, 4, 256);
        let (kernel, _) = build_kernel(Strategy::Reduce, geometry, &input, &_1.lt(2.0f64));
        assert!(kernel.source().contains("cl_khr_fp64"));
    }
}
