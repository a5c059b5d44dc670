//! Rust types that have an OpenCL C counterpart.
//!
//! Scalars map to the OpenCL built-in scalar types (`i32` is `int`, `u8` is `uchar`, ...).
//! Vector types like [`Int4`] have the same size and alignment as their OpenCL counterpart, so
//! that buffers of them can be copied to the device byte by byte.

/// A type that can be stored in a device buffer and used within generated kernels.
pub trait ClType: Copy + Send + Sync + 'static {
    /// The name of the type in OpenCL C, e.g. `int4`.
    const NAME: &'static str;
    /// Number of lanes, `1` for scalars.
    const WIDTH: usize = 1;
    /// Whether the `cl_khr_fp64` extension is needed to use this type.
    const FP64: bool = false;

    /// Renders the value as OpenCL C expression of exactly this type.
    fn literal(&self) -> String;
}

/// Marker for the scalar types.
pub trait ClScalar: ClType {}

macro_rules! impl_integer {
    ($ty:ty, $name:literal, $suffix:literal) => {
        impl ClType for $ty {
            const NAME: &'static str = $name;

            fn literal(&self) -> String {
                let literal = if *self == <$ty>::MIN && <$ty>::MIN != 0 {
                    // The negation of the minimum isn't representable as literal.
                    format!("({}{} - 1)", *self + 1, $suffix)
                } else {
                    format!("{}{}", self, $suffix)
                };
                // Types narrower than `int` would otherwise be promoted.
                match $name {
                    "char" | "uchar" | "short" | "ushort" => format!("(({}){})", $name, literal),
                    _ if literal.starts_with('-') => format!("({})", literal),
                    _ => literal,
                }
            }
        }

        impl ClScalar for $ty {}
    };
}

impl_integer!(i8, "char", "");
impl_integer!(u8, "uchar", "");
impl_integer!(i16, "short", "");
impl_integer!(u16, "ushort", "");
impl_integer!(i32, "int", "");
impl_integer!(u32, "uint", "u");
impl_integer!(i64, "long", "L");
impl_integer!(u64, "ulong", "UL");

impl ClType for f32 {
    const NAME: &'static str = "float";

    fn literal(&self) -> String {
        if self.is_nan() {
            "NAN".to_string()
        } else if self.is_infinite() {
            if *self > 0.0 { "INFINITY" } else { "(-INFINITY)" }.to_string()
        } else if *self < 0.0 {
            format!("({:?}f)", self)
        } else {
            format!("{:?}f", self)
        }
    }
}

impl ClScalar for f32 {}

impl ClType for f64 {
    const NAME: &'static str = "double";
    const FP64: bool = true;

    fn literal(&self) -> String {
        if self.is_nan() {
            "((double)NAN)".to_string()
        } else if self.is_infinite() {
            if *self > 0.0 {
                "((double)INFINITY)"
            } else {
                "((double)-INFINITY)"
            }
            .to_string()
        } else if *self < 0.0 {
            format!("({:?})", self)
        } else {
            format!("{:?}", self)
        }
    }
}

impl ClScalar for f64 {}

macro_rules! cl_vector {
    ($(#[$meta:meta])* $name:ident, $elem:ty, $lanes:literal, $cl_name:literal, $align:literal) => {
        $(#[$meta])*
        #[repr(C, align($align))]
        #[derive(Clone, Copy, Debug, Default, PartialEq)]
        pub struct $name(pub [$elem; $lanes]);

        impl $name {
            /// Returns the value of a single lane.
            ///
            /// Panics if `lane` is out of bounds.
            pub fn get(&self, lane: usize) -> $elem {
                self.0[lane]
            }

            /// Returns all lanes.
            pub fn lanes(&self) -> [$elem; $lanes] {
                self.0
            }
        }

        impl From<[$elem; $lanes]> for $name {
            fn from(lanes: [$elem; $lanes]) -> Self {
                Self(lanes)
            }
        }

        impl From<$name> for [$elem; $lanes] {
            fn from(vector: $name) -> Self {
                vector.0
            }
        }

        impl ClType for $name {
            const NAME: &'static str = $cl_name;
            const WIDTH: usize = $lanes;
            const FP64: bool = <$elem as ClType>::FP64;

            fn literal(&self) -> String {
                let lanes = self.0.iter().map(ClType::literal).collect::<Vec<_>>();
                format!("({})({})", $cl_name, lanes.join(", "))
            }
        }
    };
}

macro_rules! cl_vector2 {
    ($(#[$meta:meta])* $name:ident, $elem:ty, $cl_name:literal, $align:literal) => {
        cl_vector!($(#[$meta])* $name, $elem, 2, $cl_name, $align);

        impl $name {
            /// Creates a vector from its lanes.
            pub fn new(s0: $elem, s1: $elem) -> Self {
                Self([s0, s1])
            }
        }
    };
}

macro_rules! cl_vector4 {
    ($(#[$meta:meta])* $name:ident, $elem:ty, $cl_name:literal, $align:literal) => {
        cl_vector!($(#[$meta])* $name, $elem, 4, $cl_name, $align);

        impl $name {
            /// Creates a vector from its lanes.
            pub fn new(s0: $elem, s1: $elem, s2: $elem, s3: $elem) -> Self {
                Self([s0, s1, s2, s3])
            }
        }
    };
}

macro_rules! cl_vector8 {
    ($(#[$meta:meta])* $name:ident, $elem:ty, $cl_name:literal, $align:literal) => {
        cl_vector!($(#[$meta])* $name, $elem, 8, $cl_name, $align);

        impl $name {
            /// Creates a vector from its lanes.
            #[allow(clippy::too_many_arguments)]
            pub fn new(
                s0: $elem,
                s1: $elem,
                s2: $elem,
                s3: $elem,
                s4: $elem,
                s5: $elem,
                s6: $elem,
                s7: $elem,
            ) -> Self {
                Self([s0, s1, s2, s3, s4, s5, s6, s7])
            }
        }
    };
}

macro_rules! cl_vector16 {
    ($(#[$meta:meta])* $name:ident, $elem:ty, $cl_name:literal, $align:literal) => {
        cl_vector!($(#[$meta])* $name, $elem, 16, $cl_name, $align);

        impl $name {
            /// Creates a vector from its lanes, `s0` to `sf`.
            #[allow(clippy::too_many_arguments)]
            pub fn new(
                s0: $elem,
                s1: $elem,
                s2: $elem,
                s3: $elem,
                s4: $elem,
                s5: $elem,
                s6: $elem,
                s7: $elem,
                s8: $elem,
                s9: $elem,
                sa: $elem,
                sb: $elem,
                sc: $elem,
                sd: $elem,
                se: $elem,
                sf: $elem,
            ) -> Self {
                Self([
                    s0, s1, s2, s3, s4, s5, s6, s7, s8, s9, sa, sb, sc, sd, se, sf,
                ])
            }
        }
    };
}

cl_vector2!(
    /// OpenCL `char2`.
    Char2, i8, "char2", 2
);
cl_vector4!(
    /// OpenCL `char4`.
    Char4, i8, "char4", 4
);
cl_vector2!(
    /// OpenCL `uchar2`.
    Uchar2, u8, "uchar2", 2
);
cl_vector4!(
    /// OpenCL `uchar4`.
    Uchar4, u8, "uchar4", 4
);
cl_vector2!(
    /// OpenCL `short2`.
    Short2, i16, "short2", 4
);
cl_vector4!(
    /// OpenCL `short4`.
    Short4, i16, "short4", 8
);
cl_vector2!(
    /// OpenCL `ushort2`.
    Ushort2, u16, "ushort2", 4
);
cl_vector4!(
    /// OpenCL `ushort4`.
    Ushort4, u16, "ushort4", 8
);
cl_vector2!(
    /// OpenCL `int2`.
    Int2, i32, "int2", 8
);
cl_vector4!(
    /// OpenCL `int4`.
    Int4, i32, "int4", 16
);
cl_vector8!(
    /// OpenCL `int8`.
    Int8, i32, "int8", 32
);
cl_vector16!(
    /// OpenCL `int16`.
    Int16, i32, "int16", 64
);
cl_vector2!(
    /// OpenCL `uint2`.
    Uint2, u32, "uint2", 8
);
cl_vector4!(
    /// OpenCL `uint4`.
    Uint4, u32, "uint4", 16
);
cl_vector2!(
    /// OpenCL `long2`.
    Long2, i64, "long2", 16
);
cl_vector4!(
    /// OpenCL `long4`.
    Long4, i64, "long4", 32
);
cl_vector2!(
    /// OpenCL `ulong2`.
    Ulong2, u64, "ulong2", 16
);
cl_vector4!(
    /// OpenCL `ulong4`.
    Ulong4, u64, "ulong4", 32
);
cl_vector2!(
    /// OpenCL `float2`.
    Float2, f32, "float2", 8
);
cl_vector4!(
    /// OpenCL `float4`.
    Float4, f32, "float4", 16
);
cl_vector8!(
    /// OpenCL `float8`.
    Float8, f32, "float8", 32
);
cl_vector16!(
    /// OpenCL `float16`.
    Float16, f32, "float16", 64
);
cl_vector2!(
    /// OpenCL `double2`, needs the `cl_khr_fp64` extension.
    Double2, f64, "double2", 16
);
cl_vector4!(
    /// OpenCL `double4`, needs the `cl_khr_fp64` extension.
    Double4, f64, "double4", 32
);
