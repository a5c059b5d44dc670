use opencl3::error_codes::ClError;

/// Error types of this library.
#[derive(thiserror::Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
pub enum GPUError {
    /// Error from the underlying `opencl3` library, e.g. a memory allocation failure. Build
    /// failures carry the compiler log.
    #[error("Opencl3 Error: {0}{}", match .1 {
       Some(message) => format!(" {}", message),
       None => "".to_string(),
    })]
    Opencl3(ClError, Option<String>),

    /// Error for OpenCL `clGetProgramInfo()` call failures.
    #[error("Program info not available!")]
    ProgramInfoNotAvailable(ClError),

    /// Error for OpenCL `clGetDeviceInfo()` call failures.
    #[error("Device info not available!")]
    DeviceInfoNotAvailable(ClError),

    /// Error when a device cannot be found.
    #[error("Device not found!")]
    DeviceNotFound,

    /// Error when a kernel with the given name cannot be found.
    #[error("Kernel with name {0} not found!")]
    KernelNotFound(String),

    /// Error when standard I/O fails.
    #[error("IO Error: {0}")]
    IO(#[from] std::io::Error),

    /// Error when the device is from an unsupported vendor.
    #[error("Vendor {0} is not supported.")]
    UnsupportedVendor(String),

    /// Error when the string representation of a unique identifier (PCI-ID or UUID) cannot be
    /// parsed.
    #[error("{0}")]
    InvalidId(String),

    /// Error when a range doesn't fit into the buffer it is taken from.
    #[error("Range {start}..{end} is out of bounds for a buffer of length {length}.")]
    InvalidRange {
        /// First element of the requested range.
        start: usize,
        /// One past the last element of the requested range.
        end: usize,
        /// The number of elements of the buffer.
        length: usize,
    },

    /// Errors that rarely happen and don't deserve their own error type.
    #[error("{0}")]
    Generic(String),
}

/// Convenience type alias for [`GPUError`] based [`Result`]s.
#[allow(clippy::upper_case_acronyms)]
pub type GPUResult<T> = std::result::Result<T, GPUError>;

impl From<ClError> for GPUError {
    fn from(error: ClError) -> Self {
        GPUError::Opencl3(error, None)
    }
}
