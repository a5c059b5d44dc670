use std::fmt;
use std::hash::{Hash, Hasher};

use log::{debug, warn};
use once_cell::sync::Lazy;

use std::convert::TryFrom;
use std::mem;

use crate::config::{settings, Settings};
use crate::error::{GPUError, GPUResult};
use crate::opencl;

/// The UUID of the devices returned by OpenCL is always 16 bytes long.
const UUID_SIZE: usize = 16;
const AMD_DEVICE_VENDOR_STRING: &str = "Advanced Micro Devices, Inc.";
const AMD_DEVICE_VENDOR_ID: u32 = 0x1002;

const INTEL_DEVICE_VENDOR_STRING: &str = "Intel(R) Corporation";
const INTEL_DEVICE_VENDOR_ID: u32 = 0x8086;

// For some reason integrated AMD cards on Apple don't have the usual vendor name and ID
const AMD_DEVICE_ON_APPLE_VENDOR_STRING: &str = "AMD";
const AMD_DEVICE_ON_APPLE_VENDOR_ID: u32 = 0x1021d00;
const NVIDIA_DEVICE_VENDOR_STRING: &str = "NVIDIA Corporation";
const NVIDIA_DEVICE_VENDOR_ID: u32 = 0x10de;

const OTHER_DEVICE_VENDOR_STRING: &str = "Other";

static DEVICES: Lazy<Vec<Device>> = Lazy::new(build_device_list);

/// The PCI-ID is the combination of the PCI Bus ID and PCI Device ID.
///
/// It is the first two identifiers of e.g. `lcpci`:
///
/// ```text
///     4e:00.0 VGA compatible controller
///     || └└-- Device ID
///     └└-- Bus ID
/// ```
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct PciId(u16);

impl From<u16> for PciId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl From<PciId> for u16 {
    fn from(id: PciId) -> Self {
        id.0
    }
}

/// Converts a PCI-ID formatted as Bus-ID:Device-ID, e.g. `e3:00`.
impl TryFrom<&str> for PciId {
    type Error = GPUError;

    fn try_from(pci_id: &str) -> GPUResult<Self> {
        let mut bytes = [0; mem::size_of::<u16>()];
        hex::decode_to_slice(pci_id.replace(':', ""), &mut bytes).map_err(|_| {
            GPUError::InvalidId(format!(
                "Cannot parse PCI ID, expected hex-encoded string formated as aa:bb, got {0}.",
                pci_id
            ))
        })?;
        let parsed = u16::from_be_bytes(bytes);
        Ok(Self(parsed))
    }
}

/// Formats the PCI-ID like `lspci`, Bus-ID:Device-ID, e.g. `e3:00`.
impl fmt::Display for PciId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = u16::to_be_bytes(self.0);
        write!(f, "{:02x}:{:02x}", bytes[0], bytes[1])
    }
}

/// A unique identifier based on UUID of the device.
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq)]
pub struct DeviceUuid([u8; UUID_SIZE]);

impl From<[u8; UUID_SIZE]> for DeviceUuid {
    fn from(uuid: [u8; UUID_SIZE]) -> Self {
        Self(uuid)
    }
}

impl From<DeviceUuid> for [u8; UUID_SIZE] {
    fn from(uuid: DeviceUuid) -> Self {
        uuid.0
    }
}

/// Converts a UUID formatted as aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee,
/// e.g. 46abccd6-022e-b783-572d-833f7104d05f
impl TryFrom<&str> for DeviceUuid {
    type Error = GPUError;

    fn try_from(uuid: &str) -> GPUResult<Self> {
        let mut bytes = [0; UUID_SIZE];
        hex::decode_to_slice(uuid.replace('-', ""), &mut bytes).map_err(|_| {
            GPUError::InvalidId(format!(
                "Cannot parse UUID, expected hex-encoded string formated as \
                 aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee, got {0}.",
                uuid
            ))
        })?;
        Ok(Self(bytes))
    }
}

/// Formats the UUID the same way as `clinfo` does, as an example:
/// the output should looks like 46abccd6-022e-b783-572d-833f7104d05f
impl fmt::Display for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&self.0[..4]),
            hex::encode(&self.0[4..6]),
            hex::encode(&self.0[6..8]),
            hex::encode(&self.0[8..10]),
            hex::encode(&self.0[10..])
        )
    }
}

impl fmt::Debug for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Unique identifier that can either be a PCI ID or a UUID.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum UniqueId {
    /// ID based on the PCI bus.
    PciId(PciId),
    /// ID based on a globally unique identifier.
    Uuid(DeviceUuid),
}

/// If the string contains a dash, it's interpreted as UUID, else it's interpreted as PCI ID.
impl TryFrom<&str> for UniqueId {
    type Error = GPUError;

    fn try_from(unique_id: &str) -> GPUResult<Self> {
        Ok(match unique_id.contains('-') {
            true => Self::Uuid(DeviceUuid::try_from(unique_id)?),
            false => Self::PciId(PciId::try_from(unique_id)?),
        })
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PciId(id) => id.fmt(f),
            Self::Uuid(id) => id.fmt(f),
        }
    }
}

/// Vendors of compute devices.
///
/// Devices of vendors that aren't known explicitly, e.g. CPU implementations like PoCL, are
/// reported as [`Vendor::Other`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Vendor {
    /// GPU by AMD.
    Amd,
    /// GPU by Intel.
    Intel,
    /// GPU by NVIDIA.
    Nvidia,
    /// Any other vendor.
    Other,
}

impl TryFrom<&str> for Vendor {
    type Error = GPUError;

    fn try_from(vendor: &str) -> GPUResult<Self> {
        match vendor {
            AMD_DEVICE_VENDOR_STRING => Ok(Self::Amd),
            AMD_DEVICE_ON_APPLE_VENDOR_STRING => Ok(Self::Amd),
            INTEL_DEVICE_VENDOR_STRING => Ok(Self::Intel),
            NVIDIA_DEVICE_VENDOR_STRING => Ok(Self::Nvidia),
            _ => Err(GPUError::UnsupportedVendor(vendor.to_string())),
        }
    }
}

impl TryFrom<u32> for Vendor {
    type Error = GPUError;

    fn try_from(vendor: u32) -> GPUResult<Self> {
        match vendor {
            AMD_DEVICE_VENDOR_ID => Ok(Self::Amd),
            AMD_DEVICE_ON_APPLE_VENDOR_ID => Ok(Self::Amd),
            INTEL_DEVICE_VENDOR_ID => Ok(Self::Intel),
            NVIDIA_DEVICE_VENDOR_ID => Ok(Self::Nvidia),
            _ => Err(GPUError::UnsupportedVendor(format!("0x{:x}", vendor))),
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vendor = match self {
            Self::Amd => AMD_DEVICE_VENDOR_STRING,
            Self::Intel => INTEL_DEVICE_VENDOR_STRING,
            Self::Nvidia => NVIDIA_DEVICE_VENDOR_STRING,
            Self::Other => OTHER_DEVICE_VENDOR_STRING,
        };
        write!(f, "{}", vendor)
    }
}

/// The kind of a compute device.
///
/// Algorithms pick their execution strategy based on it, e.g. CPU devices get one work-item per
/// compute unit instead of a tree reduction.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DeviceKind {
    /// A graphics card.
    Gpu,
    /// A CPU exposed through OpenCL.
    Cpu,
    /// A dedicated accelerator.
    Accelerator,
    /// Anything else, e.g. custom devices.
    Other,
}

/// Parses the names used by OpenCL for the device types, case-insensitive.
impl TryFrom<&str> for DeviceKind {
    type Error = GPUError;

    fn try_from(kind: &str) -> GPUResult<Self> {
        match kind.trim().to_ascii_uppercase().as_str() {
            "GPU" => Ok(Self::Gpu),
            "CPU" => Ok(Self::Cpu),
            "ACCELERATOR" => Ok(Self::Accelerator),
            _ => Err(GPUError::Generic(format!(
                "Unknown device type {}, expected GPU, CPU or ACCELERATOR.",
                kind
            ))),
        }
    }
}

/// An OpenCL compute device.
#[derive(Clone, Debug)]
pub struct Device {
    pub(crate) vendor: Vendor,
    /// The vendor string as reported by the driver.
    pub(crate) vendor_name: String,
    pub(crate) name: String,
    pub(crate) platform_name: String,
    pub(crate) kind: DeviceKind,
    /// The total memory of the device in bytes.
    pub(crate) memory: u64,
    /// The number of parallel compute units.
    pub(crate) compute_units: u32,
    pub(crate) max_work_group_size: usize,
    /// Major and minor version of the compute capabilitiy (only available on Nvidia GPUs).
    pub(crate) compute_capability: Option<(u32, u32)>,
    // All devices have a PCI ID. It is used as fallback in case there is not UUID.
    pub(crate) pci_id: PciId,
    pub(crate) uuid: Option<DeviceUuid>,
    pub(crate) device: opencl3::device::Device,
}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vendor.hash(state);
        self.name.hash(state);
        self.platform_name.hash(state);
        self.memory.hash(state);
        self.pci_id.hash(state);
        self.uuid.hash(state);
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.vendor == other.vendor
            && self.name == other.name
            && self.platform_name == other.platform_name
            && self.memory == other.memory
            && self.pci_id == other.pci_id
            && self.uuid == other.uuid
    }
}

impl Eq for Device {}

impl Device {
    /// Returns the [`Vendor`] of the device.
    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    /// Returns the vendor string as reported by the driver.
    pub fn vendor_name(&self) -> &str {
        &self.vendor_name
    }

    /// Returns the name of the device, e.g. "GeForce RTX 3090".
    pub fn name(&self) -> String {
        self.name.clone()
    }

    /// Returns the name of the OpenCL platform the device belongs to.
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    /// Returns whether it is a GPU, a CPU or something else.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Returns the memory of the device in bytes.
    pub fn memory(&self) -> u64 {
        self.memory
    }

    /// Returns the number of compute units of the device.
    pub fn compute_units(&self) -> u32 {
        self.compute_units
    }

    /// Returns the maximum number of work-items in a work-group.
    pub fn max_work_group_size(&self) -> usize {
        self.max_work_group_size
    }

    /// Returns the major and minor version of the compute capability (only available on Nvidia
    /// GPUs).
    pub fn compute_capability(&self) -> Option<(u32, u32)> {
        self.compute_capability
    }

    /// Returns the PCI-ID of the device, see the [`PciId`] type for more information.
    pub fn pci_id(&self) -> PciId {
        self.pci_id
    }

    /// Returns the UUID of the device if available, see the [`DeviceUuid`] type for more
    /// information.
    pub fn uuid(&self) -> Option<DeviceUuid> {
        self.uuid
    }

    /// Returns the best possible unique identifier, a UUID is preferred over a PCI ID.
    pub fn unique_id(&self) -> UniqueId {
        match self.uuid {
            Some(uuid) => UniqueId::Uuid(uuid),
            None => UniqueId::PciId(self.pci_id),
        }
    }

    /// Low-level access to the device identifier.
    ///
    /// It changes when the device is initialized and should only be used to interact with other
    /// libraries that work on the lowest OpenCL level.
    pub fn cl_device_id(&self) -> opencl::cl_device_id {
        self.device.id()
    }

    /// Returns all available devices.
    pub fn all() -> Vec<&'static Device> {
        Self::all_iter().collect()
    }

    /// Returns the device matching the PCI ID if there is one.
    pub fn by_pci_id(pci_id: PciId) -> Option<&'static Device> {
        Self::all_iter().find(|d| pci_id == d.pci_id)
    }

    /// Returns the device matching the UUID if there is one.
    pub fn by_uuid(uuid: DeviceUuid) -> Option<&'static Device> {
        Self::all_iter().find(|d| Some(uuid) == d.uuid)
    }

    /// Returns the device matching the unique ID if there is one.
    pub fn by_unique_id(unique_id: UniqueId) -> Option<&'static Device> {
        Self::all_iter().find(|d| unique_id == d.unique_id())
    }

    /// Returns the device matching the Vendor.
    pub fn by_vendor(vendor_id: Vendor) -> Vec<&'static Device> {
        Self::all_iter()
            .filter(|d| vendor_id == d.vendor())
            .collect()
    }

    /// Returns the device algorithms run on if no device is given explicitly.
    ///
    /// The device can be chosen with the `RUST_GPU_COMPUTE_DEFAULT_*` environment variables, see
    /// [`crate::Settings`]. Without those, the first GPU is used, if there is none, the first
    /// device of any kind.
    pub fn default_device() -> GPUResult<&'static Device> {
        select_default(&Self::all(), settings()).ok_or(GPUError::DeviceNotFound)
    }

    /// Returns an iterator of all available devices.
    fn all_iter() -> impl Iterator<Item = &'static Device> {
        DEVICES.iter()
    }

    fn matches(&self, settings: &Settings) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle.as_ref().map_or(true, |needle| {
                haystack
                    .to_lowercase()
                    .contains(&needle.trim().to_lowercase())
            })
        }

        contains(&self.name, &settings.default_device)
            && contains(&self.vendor_name, &settings.default_vendor)
            && contains(&self.platform_name, &settings.default_platform)
            && settings
                .default_device_kind
                .map_or(true, |kind| kind == self.kind)
    }
}

/// Picks the default device out of the given ones.
///
/// If the filters of the settings don't match any device, a warning is logged and the usual
/// preference applies.
fn select_default<'a>(devices: &[&'a Device], settings: &Settings) -> Option<&'a Device> {
    if settings.has_device_filter() {
        if let Some(device) = devices.iter().find(|device| device.matches(settings)) {
            debug!("Default device from environment: {}", device.name);
            return Some(*device);
        }
        warn!("No device matches the default device filters, falling back to the first GPU.");
    }

    devices
        .iter()
        .find(|device| device.kind == DeviceKind::Gpu)
        .or_else(|| devices.first())
        .copied()
}

/// Get a list of all available OpenCL devices.
///
/// If there is a failure retrieving a device, it won't lead to a hard error, but an error will be
/// logged and the corresponding device won't be available.
fn build_device_list() -> Vec<Device> {
    let devices = opencl::utils::build_device_list();
    debug!("loaded devices: {:?}", devices);
    devices
}
