use std::convert::TryFrom;
use std::path::PathBuf;

use log::{debug, warn};
use opencl3::device::{
    CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
};
use sha2::{Digest, Sha256};

use crate::config::settings;
use crate::device::{Device, DeviceKind, DeviceUuid, PciId, Vendor};
use crate::error::{GPUError, GPUResult};

/// Returns the vendor, falling back to [`Vendor::Other`] for unknown ones, and the raw vendor
/// string.
fn get_vendor(device: &opencl3::device::Device) -> GPUResult<(Vendor, String)> {
    let vendor_name = device
        .vendor()
        .map_err(GPUError::DeviceInfoNotAvailable)?
        .trim()
        .to_string();
    let vendor = device
        .vendor_id()
        .ok()
        .and_then(|vendor_id| Vendor::try_from(vendor_id).ok())
        .or_else(|| Vendor::try_from(vendor_name.as_str()).ok())
        .unwrap_or(Vendor::Other);
    Ok((vendor, vendor_name))
}

/// The PCI-ID is the combination of the PCI Bus ID and PCI Device ID.
///
/// It is the first two identifiers of e.g. `lspci`:
///
/// ```text
///     4e:00.0 VGA compatible controller
///     || └└-- Device ID
///     └└-- Bus ID
/// ```
fn get_pci_id(device: &opencl3::device::Device, vendor: Vendor) -> GPUResult<PciId> {
    let id = match vendor {
        Vendor::Amd => {
            let topo = device.topology_amd()?;
            let bus_id = topo.bus as u8 as u16;
            let device_id = topo.device as u8 as u16;
            (bus_id << 8) | device_id
        }
        Vendor::Nvidia => {
            let bus_id = device.pci_bus_id_nv()? as u16;
            let device_id = device.pci_slot_id_nv()? as u16;
            (bus_id << 8) | device_id
        }
        Vendor::Intel | Vendor::Other => {
            let info = device.pci_bus_info_khr()?;
            ((info.pci_bus as u16) << 8) | info.pci_device as u16
        }
    };
    Ok(id.into())
}

fn get_uuid(device: &opencl3::device::Device) -> GPUResult<DeviceUuid> {
    let uuid = device.uuid_khr()?;
    Ok(uuid.into())
}

fn get_memory(device: &opencl3::device::Device) -> GPUResult<u64> {
    device
        .global_mem_size()
        .map_err(GPUError::DeviceInfoNotAvailable)
}

fn get_compute_units(device: &opencl3::device::Device) -> GPUResult<u32> {
    device
        .max_compute_units()
        .map_err(GPUError::DeviceInfoNotAvailable)
}

fn get_max_work_group_size(device: &opencl3::device::Device) -> GPUResult<usize> {
    device
        .max_work_group_size()
        .map_err(GPUError::DeviceInfoNotAvailable)
}

/// Get the major an minor version of the compute capability (only available on Nvidia GPUs).
fn get_compute_capability(device: &opencl3::device::Device) -> GPUResult<(u32, u32)> {
    let major = device.compute_capability_major_nv()?;
    let minor = device.compute_capability_minor_nv()?;
    Ok((major, minor))
}

fn get_kind(device: &opencl3::device::Device) -> GPUResult<DeviceKind> {
    let dev_type = device
        .dev_type()
        .map_err(GPUError::DeviceInfoNotAvailable)?;
    let kind = if dev_type & CL_DEVICE_TYPE_GPU != 0 {
        DeviceKind::Gpu
    } else if dev_type & CL_DEVICE_TYPE_CPU != 0 {
        DeviceKind::Cpu
    } else if dev_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceKind::Accelerator
    } else {
        DeviceKind::Other
    };
    Ok(kind)
}

/// Returns the device and whether it has a real PCI-ID.
fn describe_device(
    device: opencl3::device::Device,
    platform_name: &str,
) -> GPUResult<(Device, bool)> {
    let (vendor, vendor_name) = get_vendor(&device)?;
    let name = device.name()?.trim().to_string();
    let compute_capability = match vendor {
        Vendor::Nvidia => get_compute_capability(&device).ok(),
        _ => None,
    };
    let pci_id = get_pci_id(&device, vendor);
    let has_pci_id = pci_id.is_ok();

    Ok((
        Device {
            vendor,
            vendor_name,
            name,
            platform_name: platform_name.to_string(),
            kind: get_kind(&device)?,
            memory: get_memory(&device)?,
            compute_units: get_compute_units(&device)?,
            max_work_group_size: get_max_work_group_size(&device)?,
            compute_capability,
            // Use a temporary PCI-ID and replace it later with a non-colliding one.
            pci_id: pci_id.unwrap_or_default(),
            uuid: get_uuid(&device).ok(),
            device,
        },
        has_pci_id,
    ))
}

/// Get a list of all available and supported devices.
///
/// If there is a failure retrieving a device, it won't lead to a hard error, but an error will be
/// logged and the corresponding device won't be available.
pub(crate) fn build_device_list() -> Vec<Device> {
    let mut all_devices = Vec::new();
    let mut devices_without_pci_id = Vec::new();

    let platforms = match opencl3::platform::get_platforms() {
        Ok(platforms) => platforms,
        Err(error) => {
            warn!("Unable to retrieve OpenCL platforms: {:?}", error);
            return all_devices;
        }
    };

    for platform in platforms.iter() {
        let platform_name = match platform.name() {
            Ok(name) => name.trim().to_string(),
            Err(error) => {
                warn!("Cannot get OpenCL platform name: {:?}", error);
                continue;
            }
        };
        let device_ids = match platform.get_devices(CL_DEVICE_TYPE_ALL) {
            Ok(device_ids) => device_ids,
            Err(error) => {
                debug!("No devices on platform {}: {:?}", platform_name, error);
                continue;
            }
        };

        for device_id in device_ids {
            match describe_device(opencl3::device::Device::new(device_id), &platform_name) {
                Ok((device, true)) => all_devices.push(device),
                Ok((device, false)) => devices_without_pci_id.push(device),
                Err(error) => warn!(
                    "Cannot get device info on platform {}: {:?}",
                    platform_name, error
                ),
            }
        }
    }

    // CPU devices and integrated GPUs might have neither a PCI-ID, nor a UUID. We use a fake
    // PCI-ID instead, which is generated by enumerating the available devices. In order to make
    // that case easier to spot when debugging issues, a starting number which is pleasant to the
    // human eye was choosen, that works both, decimal and hexadecimal (4660 == 0x1234).
    let mut enumerated_device: u16 = 4660;
    for mut device in devices_without_pci_id.into_iter() {
        // Make sure that no device has that actual PCI-ID
        while all_devices
            .iter()
            .any(|d: &Device| d.pci_id() == enumerated_device.into())
        {
            enumerated_device += 1;
        }
        device.pci_id = PciId::from(enumerated_device);
        enumerated_device += 1;
        all_devices.push(device);
    }

    all_devices
}

/// The file name a compiled binary is stored under.
///
/// If there are multiple devices with the same name on the same platform and neither has a
/// PCI-ID, then there will be a collision. For now, we assume that in the unlikely event of a
/// collision, the same binary can be used.
fn binary_file_name(device: &Device, cl_source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device.name.as_bytes());
    hasher.update(device.platform_name.as_bytes());
    hasher.update(u16::from(device.pci_id).to_be_bytes());
    hasher.update(cl_source.as_bytes());
    format!("{}.bin", hex::encode(hasher.finalize()))
}

/// Returns the path the compiled binary of the given source is stored at, or `None` if the disk
/// cache is disabled.
pub(crate) fn cache_path(device: &Device, cl_source: &str) -> std::io::Result<Option<PathBuf>> {
    let path = match settings().cache_dir() {
        Some(path) => path,
        None => return Ok(None),
    };
    if !path.exists() {
        std::fs::create_dir_all(&path)?;
    }
    Ok(Some(path.join(binary_file_name(device, cl_source))))
}

#[cfg(test)]
mod tests {
    use super::binary_file_name;
    use crate::device::{Device, DeviceKind, PciId, Vendor};

    fn device(name: &str, pci_id: u16) -> Device {
        Device {
            vendor: Vendor::Nvidia,
            vendor_name: "NVIDIA Corporation".to_string(),
            name: name.to_string(),
            platform_name: "NVIDIA CUDA".to_string(),
            kind: DeviceKind::Gpu,
            memory: 24 << 30,
            compute_units: 82,
            max_work_group_size: 1024,
            compute_capability: Some((8, 6)),
            pci_id: PciId::from(pci_id),
            uuid: None,
            device: opencl3::device::Device::new(std::ptr::null_mut()),
        }
    }

    #[test]
    fn binary_file_names() {
        let rtx = device("GeForce RTX 3090", 0x0100);
        let source = "__kernel void k() {}";
        let name = binary_file_name(&rtx, source);
        assert!(name.ends_with(".bin"));
        assert_eq!(name.len(), 64 + ".bin".len());
        assert_eq!(name, binary_file_name(&rtx, source));

        assert_ne!(name, binary_file_name(&rtx, "__kernel void other() {}"));
        assert_ne!(
            name,
            binary_file_name(&device("GeForce RTX 3090", 0x0200), source),
            "Same GPU model in another slot gets its own binary."
        );
        assert_ne!(name, binary_file_name(&device("TITAN RTX", 0x0100), source));
    }
}
