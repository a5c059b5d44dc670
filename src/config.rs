//! Settings that are read from the environment.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `RUST_GPU_COMPUTE_DEFAULT_DEVICE` | Part of the name of the device to use by default |
//! | `RUST_GPU_COMPUTE_DEFAULT_DEVICE_TYPE` | `GPU`, `CPU` or `ACCELERATOR` |
//! | `RUST_GPU_COMPUTE_DEFAULT_VENDOR` | Part of the vendor string of the default device |
//! | `RUST_GPU_COMPUTE_DEFAULT_PLATFORM` | Part of the platform name of the default device |
//! | `RUST_GPU_COMPUTE_CACHE_DIR` | Directory for compiled program binaries |
//! | `RUST_GPU_COMPUTE_DISABLE_CACHE` | If set, compiled binaries aren't stored on disk |
//! | `RUST_GPU_COMPUTE_PROGRAM_CACHE_SIZE` | Number of programs kept in memory per queue |

use std::convert::TryFrom;
use std::env;
use std::path::PathBuf;

use log::{info, warn};
use once_cell::sync::Lazy;

use crate::device::DeviceKind;

const DEFAULT_DEVICE_ENV: &str = "RUST_GPU_COMPUTE_DEFAULT_DEVICE";
const DEFAULT_DEVICE_TYPE_ENV: &str = "RUST_GPU_COMPUTE_DEFAULT_DEVICE_TYPE";
const DEFAULT_VENDOR_ENV: &str = "RUST_GPU_COMPUTE_DEFAULT_VENDOR";
const DEFAULT_PLATFORM_ENV: &str = "RUST_GPU_COMPUTE_DEFAULT_PLATFORM";
const CACHE_DIR_ENV: &str = "RUST_GPU_COMPUTE_CACHE_DIR";
const DISABLE_CACHE_ENV: &str = "RUST_GPU_COMPUTE_DISABLE_CACHE";
const PROGRAM_CACHE_SIZE_ENV: &str = "RUST_GPU_COMPUTE_PROGRAM_CACHE_SIZE";

/// The number of programs that are kept in memory per queue if not configured otherwise.
pub const DEFAULT_PROGRAM_CACHE_SIZE: usize = 64;

/// Name of the directory within the home directory, where compiled programs are stored.
const CACHE_DIR_NAME: &str = ".rust-gpu-compute";

static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);

/// Returns the settings of this process. They are read from the environment on first use.
pub fn settings() -> &'static Settings {
    &SETTINGS
}

/// Configuration of device selection and program caching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Case-insensitive part of the name of the default device.
    pub default_device: Option<String>,
    /// The kind of the default device.
    pub default_device_kind: Option<DeviceKind>,
    /// Case-insensitive part of the vendor string of the default device.
    pub default_vendor: Option<String>,
    /// Case-insensitive part of the platform name of the default device.
    pub default_platform: Option<String>,
    /// Directory where compiled program binaries are stored. `None` means the default location
    /// within the home directory.
    pub cache_dir: Option<PathBuf>,
    /// Whether compiled program binaries are stored on disk.
    pub disk_cache: bool,
    /// Maximum number of programs kept in memory per queue.
    pub program_cache_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_device: None,
            default_device_kind: None,
            default_vendor: None,
            default_platform: None,
            cache_dir: None,
            disk_cache: true,
            program_cache_size: DEFAULT_PROGRAM_CACHE_SIZE,
        }
    }
}

impl Settings {
    /// Reads the settings from the environment.
    ///
    /// Invalid values are logged and replaced by their default.
    pub fn from_env() -> Self {
        let mut settings = Self {
            default_device: non_empty_var(DEFAULT_DEVICE_ENV),
            default_vendor: non_empty_var(DEFAULT_VENDOR_ENV),
            default_platform: non_empty_var(DEFAULT_PLATFORM_ENV),
            cache_dir: non_empty_var(CACHE_DIR_ENV).map(PathBuf::from),
            disk_cache: env::var_os(DISABLE_CACHE_ENV).is_none(),
            ..Default::default()
        };

        if let Some(kind) = non_empty_var(DEFAULT_DEVICE_TYPE_ENV) {
            match DeviceKind::try_from(kind.as_str()) {
                Ok(kind) => settings.default_device_kind = Some(kind),
                Err(_) => warn!("Ignoring invalid {}: {}", DEFAULT_DEVICE_TYPE_ENV, kind),
            }
        }

        if let Some(size) = non_empty_var(PROGRAM_CACHE_SIZE_ENV) {
            match size.trim().parse::<usize>() {
                Ok(size) if size > 0 => {
                    info!("Keeping up to {} programs in memory per queue.", size);
                    settings.program_cache_size = size;
                }
                _ => warn!("Ignoring invalid {}: {}", PROGRAM_CACHE_SIZE_ENV, size),
            }
        }

        if !settings.disk_cache {
            info!("Compiled programs won't be cached on disk.");
        }

        settings
    }

    /// Returns true if any of the default device filters is set.
    pub fn has_device_filter(&self) -> bool {
        self.default_device.is_some()
            || self.default_device_kind.is_some()
            || self.default_vendor.is_some()
            || self.default_platform.is_some()
    }

    /// The directory where compiled binaries are stored, or `None` if the disk cache is disabled
    /// or no home directory can be found.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        if !self.disk_cache {
            return None;
        }
        self.cache_dir
            .clone()
            .or_else(|| home::home_dir().map(|home| home.join(CACHE_DIR_NAME)))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 7] = [
        DEFAULT_DEVICE_ENV,
        DEFAULT_DEVICE_TYPE_ENV,
        DEFAULT_VENDOR_ENV,
        DEFAULT_PLATFORM_ENV,
        CACHE_DIR_ENV,
        DISABLE_CACHE_ENV,
        PROGRAM_CACHE_SIZE_ENV,
    ];

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let kvs: Vec<(&str, Option<&str>)> = ALL_VARS
            .iter()
            .map(|key| {
                let value = vars.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect();
        temp_env::with_vars(kvs, f);
    }

    #[test]
    fn settings_default() {
        with_env(&[], || {
            let settings = Settings::from_env();
            assert_eq!(settings, Settings::default());
            assert!(!settings.has_device_filter());
        });
    }

    #[test]
    fn settings_device_filter() {
        with_env(
            &[
                (DEFAULT_DEVICE_ENV, "RTX"),
                (DEFAULT_DEVICE_TYPE_ENV, "cpu"),
                (DEFAULT_VENDOR_ENV, "Intel"),
                (DEFAULT_PLATFORM_ENV, "Portable"),
            ],
            || {
                let settings = Settings::from_env();
                assert_eq!(settings.default_device.as_deref(), Some("RTX"));
                assert_eq!(settings.default_device_kind, Some(DeviceKind::Cpu));
                assert_eq!(settings.default_vendor.as_deref(), Some("Intel"));
                assert_eq!(settings.default_platform.as_deref(), Some("Portable"));
                assert!(settings.has_device_filter());
            },
        );
    }

    #[test]
    fn settings_invalid_values_fall_back() {
        with_env(
            &[
                (DEFAULT_DEVICE_TYPE_ENV, "quantum"),
                (PROGRAM_CACHE_SIZE_ENV, "lots"),
                (DEFAULT_DEVICE_ENV, "  "),
            ],
            || {
                let settings = Settings::from_env();
                assert_eq!(settings.default_device_kind, None);
                assert_eq!(settings.default_device, None);
                assert_eq!(settings.program_cache_size, DEFAULT_PROGRAM_CACHE_SIZE);
            },
        );
        with_env(&[(PROGRAM_CACHE_SIZE_ENV, "0")], || {
            assert_eq!(
                Settings::from_env().program_cache_size,
                DEFAULT_PROGRAM_CACHE_SIZE
            );
        });
    }

    #[test]
    fn settings_cache() {
        with_env(
            &[
                (CACHE_DIR_ENV, "/tmp/gpu-cache"),
                (PROGRAM_CACHE_SIZE_ENV, "8"),
            ],
            || {
                let settings = Settings::from_env();
                assert_eq!(settings.program_cache_size, 8);
                assert_eq!(settings.cache_dir(), Some(PathBuf::from("/tmp/gpu-cache")));
            },
        );
        with_env(
            &[
                (CACHE_DIR_ENV, "/tmp/gpu-cache"),
                (DISABLE_CACHE_ENV, "1"),
            ],
            || {
                let settings = Settings::from_env();
                assert!(!settings.disk_cache);
                assert_eq!(settings.cache_dir(), None);
            },
        );
    }
}
