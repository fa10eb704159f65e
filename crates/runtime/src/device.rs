//! Compute device selection.
//!
//! `Auto` tries Metal, then CUDA, then falls back to the CPU. GPU backends
//! are only available when the matching cargo feature is enabled.

use candle_core::Device;
use tracing::{info, warn};

use tts_core::{DeviceType, TtsError, TtsResult};
use tts_core::config::DeviceConfig;

/// Device preference for model loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Metal,
    Cuda,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "metal" | "mps" => Ok(Self::Metal),
            "cuda" | "gpu" => Ok(Self::Cuda),
            _ => Err(format!("unknown device: {s}")),
        }
    }
}

impl From<DeviceType> for DevicePreference {
    fn from(device_type: DeviceType) -> Self {
        match device_type {
            DeviceType::Auto => Self::Auto,
            DeviceType::Cpu => Self::Cpu,
            DeviceType::Cuda => Self::Cuda,
            DeviceType::Metal => Self::Metal,
        }
    }
}

impl From<DevicePreference> for DeviceType {
    fn from(preference: DevicePreference) -> Self {
        match preference {
            DevicePreference::Auto => Self::Auto,
            DevicePreference::Cpu => Self::Cpu,
            DevicePreference::Cuda => Self::Cuda,
            DevicePreference::Metal => Self::Metal,
        }
    }
}

/// Select a device for `preference`, using GPU `index` when one is requested.
pub fn select_device(preference: DevicePreference, index: usize) -> TtsResult<Device> {
    match preference {
        DevicePreference::Cpu => {
            info!("Using CPU device (forced)");
            Ok(Device::Cpu)
        }
        DevicePreference::Metal => select_metal(index),
        DevicePreference::Cuda => select_cuda(index),
        DevicePreference::Auto => Ok(select_auto(index)),
    }
}

/// Select the device described by the `device` section of the runtime config.
pub fn select_from_config(config: &DeviceConfig) -> TtsResult<Device> {
    select_device(config.device_type.into(), config.gpu_index.unwrap_or(0))
}

#[allow(unused_variables)]
fn select_auto(index: usize) -> Device {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(index) {
            Ok(device) => {
                info!(index, "Auto-selected Metal GPU");
                return device;
            }
            Err(e) => warn!("Metal GPU not available: {e}"),
        }
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(index) {
            Ok(device) => {
                info!(index, "Auto-selected CUDA GPU");
                return device;
            }
            Err(e) => warn!("CUDA GPU not available: {e}"),
        }
    }

    info!("Using CPU device (no GPU available)");
    Device::Cpu
}

#[allow(unused_variables)]
fn select_metal(index: usize) -> TtsResult<Device> {
    #[cfg(feature = "metal")]
    {
        Device::new_metal(index)
            .inspect(|_| info!(index, "Using Metal GPU"))
            .map_err(|e| TtsError::config(format!("Metal GPU {index} not available: {e}")))
    }

    #[cfg(not(feature = "metal"))]
    {
        warn!("Metal requested without the 'metal' feature");
        Err(TtsError::config(
            "Metal GPU requested but the 'metal' feature is not enabled",
        ))
    }
}

#[allow(unused_variables)]
fn select_cuda(index: usize) -> TtsResult<Device> {
    #[cfg(feature = "cuda")]
    {
        Device::new_cuda(index)
            .inspect(|_| info!(index, "Using CUDA GPU"))
            .map_err(|e| TtsError::config(format!("CUDA GPU {index} not available: {e}")))
    }

    #[cfg(not(feature = "cuda"))]
    {
        warn!("CUDA requested without the 'cuda' feature");
        Err(TtsError::config(
            "CUDA GPU requested but the 'cuda' feature is not enabled",
        ))
    }
}

/// Short device name for logs and `info` output.
pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA GPU",
        Device::Metal(_) => "Metal GPU",
    }
}
