//! Device selection for the generation models.
//!
//! Automatic selection falls back in the order
//! Metal (Apple Silicon) → CUDA (NVIDIA) → CPU.

use candle_core::Device;
use tracing::{info, warn};

use bark_core::{BarkError, BarkResult, DeviceConfig, DeviceType};

/// Parse a device name from the command line.
///
/// Unknown names select automatically.
pub fn parse_device_type(s: &str) -> DeviceType {
    match s.to_lowercase().as_str() {
        "cpu" => DeviceType::Cpu,
        "metal" | "mps" | "apple" => DeviceType::Metal,
        "cuda" | "gpu" | "nvidia" => DeviceType::Cuda,
        _ => DeviceType::Auto,
    }
}

/// Select a device according to `config` and the compiled features.
///
/// An explicitly requested accelerator that is unavailable is a
/// configuration error; `Auto` always succeeds.
pub fn select_device(config: &DeviceConfig) -> BarkResult<Device> {
    let index = config.gpu_index.unwrap_or(0);
    match config.device_type {
        DeviceType::Cpu => {
            info!("Using CPU device (forced)");
            Ok(Device::Cpu)
        }
        DeviceType::Metal => select_metal(index),
        DeviceType::Cuda => select_cuda(index),
        DeviceType::Auto => Ok(select_auto(index)),
    }
}

#[allow(unused_variables)]
fn select_auto(index: usize) -> Device {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(index) {
            Ok(device) => {
                info!("Auto-selected Metal GPU");
                return device;
            }
            Err(e) => warn!(error = %e, "Metal GPU not available"),
        }
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(index) {
            Ok(device) => {
                info!(index, "Auto-selected CUDA GPU");
                return device;
            }
            Err(e) => warn!(error = %e, "CUDA GPU not available"),
        }
    }

    info!("Using CPU device (no GPU available)");
    Device::Cpu
}

#[allow(unused_variables)]
fn select_metal(index: usize) -> BarkResult<Device> {
    #[cfg(feature = "metal")]
    {
        Device::new_metal(index)
            .inspect(|_| info!("Using Metal GPU"))
            .map_err(|e| BarkError::config(format!("Metal GPU requested but not available: {e}")))
    }

    #[cfg(not(feature = "metal"))]
    {
        Err(BarkError::config(
            "Metal GPU requested but the 'metal' feature is not enabled",
        ))
    }
}

#[allow(unused_variables)]
fn select_cuda(index: usize) -> BarkResult<Device> {
    #[cfg(feature = "cuda")]
    {
        Device::new_cuda(index)
            .inspect(|_| info!(index, "Using CUDA GPU"))
            .map_err(|e| BarkError::config(format!("CUDA GPU requested but not available: {e}")))
    }

    #[cfg(not(feature = "cuda"))]
    {
        Err(BarkError::config(
            "CUDA GPU requested but the 'cuda' feature is not enabled",
        ))
    }
}

/// Get device name for logging/display.
pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA GPU",
        Device::Metal(_) => "Metal GPU",
    }
}

/// Whether a Metal device can be opened.
pub fn is_metal_available() -> bool {
    #[cfg(feature = "metal")]
    {
        Device::new_metal(0).is_ok()
    }
    #[cfg(not(feature = "metal"))]
    {
        false
    }
}

/// Whether a CUDA device can be opened.
pub fn is_cuda_available() -> bool {
    #[cfg(feature = "cuda")]
    {
        Device::new_cuda(0).is_ok()
    }
    #[cfg(not(feature = "cuda"))]
    {
        false
    }
}
