use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested compute device, as written in config or on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelector {
    /// CUDA when the execution provider is usable, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// Device a model session was actually built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda { device_id: i32 },
}

impl DeviceSelector {
    /// Resolve the selector once, at model load time.
    pub fn resolve(self) -> Device {
        match self {
            DeviceSelector::Cpu => Device::Cpu,
            DeviceSelector::Cuda => Device::Cuda { device_id: 0 },
            DeviceSelector::Auto => {
                if cuda_available() {
                    Device::Cuda { device_id: 0 }
                } else {
                    Device::Cpu
                }
            }
        }
    }
}

fn cuda_available() -> bool {
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            tracing::debug!("CUDA availability probe failed: {}", e);
            false
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda { device_id } => write!(f, "cuda:{}", device_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_selectors_resolve_without_probing() {
        assert_eq!(DeviceSelector::Cpu.resolve(), Device::Cpu);
        assert_eq!(
            DeviceSelector::Cuda.resolve(),
            Device::Cuda { device_id: 0 }
        );
    }

    #[test]
    fn display_names() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Cuda { device_id: 1 }.to_string(), "cuda:1");
    }
}
