// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device as NvmlDevice, Nvml};
use std::sync::OnceLock;

use crate::device::traits::{BackendKind, GpuBackend};
use crate::device::types::{DeviceHandle, GpuMemory};
use crate::error::{Error, Result};

const UNKNOWN_GPU: &str = "Unknown GPU";

/// Discrete NVIDIA GPUs through NVML.
pub struct NvmlBackend {
    /// `None` once shut down
    nvml: Option<Nvml>,
    /// Cached driver version (fetched only once)
    driver_version: OnceLock<String>,
}

impl NvmlBackend {
    /// Loads and initializes NVML. One call is one initialization attempt.
    pub fn init() -> Result<Self> {
        let nvml = Nvml::init().map_err(map_init_error)?;
        tracing::info!("NVML (NVIDIA) initialized.");
        Ok(Self {
            nvml: Some(nvml),
            driver_version: OnceLock::new(),
        })
    }

    fn nvml(&self) -> Result<&Nvml> {
        self.nvml
            .as_ref()
            .ok_or_else(|| Error::DeviceAccess("NVML has been shut down".to_string()))
    }

    fn device(&self, handle: DeviceHandle) -> Result<NvmlDevice<'_>> {
        self.nvml()?
            .device_by_index(handle.index())
            .map_err(|e| device_error(handle, e))
    }
}

/// Library-loading failures mean NVML is not installed; everything else may be transient.
fn map_init_error(error: NvmlError) -> Error {
    match error {
        NvmlError::LibloadingError(e) => {
            Error::ModuleNotInstalled(format!("NVML library could not be loaded: {e}"))
        }
        NvmlError::LibraryNotFound => {
            Error::ModuleNotInstalled("NVML library not found".to_string())
        }
        other => Error::PlatformInit(format!("NVML: {other}")),
    }
}

fn device_error(handle: DeviceHandle, error: NvmlError) -> Error {
    Error::DeviceAccess(format!("GPU {}: {error}", handle.index()))
}

impl GpuBackend for NvmlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Nvml
    }

    fn device_count(&self) -> Result<u32> {
        self.nvml()?
            .device_count()
            .map_err(|e| Error::DeviceAccess(format!("device count: {e}")))
    }

    fn device_name(&self, handle: DeviceHandle) -> String {
        match self.device(handle).and_then(|device| {
            device.name().map_err(|e| device_error(handle, e))
        }) {
            Ok(name) => name,
            Err(e) => {
                tracing::error!("Could not read GPU name: {e}");
                UNKNOWN_GPU.to_string()
            }
        }
    }

    fn utilization(&self, handle: DeviceHandle) -> Result<Option<u32>> {
        let rates = self
            .device(handle)?
            .utilization_rates()
            .map_err(|e| device_error(handle, e))?;
        Ok(Some(rates.gpu))
    }

    fn memory_info(&self, handle: DeviceHandle) -> Result<GpuMemory> {
        let memory = self
            .device(handle)?
            .memory_info()
            .map_err(|e| device_error(handle, e))?;
        Ok(GpuMemory {
            used: memory.used,
            total: memory.total,
        })
    }

    fn temperature(&self, handle: DeviceHandle) -> Result<Option<u32>> {
        let temperature = self
            .device(handle)?
            .temperature(TemperatureSensor::Gpu)
            .map_err(|e| device_error(handle, e))?;
        Ok(Some(temperature))
    }

    fn driver_version(&self) -> String {
        let Ok(nvml) = self.nvml() else {
            return "NVIDIA Driver: unknown".to_string();
        };
        self.driver_version
            .get_or_init(|| match nvml.sys_driver_version() {
                Ok(version) => format!("NVIDIA Driver: {version}"),
                Err(_) => "NVIDIA Driver: unknown".to_string(),
            })
            .clone()
    }

    fn shutdown(&mut self) {
        if let Some(nvml) = self.nvml.take() {
            match nvml.shutdown() {
                Ok(()) => tracing::debug!("NVML shutdown completed."),
                Err(e) => tracing::debug!("Error shutting down NVML: {e}"),
            }
        }
    }
}

impl Drop for NvmlBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_not_found_is_terminal() {
        assert!(map_init_error(NvmlError::LibraryNotFound).is_terminal());
        assert!(!map_init_error(NvmlError::DriverNotLoaded).is_terminal());
        assert!(!map_init_error(NvmlError::Unknown).is_terminal());
    }

    #[test]
    fn test_init_does_not_panic() {
        // Works both with and without an NVIDIA driver present
        match NvmlBackend::init() {
            Ok(mut backend) => {
                let _ = backend.device_count();
                backend.shutdown();
                backend.shutdown();
                assert!(backend.device_count().is_err());
            }
            Err(e) => println!("NVML unavailable: {e}"),
        }
    }
}
