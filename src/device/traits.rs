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

use std::fmt;

use crate::device::types::{DeviceHandle, GpuMemory};
use crate::error::Result;

/// The two mutually exclusive GPU telemetry providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Discrete NVIDIA GPU through NVML
    Nvml,
    /// NVIDIA Jetson SoC through sysfs
    Jetson,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Nvml => write!(f, "NVML"),
            BackendKind::Jetson => write!(f, "Jetson"),
        }
    }
}

/// Capability interface over a vendor GPU telemetry SDK.
///
/// Reads return `Err` when the SDK reports a failure; the aggregator treats
/// that as grounds to auto-disable the metric kind. `Ok(None)` is a soft
/// "no value right now" that leaves the metric enabled.
pub trait GpuBackend: Send {
    fn kind(&self) -> BackendKind;

    fn device_count(&self) -> Result<u32>;

    /// `None` when `index` is out of range.
    fn device_handle(&self, index: u32) -> Option<DeviceHandle> {
        match self.device_count() {
            Ok(count) if index < count => Some(DeviceHandle(index)),
            _ => None,
        }
    }

    /// Never fails; falls back to a fixed placeholder.
    fn device_name(&self, handle: DeviceHandle) -> String;

    /// GPU busy percentage in `[0, 100]`.
    fn utilization(&self, handle: DeviceHandle) -> Result<Option<u32>>;

    fn memory_info(&self, handle: DeviceHandle) -> Result<GpuMemory>;

    /// Core temperature in degrees Celsius.
    fn temperature(&self, handle: DeviceHandle) -> Result<Option<u32>>;

    /// Best-effort driver description, never fails.
    fn driver_version(&self) -> String;

    /// Releases native resources. Must be idempotent.
    fn shutdown(&mut self);
}

/// Constructs a backend of a fixed kind. One call is one initialization attempt.
pub trait BackendConnector: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn connect(&self) -> Result<Box<dyn GpuBackend>>;
}

impl<F> BackendConnector for (BackendKind, F)
where
    F: Fn() -> Result<Box<dyn GpuBackend>> + Send + Sync,
{
    fn kind(&self) -> BackendKind {
        self.0
    }

    fn connect(&self) -> Result<Box<dyn GpuBackend>> {
        (self.1)()
    }
}
