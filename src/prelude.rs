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

//! The hwmon-smi prelude.
//!
//! ```rust
//! use hwmon_smi::prelude::*;
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use hwmon_smi::prelude::*;
//!
//! let mut hw = HardwareInfo::new(MonitorConfig::default());
//! let status = hw.get_status();
//! println!("{} GPU(s), CPU {}%", status.gpus.len(), status.cpu_utilization);
//! hw.close();
//! ```

// Aggregator and driver
pub use crate::hardware::{HardwareInfo, StatusSnapshot};
pub use crate::lifecycle::ShutdownHooks;
pub use crate::monitor::Monitor;

// Configuration
pub use crate::common::config::{MonitorConfig, ProbePolicy, RetryPolicy};

// Error types
pub use crate::error::{Error, Result};

// GPU telemetry
pub use crate::device::gpu_monitor::{GpuMonitor, GpuMonitorState};
pub use crate::device::traits::{BackendConnector, BackendKind, GpuBackend};
pub use crate::device::types::{
    Device, DeviceHandle, GpuDeviceStatus, GpuMemory, GpuStatus, MetricFlags, MetricKind,
};

// Host readings
pub use crate::host::{HostReader, LocalHostReader, Usage};

// Background probes
pub use crate::probe::{
    ProbeCache, ProbeValue, SharedGpuMemory, SharedGpuMemoryInfo, TransferBackend,
    TransferSpeedConfig, TransferSpeedInfo, TransferSpeeds,
};
