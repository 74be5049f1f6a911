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

//! Resilient hardware telemetry polling.
//!
//! [`HardwareInfo`] produces a [`StatusSnapshot`] of GPU, host and probe
//! metrics on every call without waiting on slow measurements, and
//! [`Monitor`] drives it at a fixed rate.

pub mod api;
pub mod cli;
pub mod device;
pub mod error;
pub mod hardware;
pub mod host;
pub mod lifecycle;
pub mod monitor;
pub mod prelude;
pub mod probe;
pub mod utils;

pub mod common {
    pub mod config;
}

pub use common::config::{MonitorConfig, ProbePolicy, RetryPolicy};
pub use device::gpu_monitor::{GpuMonitor, GpuMonitorState};
pub use device::types::{Device, GpuDeviceStatus, MetricKind};
pub use error::{Error, Result};
pub use hardware::{HardwareInfo, StatusSnapshot};
pub use lifecycle::ShutdownHooks;
pub use monitor::Monitor;
pub use probe::transfer_speed::TransferSpeedConfig;
