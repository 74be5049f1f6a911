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

//! GPU telemetry aggregation over a single [`GpuBackend`].
//!
//! [`GpuMonitor`] owns the backend for its whole lifetime. It brings the
//! backend up with bounded exponential backoff, enumerates devices, and turns
//! every read failure into a sentinel plus a latched per-metric disable so a
//! broken sensor is queried once, not on every poll.

use std::thread;

use serde::Serialize;

use crate::common::config::{MonitorConfig, RetryPolicy};
use crate::device::platform_detection::detect_backend_kind;
use crate::device::readers::NativeConnector;
use crate::device::traits::{BackendConnector, GpuBackend};
use crate::device::types::{
    Device, GpuDeviceStatus, GpuStatus, MetricFlags, MetricKind, SENTINEL_F64,
};
use crate::error::{Error, Result};

/// Lifecycle of the GPU aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuMonitorState {
    Uninitialized,
    Initializing,
    Operational,
    Unavailable,
    Closed,
}

pub struct GpuMonitor {
    connector: Box<dyn BackendConnector>,
    retry: RetryPolicy,
    backend: Option<Box<dyn GpuBackend>>,
    state: GpuMonitorState,
    devices: Vec<Device>,
    /// Index-aligned with `devices`
    device_switches: Vec<MetricFlags>,
    /// One-way latch per metric kind, cleared only by `reinitialize`
    auto_enabled: MetricFlags,
    switch_gpu: bool,
    switch_vram: bool,
    closed: bool,
}

impl GpuMonitor {
    /// Creates an uninitialized monitor. Call [`initialize`](Self::initialize) next.
    pub fn new(connector: Box<dyn BackendConnector>, retry: RetryPolicy) -> Self {
        Self {
            connector,
            retry,
            backend: None,
            state: GpuMonitorState::Uninitialized,
            devices: Vec::new(),
            device_switches: Vec::new(),
            auto_enabled: MetricFlags::default(),
            switch_gpu: true,
            switch_vram: true,
            closed: false,
        }
    }

    /// Monitor bound to the backend detected on this host.
    pub fn from_config(config: &MonitorConfig) -> Self {
        let connector = NativeConnector::new(detect_backend_kind(), config.sysfs_root.clone());
        let mut monitor = Self::new(Box::new(connector), config.gpu_retry.clone());
        monitor.switch_gpu = config.switch_gpu;
        monitor.switch_vram = config.switch_vram;
        monitor
    }

    /// Brings the backend up and enumerates devices.
    ///
    /// Never fails: exhausting the retries leaves the monitor `Unavailable`
    /// and every status read degrades to sentinels.
    pub fn initialize(&mut self) -> GpuMonitorState {
        self.state = GpuMonitorState::Initializing;

        self.state = match self.connect_with_retry() {
            Some(backend) => self.setup_devices(backend),
            None => {
                tracing::warn!("No GPU monitoring libraries available.");
                GpuMonitorState::Unavailable
            }
        };
        self.state
    }

    fn connect_with_retry(&self) -> Option<Box<dyn GpuBackend>> {
        let kind = self.connector.kind();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            match self.connector.connect() {
                Ok(backend) => return Some(backend),
                Err(e) if e.is_terminal() => {
                    tracing::error!("{kind} is not installed. {e}");
                    return None;
                }
                Err(e) => {
                    if attempt + 1 < max_attempts {
                        let delay = self.retry.delay_after(attempt);
                        tracing::warn!(
                            "{kind} initialization failed (attempt {}/{max_attempts}): {e}",
                            attempt + 1
                        );
                        tracing::info!("Retrying in {:.1} seconds...", delay.as_secs_f64());
                        thread::sleep(delay);
                    }
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            tracing::error!(
                "Could not initialize {kind} after {max_attempts} attempts. Last error: {e}"
            );
        }
        None
    }

    fn setup_devices(&mut self, mut backend: Box<dyn GpuBackend>) -> GpuMonitorState {
        let count = match backend.device_count() {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("Could not count GPUs: {e}");
                0
            }
        };

        if count == 0 {
            tracing::warn!("No GPU detected, disabling GPU monitoring.");
            backend.shutdown();
            return GpuMonitorState::Unavailable;
        }

        tracing::info!("GPU/s:");
        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            let name = match backend.device_handle(index) {
                Some(handle) => backend.device_name(handle),
                None => "Unknown GPU".to_string(),
            };
            tracing::info!("{index}) {name}");
            devices.push(Device { index, name });
        }
        tracing::info!("{}", backend.driver_version());

        self.device_switches = vec![MetricFlags::default(); devices.len()];
        self.devices = devices;
        self.backend = Some(backend);
        GpuMonitorState::Operational
    }

    /// Static device catalogue discovered at initialization.
    pub fn get_info(&self) -> Vec<Device> {
        tracing::debug!("Getting GPUs info...");
        self.devices.clone()
    }

    /// Reads every enabled metric of every device.
    pub fn get_status(&mut self) -> GpuStatus {
        if self.state != GpuMonitorState::Operational {
            return GpuStatus {
                device_type: "cpu".to_string(),
                gpus: vec![GpuDeviceStatus::default()],
            };
        }
        let Some(backend) = self.backend.as_deref() else {
            return GpuStatus {
                device_type: "cpu".to_string(),
                gpus: vec![GpuDeviceStatus::default()],
            };
        };

        let mut enabled = self.auto_enabled;
        let mut gpus = Vec::with_capacity(self.devices.len());

        for (device, switches) in self.devices.iter().zip(&self.device_switches) {
            let mut status = GpuDeviceStatus::default();
            let Some(handle) = backend.device_handle(device.index) else {
                gpus.push(status);
                continue;
            };

            if self.switch_gpu && switches.utilization && enabled.utilization {
                match backend.utilization(handle) {
                    Ok(value) => {
                        if let Some(value) = value {
                            status.gpu_utilization = i64::from(value);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Could not get GPU utilization. {e}");
                        tracing::error!("Monitor of GPU is turning off.");
                        enabled.utilization = false;
                    }
                }
            }

            if self.switch_vram && switches.vram && enabled.vram {
                match backend.memory_info(handle) {
                    Ok(memory) => {
                        status.vram_used = memory.used as i64;
                        status.vram_total = memory.total as i64;
                        status.vram_used_percent = if memory.total > 0 {
                            memory.used_percent()
                        } else {
                            SENTINEL_F64
                        };
                    }
                    Err(e) => {
                        tracing::error!("Could not get GPU memory info. {e}");
                        enabled.vram = false;
                    }
                }
            }

            if switches.temperature && enabled.temperature {
                match backend.temperature(handle) {
                    Ok(value) => {
                        if let Some(value) = value {
                            status.gpu_temperature = i64::from(value);
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            "Could not get GPU temperature. Turning off this feature. {e}"
                        );
                        enabled.temperature = false;
                    }
                }
            }

            gpus.push(status);
        }

        self.auto_enabled = enabled;
        GpuStatus {
            device_type: "cuda".to_string(),
            gpus,
        }
    }

    /// Tears everything down and runs [`initialize`](Self::initialize) again.
    ///
    /// Returns whether GPU telemetry is operational afterwards.
    pub fn reinitialize(&mut self) -> bool {
        tracing::info!("Attempting to reinitialize GPU monitoring...");

        if let Some(mut backend) = self.backend.take() {
            backend.shutdown();
        }
        self.closed = false;
        self.devices.clear();
        self.device_switches.clear();
        self.auto_enabled = MetricFlags::default();
        self.state = GpuMonitorState::Uninitialized;

        self.initialize();
        if self.is_operational() {
            tracing::info!("GPU monitoring reinitialized successfully.");
            true
        } else {
            tracing::warn!("GPU monitoring reinitialization failed.");
            false
        }
    }

    /// Releases the backend. Only the first call has an effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(mut backend) = self.backend.take() {
            backend.shutdown();
        }
        self.state = GpuMonitorState::Closed;
    }

    pub fn is_operational(&self) -> bool {
        self.state == GpuMonitorState::Operational && !self.closed
    }

    pub fn state(&self) -> GpuMonitorState {
        self.state
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn switch_gpu(&self) -> bool {
        self.switch_gpu
    }

    pub fn set_switch_gpu(&mut self, enabled: bool) {
        self.switch_gpu = enabled;
    }

    pub fn switch_vram(&self) -> bool {
        self.switch_vram
    }

    pub fn set_switch_vram(&mut self, enabled: bool) {
        self.switch_vram = enabled;
    }

    /// Enables or disables one metric of one device.
    pub fn set_device_switch(&mut self, index: usize, kind: MetricKind, enabled: bool) -> Result<()> {
        let count = self.device_switches.len();
        let switches = self.device_switches.get_mut(index).ok_or_else(|| {
            Error::Validation(format!(
                "GPU index {index} is out of range ({count} device(s))."
            ))
        })?;
        switches.set(kind, enabled);
        Ok(())
    }

    pub fn device_switches(&self, index: usize) -> Option<MetricFlags> {
        self.device_switches.get(index).copied()
    }

    /// Metric kinds still allowed by the auto-disable latch.
    pub fn auto_enabled(&self) -> MetricFlags {
        self.auto_enabled
    }
}

impl Drop for GpuMonitor {
    fn drop(&mut self) {
        self.close();
    }
}
