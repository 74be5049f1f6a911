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

//! The system-wide aggregator.
//!
//! [`HardwareInfo`] composes the host readings, the GPU aggregator and both
//! background-probe caches into one [`StatusSnapshot`]. It keeps no retry or
//! cache state of its own: each nested component owns its switches and this
//! type forwards to them.

use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::common::config::MonitorConfig;
use crate::device::gpu_monitor::GpuMonitor;
use crate::device::types::{Device, GpuDeviceStatus, MetricKind, SENTINEL, SENTINEL_F64};
use crate::error::{Error, Result};
use crate::host::{system_summary, HostReader, LocalHostReader, Usage};
use crate::lifecycle::ShutdownHooks;
use crate::probe::shared_memory::SharedGpuMemoryInfo;
use crate::probe::transfer_speed::{TransferSpeedConfig, TransferSpeedInfo};

/// One fully populated reading of every metric.
///
/// Unavailable or disabled values carry `-1` / `-1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub device_type: String,
    pub gpus: Vec<GpuDeviceStatus>,
    pub cpu_utilization: f64,
    pub ram_total: i64,
    pub ram_used: i64,
    pub ram_used_percent: f64,
    pub hdd_total: i64,
    pub hdd_used: i64,
    pub hdd_used_percent: f64,
    pub vram_transfer_speed: f64,
    pub shared_gpu_transfer_speed: f64,
    pub shared_gpu_memory_used: i64,
    pub shared_gpu_memory_total: i64,
    pub shared_gpu_memory_percent: f64,
    pub time: String,
}

/// Bytes and percentage of a reading, or sentinels.
fn usage_fields(usage: Option<Usage>) -> (i64, i64, f64) {
    match usage {
        Some(usage) => (usage.total as i64, usage.used as i64, usage.percent),
        None => (SENTINEL, SENTINEL, SENTINEL_F64),
    }
}

pub struct HardwareInfo {
    host: Box<dyn HostReader>,
    gpu: GpuMonitor,
    transfer_speed: TransferSpeedInfo,
    shared_gpu_memory: SharedGpuMemoryInfo,
    switch_cpu: bool,
    switch_hdd: bool,
    switch_ram: bool,
    which_hdd: String,
    closed: bool,
}

impl HardwareInfo {
    /// Detects the local hardware and brings the GPU backend up.
    ///
    /// May block for a few seconds while GPU initialization retries.
    pub fn new(config: MonitorConfig) -> Self {
        tracing::info!("{}", system_summary());

        let mut gpu = GpuMonitor::from_config(&config);
        gpu.initialize();

        Self::from_parts(
            Box::new(LocalHostReader::new()),
            gpu,
            TransferSpeedInfo::new(&config),
            SharedGpuMemoryInfo::new(config.switch_shared_gpu_memory),
            &config,
        )
    }

    /// Assembles the aggregator from prepared components.
    ///
    /// `gpu` is used as is; initialize it first if it should report devices.
    pub fn from_parts(
        host: Box<dyn HostReader>,
        gpu: GpuMonitor,
        transfer_speed: TransferSpeedInfo,
        shared_gpu_memory: SharedGpuMemoryInfo,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            host,
            gpu,
            transfer_speed,
            shared_gpu_memory,
            switch_cpu: config.switch_cpu,
            switch_hdd: config.switch_hdd,
            switch_ram: config.switch_ram,
            which_hdd: config.which_hdd.clone(),
            closed: false,
        }
    }

    /// Builds a fresh snapshot. Never blocks on a background probe.
    pub fn get_status(&mut self) -> StatusSnapshot {
        let cpu_utilization = if self.switch_cpu {
            self.host.cpu_utilization()
        } else {
            SENTINEL_F64
        };

        let ram = self.switch_ram.then(|| self.host.memory());
        let (ram_total, ram_used, ram_used_percent) = usage_fields(ram);

        let hdd = if self.switch_hdd {
            match self.host.disk_usage(&self.which_hdd) {
                Ok(usage) => Some(usage),
                Err(e) => {
                    tracing::debug!("Disk usage of {} unavailable: {e}", self.which_hdd);
                    None
                }
            }
        } else {
            None
        };
        let (hdd_total, hdd_used, hdd_used_percent) = usage_fields(hdd);

        let gpu = self.gpu.get_status();
        let speeds = self.transfer_speed.get_speeds();
        let shared = self.shared_gpu_memory.get_shared_gpu_memory_info();

        StatusSnapshot {
            device_type: gpu.device_type,
            gpus: gpu.gpus,
            cpu_utilization,
            ram_total,
            ram_used,
            ram_used_percent,
            hdd_total,
            hdd_used,
            hdd_used_percent,
            vram_transfer_speed: speeds.vram_speed,
            shared_gpu_transfer_speed: speeds.shared_gpu_speed,
            shared_gpu_memory_used: shared.used,
            shared_gpu_memory_total: shared.total,
            shared_gpu_memory_percent: shared.percent,
            time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn get_gpu_info(&self) -> Vec<Device> {
        self.gpu.get_info()
    }

    pub fn get_transfer_speed_info(&self) -> TransferSpeedConfig {
        self.transfer_speed.get_info()
    }

    /// Rebuilds the GPU aggregator and forgets both probe caches.
    pub fn reinitialize(&mut self) -> bool {
        tracing::info!("Reinitializing hardware monitoring");
        self.closed = false;
        let success = self.gpu.reinitialize();
        self.transfer_speed.reset();
        self.shared_gpu_memory.reset();
        success
    }

    /// Releases the GPU backend. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.gpu.close();
        tracing::info!("Hardware monitoring closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes `hardware` when the process shuts down, if it is still alive.
    pub fn register_shutdown(hardware: &Arc<Mutex<HardwareInfo>>, hooks: &ShutdownHooks) {
        let weak = Arc::downgrade(hardware);
        hooks.register("hardware-info", move || {
            if let Some(hardware) = weak.upgrade() {
                hardware.lock().unwrap_or_else(|e| e.into_inner()).close();
            }
        });
    }

    pub fn switch_cpu(&self) -> bool {
        self.switch_cpu
    }

    pub fn set_switch_cpu(&mut self, enabled: bool) {
        self.switch_cpu = enabled;
    }

    pub fn switch_ram(&self) -> bool {
        self.switch_ram
    }

    pub fn set_switch_ram(&mut self, enabled: bool) {
        self.switch_ram = enabled;
    }

    pub fn switch_hdd(&self) -> bool {
        self.switch_hdd
    }

    pub fn set_switch_hdd(&mut self, enabled: bool) {
        self.switch_hdd = enabled;
    }

    pub fn which_hdd(&self) -> &str {
        &self.which_hdd
    }

    pub fn set_which_hdd(&mut self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(Error::Validation("whichHDD must not be empty.".to_string()));
        }
        self.which_hdd = path;
        Ok(())
    }

    pub fn switch_gpu(&self) -> bool {
        self.gpu.switch_gpu()
    }

    pub fn set_switch_gpu(&mut self, enabled: bool) {
        self.gpu.set_switch_gpu(enabled);
    }

    pub fn switch_vram(&self) -> bool {
        self.gpu.switch_vram()
    }

    pub fn set_switch_vram(&mut self, enabled: bool) {
        self.gpu.set_switch_vram(enabled);
    }

    pub fn switch_transfer_speed(&self) -> bool {
        self.transfer_speed.switch_transfer_speed()
    }

    pub fn set_switch_transfer_speed(&mut self, enabled: bool) {
        self.transfer_speed.set_switch_transfer_speed(enabled);
    }

    pub fn switch_shared_gpu_memory(&self) -> bool {
        self.shared_gpu_memory.switch_shared_gpu_memory()
    }

    pub fn set_switch_shared_gpu_memory(&mut self, enabled: bool) {
        self.shared_gpu_memory.set_switch_shared_gpu_memory(enabled);
    }

    /// Toggles one metric of one GPU; out-of-range indices are rejected.
    pub fn set_device_switch(&mut self, index: usize, kind: MetricKind, enabled: bool) -> Result<()> {
        self.gpu.set_device_switch(index, kind, enabled)
    }

    pub fn gpu(&self) -> &GpuMonitor {
        &self.gpu
    }
}

impl Drop for HardwareInfo {
    fn drop(&mut self) {
        self.close();
    }
}
