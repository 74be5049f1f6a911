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

//! Scripted hardware shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hwmon_smi::prelude::*;

/// Counters and failure switches observed by [`ScriptedGpu`].
#[derive(Clone, Default)]
pub struct GpuScript {
    pub connects: Arc<AtomicUsize>,
    pub connect_failures: Arc<AtomicUsize>,
    pub not_installed: Arc<AtomicBool>,
    pub fail_temperature: Arc<AtomicBool>,
    pub temperature_reads: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
}

pub struct ScriptedGpu {
    names: Vec<String>,
    script: GpuScript,
}

impl GpuBackend for ScriptedGpu {
    fn kind(&self) -> BackendKind {
        BackendKind::Nvml
    }

    fn device_count(&self) -> Result<u32> {
        Ok(self.names.len() as u32)
    }

    fn device_name(&self, handle: DeviceHandle) -> String {
        self.names
            .get(handle.index() as usize)
            .cloned()
            .unwrap_or_else(|| "Unknown GPU".to_string())
    }

    fn utilization(&self, handle: DeviceHandle) -> Result<Option<u32>> {
        Ok(Some(50 + handle.index()))
    }

    fn memory_info(&self, _handle: DeviceHandle) -> Result<GpuMemory> {
        Ok(GpuMemory {
            used: 2 * 1024 * 1024 * 1024,
            total: 8 * 1024 * 1024 * 1024,
        })
    }

    fn temperature(&self, _handle: DeviceHandle) -> Result<Option<u32>> {
        self.script.temperature_reads.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_temperature.load(Ordering::SeqCst) {
            return Err(Error::DeviceAccess("temperature sensor offline".to_string()));
        }
        Ok(Some(65))
    }

    fn driver_version(&self) -> String {
        "NVIDIA Driver: 550.54".to_string()
    }

    fn shutdown(&mut self) {
        self.script.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn retry_policy(initial_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(initial_ms),
        multiplier: 2,
    }
}

/// A monitor whose first `connect_failures` attempts fail transiently.
pub fn scripted_monitor(names: &[&str], script: &GpuScript, retry: RetryPolicy) -> GpuMonitor {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let script = script.clone();
    let connector = (BackendKind::Nvml, move || -> Result<Box<dyn GpuBackend>> {
        let attempt = script.connects.fetch_add(1, Ordering::SeqCst);
        if script.not_installed.load(Ordering::SeqCst) {
            return Err(Error::ModuleNotInstalled("libnvidia-ml.so.1".to_string()));
        }
        if attempt < script.connect_failures.load(Ordering::SeqCst) {
            return Err(Error::PlatformInit("NVML busy".to_string()));
        }
        Ok(Box::new(ScriptedGpu {
            names: names.clone(),
            script: script.clone(),
        }))
    });
    GpuMonitor::new(Box::new(connector), retry)
}

/// Host with fixed readings.
pub struct FixedHost;

impl HostReader for FixedHost {
    fn cpu_utilization(&self) -> f64 {
        23.0
    }

    fn memory(&self) -> Usage {
        Usage::new(6 * 1024 * 1024 * 1024, 16 * 1024 * 1024 * 1024)
    }

    fn disk_usage(&self, path: &str) -> Result<Usage> {
        match path {
            "/" => Ok(Usage::new(100, 400)),
            _ => Err(Error::DeviceAccess(format!("no filesystem mounted at {path}"))),
        }
    }
}

/// Aggregator over scripted hardware with both probes unavailable.
pub fn scripted_hardware(names: &[&str], script: &GpuScript) -> HardwareInfo {
    scripted_hardware_with_retry(names, script, retry_policy(1))
}

pub fn scripted_hardware_with_retry(
    names: &[&str],
    script: &GpuScript,
    retry: RetryPolicy,
) -> HardwareInfo {
    let mut gpu = scripted_monitor(names, script, retry);
    gpu.initialize();
    HardwareInfo::from_parts(
        Box::new(FixedHost),
        gpu,
        TransferSpeedInfo::with_backend(None, 32, Duration::from_secs(5), false),
        SharedGpuMemoryInfo::with_probe(
            || Err(Error::NotSupported("shared GPU memory".to_string())),
            ProbePolicy::shared_memory(),
            false,
        ),
        &MonitorConfig::default(),
    )
}

pub fn shared_hardware(names: &[&str], script: &GpuScript) -> Arc<Mutex<HardwareInfo>> {
    Arc::new(Mutex::new(scripted_hardware(names, script)))
}
