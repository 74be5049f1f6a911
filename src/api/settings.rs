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

//! Validation of settings bodies.
//!
//! Each body is checked in full by `from_json` before anything is applied,
//! so a request with one bad key changes nothing.

use serde_json::{Map, Value};

use crate::device::types::MetricKind;
use crate::error::{Error, Result};
use crate::hardware::HardwareInfo;
use crate::monitor::Monitor;

fn object(body: &Value) -> Result<&Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| Error::Validation("Request body must be a JSON object.".to_string()))
}

/// `None` when the key is absent or null.
fn optional_bool(body: &Map<String, Value>, key: &str) -> Result<Option<bool>> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(Error::Validation(format!("{key} must be a boolean."))),
    }
}

/// Body of `PATCH /monitor`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSettings {
    pub rate: Option<f64>,
    pub switch_cpu: Option<bool>,
    pub switch_gpu: Option<bool>,
    pub switch_hdd: Option<bool>,
    pub switch_ram: Option<bool>,
    pub switch_vram: Option<bool>,
    pub switch_transfer_speed: Option<bool>,
    pub switch_shared_gpu_memory: Option<bool>,
    pub which_hdd: Option<String>,
}

impl MonitorSettings {
    pub fn from_json(body: &Value) -> Result<Self> {
        let body = object(body)?;

        let rate = match body.get("rate") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(rate) if rate.is_finite() && rate >= 0.0 => Some(rate),
                _ => {
                    return Err(Error::Validation(
                        "Rate must be a non-negative number.".to_string(),
                    ))
                }
            },
            Some(_) => return Err(Error::Validation("Rate must be a number.".to_string())),
        };

        let which_hdd = match body.get("whichHDD") {
            None | Some(Value::Null) => None,
            Some(Value::String(path)) if !path.trim().is_empty() => Some(path.clone()),
            Some(Value::String(_)) => {
                return Err(Error::Validation("whichHDD must not be empty.".to_string()))
            }
            Some(_) => return Err(Error::Validation("whichHDD must be a string.".to_string())),
        };

        Ok(Self {
            rate,
            switch_cpu: optional_bool(body, "switchCPU")?,
            switch_gpu: optional_bool(body, "switchGPU")?,
            switch_hdd: optional_bool(body, "switchHDD")?,
            switch_ram: optional_bool(body, "switchRAM")?,
            switch_vram: optional_bool(body, "switchVRAM")?,
            switch_transfer_speed: optional_bool(body, "switchTransferSpeed")?,
            switch_shared_gpu_memory: optional_bool(body, "switchSharedGPUMemory")?,
            which_hdd,
        })
    }

    /// Applies the hardware switches. The rate is applied separately through
    /// [`apply_rate`](Self::apply_rate) once the hardware lock is released.
    pub fn apply(&self, hardware: &mut HardwareInfo) -> Result<()> {
        if let Some(path) = &self.which_hdd {
            hardware.set_which_hdd(path.as_str())?;
        }
        if let Some(enabled) = self.switch_cpu {
            hardware.set_switch_cpu(enabled);
        }
        if let Some(enabled) = self.switch_gpu {
            hardware.set_switch_gpu(enabled);
        }
        if let Some(enabled) = self.switch_hdd {
            hardware.set_switch_hdd(enabled);
        }
        if let Some(enabled) = self.switch_ram {
            hardware.set_switch_ram(enabled);
        }
        if let Some(enabled) = self.switch_vram {
            hardware.set_switch_vram(enabled);
        }
        if let Some(enabled) = self.switch_transfer_speed {
            hardware.set_switch_transfer_speed(enabled);
        }
        if let Some(enabled) = self.switch_shared_gpu_memory {
            hardware.set_switch_shared_gpu_memory(enabled);
        }
        Ok(())
    }

    pub fn apply_rate(&self, monitor: &Monitor) -> Result<()> {
        match self.rate {
            Some(rate) => monitor.set_rate(rate),
            None => Ok(()),
        }
    }
}

/// Body of `PATCH /monitor/GPU/{index}`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuSwitchSettings {
    pub utilization: Option<bool>,
    pub vram: Option<bool>,
    pub temperature: Option<bool>,
}

impl GpuSwitchSettings {
    pub fn from_json(body: &Value) -> Result<Self> {
        let body = object(body)?;
        Ok(Self {
            utilization: optional_bool(body, "utilization")?,
            vram: optional_bool(body, "vram")?,
            temperature: optional_bool(body, "temperature")?,
        })
    }

    pub fn apply(&self, index: usize, hardware: &mut HardwareInfo) -> Result<()> {
        if index >= hardware.get_gpu_info().len() {
            return Err(Error::Validation(format!("GPU index {index} is out of range.")));
        }

        let changes = [
            (MetricKind::Utilization, self.utilization),
            (MetricKind::Vram, self.vram),
            (MetricKind::Temperature, self.temperature),
        ];
        for (kind, enabled) in changes {
            if let Some(enabled) = enabled {
                hardware.set_device_switch(index, kind, enabled)?;
            }
        }
        Ok(())
    }
}

/// Body of `POST /monitor/switch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSwitch {
    pub monitor: bool,
}

impl MonitorSwitch {
    pub fn from_json(body: &Value) -> Result<Self> {
        let body = object(body)?;
        match optional_bool(body, "monitor")? {
            Some(monitor) => Ok(Self { monitor }),
            None => Err(Error::Validation("monitor must be a boolean.".to_string())),
        }
    }
}
