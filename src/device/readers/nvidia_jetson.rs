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

use std::fs;
use std::path::{Path, PathBuf};

use crate::device::traits::{BackendKind, GpuBackend};
use crate::device::types::{DeviceHandle, GpuMemory};
use crate::error::{Error, Result};
use crate::utils::units::{millicelsius_to_celsius, BYTES_PER_KB};

/// GPU load nodes across Jetson generations (TX/Nano, Xavier, Orin), relative to the root.
const LOAD_NODES: &[&str] = &[
    "sys/devices/platform/tegra-soc/gpu.0/load",
    "sys/devices/gpu.0/load",
    "sys/devices/platform/gpu.0/load",
    "sys/devices/platform/17000000.ga10b/load",
    "sys/devices/platform/17000000.gv11b/load",
];

const THERMAL_DIR: &str = "sys/devices/virtual/thermal";
const MODEL_NODE: &str = "proc/device-tree/model";
const MEMINFO: &str = "proc/meminfo";

/// NVIDIA Jetson integrated GPU read from sysfs and procfs.
///
/// The SoC has exactly one GPU which shares system RAM, so "VRAM" is the
/// unified memory pool.
pub struct JetsonBackend {
    root: PathBuf,
    load_node: PathBuf,
    thermal_node: Option<PathBuf>,
    closed: bool,
}

impl JetsonBackend {
    /// Locates the sysfs nodes under `root` (normally `/`).
    pub fn init(root: &Path) -> Result<Self> {
        let load_node = LOAD_NODES
            .iter()
            .map(|node| root.join(node))
            .find(|path| path.exists())
            .ok_or_else(|| {
                Error::ModuleNotInstalled("no Jetson GPU load node in sysfs".to_string())
            })?;

        // The node exists but may still be unreadable while the driver settles
        fs::read_to_string(&load_node).map_err(|e| {
            Error::PlatformInit(format!("cannot read {}: {e}", load_node.display()))
        })?;

        let thermal_node = find_gpu_thermal_zone(&root.join(THERMAL_DIR));
        tracing::info!(
            "Jetson GPU backend initialized (load: {}, thermal: {:?})",
            load_node.display(),
            thermal_node
        );

        Ok(Self {
            root: root.to_path_buf(),
            load_node,
            thermal_node,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::DeviceAccess("Jetson backend is closed".to_string()));
        }
        Ok(())
    }
}

/// Prefers the zone whose type names the GPU and falls back to zone 0.
fn find_gpu_thermal_zone(thermal_dir: &Path) -> Option<PathBuf> {
    let mut zones: Vec<PathBuf> = fs::read_dir(thermal_dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("thermal_zone"))
        })
        .collect();
    zones.sort();

    let gpu_zone = zones.iter().find(|zone| {
        fs::read_to_string(zone.join("type"))
            .map(|t| t.trim().to_lowercase().starts_with("gpu"))
            .unwrap_or(false)
    });

    gpu_zone
        .or_else(|| zones.first())
        .map(|zone| zone.join("temp"))
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Parses `MemTotal` and `MemAvailable` (kB) into used/total bytes.
pub fn parse_meminfo(meminfo: &str) -> Option<GpuMemory> {
    let mut total = None;
    let mut available = None;

    for line in meminfo.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<u64>().ok()),
            Some("MemAvailable:") => {
                available = parts.next().and_then(|v| v.parse::<u64>().ok())
            }
            _ => {}
        }
    }

    let total = total? * BYTES_PER_KB;
    let available = available? * BYTES_PER_KB;
    Some(GpuMemory {
        used: total.saturating_sub(available),
        total,
    })
}

impl GpuBackend for JetsonBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Jetson
    }

    fn device_count(&self) -> Result<u32> {
        self.ensure_open()?;
        Ok(1)
    }

    fn device_name(&self, _handle: DeviceHandle) -> String {
        read_trimmed(&self.root.join(MODEL_NODE))
            .map(|model| model.trim_end_matches('\0').to_string())
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| "NVIDIA Jetson".to_string())
    }

    fn utilization(&self, _handle: DeviceHandle) -> Result<Option<u32>> {
        self.ensure_open()?;
        // The load node reports per-mille
        Ok(read_trimmed(&self.load_node)
            .and_then(|load| load.parse::<u32>().ok())
            .map(|per_mille| (per_mille / 10).min(100)))
    }

    fn memory_info(&self, _handle: DeviceHandle) -> Result<GpuMemory> {
        self.ensure_open()?;
        let meminfo = fs::read_to_string(self.root.join(MEMINFO))?;
        parse_meminfo(&meminfo)
            .ok_or_else(|| Error::DeviceAccess("malformed /proc/meminfo".to_string()))
    }

    fn temperature(&self, _handle: DeviceHandle) -> Result<Option<u32>> {
        self.ensure_open()?;
        Ok(self
            .thermal_node
            .as_deref()
            .and_then(read_trimmed)
            .and_then(|t| t.parse::<u32>().ok())
            .map(millicelsius_to_celsius))
    }

    fn driver_version(&self) -> String {
        // L4T release line, e.g. "# R35 (release), REVISION: 4.1, ..."
        read_trimmed(&self.root.join("etc/nv_tegra_release"))
            .and_then(|release| {
                release
                    .split_whitespace()
                    .nth(1)
                    .map(|version| format!("NVIDIA Driver: L4T {version}"))
            })
            .unwrap_or_else(|| "NVIDIA Driver: unknown".to_string())
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            tracing::debug!("Jetson backend closed.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_jetson() -> TempDir {
        let root = TempDir::new().unwrap();
        let base = root.path();
        fs::create_dir_all(base.join("sys/devices/gpu.0")).unwrap();
        fs::write(base.join("sys/devices/gpu.0/load"), "537\n").unwrap();

        for (zone, kind, temp) in [
            ("thermal_zone0", "CPU-therm", "48000"),
            ("thermal_zone1", "GPU-therm", "55500"),
        ] {
            let dir = base.join(THERMAL_DIR).join(zone);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("type"), format!("{kind}\n")).unwrap();
            fs::write(dir.join("temp"), format!("{temp}\n")).unwrap();
        }

        fs::create_dir_all(base.join("proc/device-tree")).unwrap();
        fs::write(
            base.join(MODEL_NODE),
            "NVIDIA Jetson Xavier NX Developer Kit\0",
        )
        .unwrap();
        fs::write(
            base.join(MEMINFO),
            "MemTotal:        8388608 kB\nMemFree:         1000000 kB\nMemAvailable:    4194304 kB\n",
        )
        .unwrap();
        fs::create_dir_all(base.join("etc")).unwrap();
        fs::write(
            base.join("etc/nv_tegra_release"),
            "# R35 (release), REVISION: 4.1, GCID: 33958178\n",
        )
        .unwrap();
        root
    }

    #[test]
    fn test_missing_load_node_is_not_installed() {
        let root = TempDir::new().unwrap();
        let err = JetsonBackend::init(root.path()).err().unwrap();
        assert!(err.is_terminal());
    }

    #[test]
    fn test_reads_fake_tree() {
        let root = fake_jetson();
        let backend = JetsonBackend::init(root.path()).unwrap();
        let handle = backend.device_handle(0).unwrap();

        assert_eq!(backend.device_count().unwrap(), 1);
        assert!(backend.device_handle(1).is_none());
        assert_eq!(
            backend.device_name(handle),
            "NVIDIA Jetson Xavier NX Developer Kit"
        );
        assert_eq!(backend.utilization(handle).unwrap(), Some(53));
        assert_eq!(backend.temperature(handle).unwrap(), Some(55));
        assert_eq!(backend.driver_version(), "NVIDIA Driver: L4T R35");

        let memory = backend.memory_info(handle).unwrap();
        assert_eq!(memory.total, 8_589_934_592);
        assert_eq!(memory.used, 4_294_967_296);
        assert!((memory.used_percent() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_unreadable_load_is_soft_sentinel() {
        let root = fake_jetson();
        let backend = JetsonBackend::init(root.path()).unwrap();
        fs::write(root.path().join("sys/devices/gpu.0/load"), "garbage").unwrap();
        let handle = backend.device_handle(0).unwrap();
        assert_eq!(backend.utilization(handle).unwrap(), None);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let root = fake_jetson();
        let mut backend = JetsonBackend::init(root.path()).unwrap();
        backend.shutdown();
        backend.shutdown();
        assert!(backend.device_count().is_err());
        assert!(backend.device_handle(0).is_none());
    }

    #[test]
    fn test_parse_meminfo_missing_fields() {
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_none());
        assert!(parse_meminfo("").is_none());
    }
}
