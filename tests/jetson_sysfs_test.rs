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

//! The Jetson backend driven end to end against a fake sysfs tree.

use std::fs;
use std::path::Path;
use std::time::Duration;

use hwmon_smi::device::platform_detection::is_jetson_at;
use hwmon_smi::device::readers::NativeConnector;
use hwmon_smi::prelude::*;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn fake_orin() -> TempDir {
    let root = TempDir::new().unwrap();
    let base = root.path();
    write(base, "proc/device-tree/compatible", "nvidia,p3737-0000\0nvidia,tegra234\0");
    write(base, "proc/device-tree/model", "NVIDIA Jetson AGX Orin Developer Kit\0");
    write(base, "sys/devices/gpu.0/load", "250\n");
    write(base, "sys/devices/virtual/thermal/thermal_zone0/type", "cpu-thermal\n");
    write(base, "sys/devices/virtual/thermal/thermal_zone0/temp", "45000\n");
    write(base, "sys/devices/virtual/thermal/thermal_zone1/type", "gpu-thermal\n");
    write(base, "sys/devices/virtual/thermal/thermal_zone1/temp", "47250\n");
    write(
        base,
        "proc/meminfo",
        "MemTotal:       32000000 kB\nMemFree:         2000000 kB\nMemAvailable:   24000000 kB\n",
    );
    root
}

fn jetson_monitor(root: &Path) -> GpuMonitor {
    let connector = NativeConnector::new(BackendKind::Jetson, root.to_path_buf());
    GpuMonitor::new(
        Box::new(connector),
        RetryPolicy {
            max_attempts: 1,
            initial_delay: Duration::from_millis(1),
            multiplier: 2,
        },
    )
}

#[test]
fn test_detects_tegra_board() {
    let root = fake_orin();
    assert!(is_jetson_at(root.path()));

    let empty = TempDir::new().unwrap();
    assert!(!is_jetson_at(empty.path()));
}

#[test]
fn test_status_from_fake_tree() {
    let root = fake_orin();
    let mut monitor = jetson_monitor(root.path());
    assert_eq!(monitor.initialize(), GpuMonitorState::Operational);

    let devices = monitor.get_info();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "NVIDIA Jetson AGX Orin Developer Kit");

    let status = monitor.get_status();
    assert_eq!(status.device_type, "cuda");
    let gpu = &status.gpus[0];
    assert_eq!(gpu.gpu_utilization, 25);
    assert_eq!(gpu.gpu_temperature, 47);
    assert_eq!(gpu.vram_total, 32_000_000 * 1024);
    assert_eq!(gpu.vram_used, 8_000_000 * 1024);
    assert!((gpu.vram_used_percent - 25.0).abs() < 1e-9);
}

#[test]
fn test_load_node_changes_are_picked_up() {
    let root = fake_orin();
    let mut monitor = jetson_monitor(root.path());
    monitor.initialize();

    write(root.path(), "sys/devices/gpu.0/load", "1000\n");
    assert_eq!(monitor.get_status().gpus[0].gpu_utilization, 100);
}

#[test]
fn test_without_gpu_node_is_unavailable() {
    let root = TempDir::new().unwrap();
    let mut monitor = jetson_monitor(root.path());
    assert_eq!(monitor.initialize(), GpuMonitorState::Unavailable);
    assert_eq!(monitor.get_status().device_type, "cpu");
}
