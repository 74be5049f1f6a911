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

//! GPU aggregator scenarios through the public API.

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{retry_policy, scripted_monitor, GpuScript};
use hwmon_smi::prelude::*;

#[test]
fn test_backoff_then_success() {
    let script = GpuScript::default();
    script.connect_failures.store(2, Ordering::SeqCst);
    let mut monitor = scripted_monitor(&["A100"], &script, retry_policy(20));

    let started = Instant::now();
    assert_eq!(monitor.initialize(), GpuMonitorState::Operational);

    // 20ms + 40ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(script.connects.load(Ordering::SeqCst), 3);
    assert_eq!(monitor.get_status().device_type, "cuda");
}

#[test]
fn test_exhausted_retries_degrade_to_cpu() {
    let script = GpuScript::default();
    script.connect_failures.store(10, Ordering::SeqCst);
    let mut monitor = scripted_monitor(&["A100"], &script, retry_policy(1));

    assert_eq!(monitor.initialize(), GpuMonitorState::Unavailable);
    assert_eq!(script.connects.load(Ordering::SeqCst), 3);

    let status = monitor.get_status();
    assert_eq!(status.device_type, "cpu");
    assert_eq!(status.gpus, vec![GpuDeviceStatus::default()]);
    assert!(monitor.get_info().is_empty());
}

#[test]
fn test_missing_library_skips_retries() {
    let script = GpuScript::default();
    script.not_installed.store(true, Ordering::SeqCst);
    let mut monitor = scripted_monitor(&["A100"], &script, retry_policy(500));

    let started = Instant::now();
    assert_eq!(monitor.initialize(), GpuMonitorState::Unavailable);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(script.connects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_temperature_failure_latches_for_all_devices() {
    let script = GpuScript::default();
    let mut monitor = scripted_monitor(&["RTX 4090", "RTX 4080"], &script, retry_policy(1));
    monitor.initialize();

    let status = monitor.get_status();
    assert_eq!(status.gpus[0].gpu_temperature, 65);
    assert_eq!(status.gpus[1].gpu_temperature, 65);

    script.fail_temperature.store(true, Ordering::SeqCst);
    let reads_before = script.temperature_reads.load(Ordering::SeqCst);
    let status = monitor.get_status();
    assert_eq!(status.gpus[0].gpu_temperature, -1);
    assert_eq!(status.gpus[1].gpu_temperature, -1);
    // Other metrics keep working
    assert_eq!(status.gpus[1].gpu_utilization, 51);
    assert!((status.gpus[0].vram_used_percent - 25.0).abs() < 1e-9);
    // The first failure disables the kind before the second device is read
    assert_eq!(script.temperature_reads.load(Ordering::SeqCst), reads_before + 1);

    // The latch holds even after the sensor recovers
    script.fail_temperature.store(false, Ordering::SeqCst);
    monitor.get_status();
    monitor.get_status();
    assert_eq!(script.temperature_reads.load(Ordering::SeqCst), reads_before + 1);
    assert!(!monitor.auto_enabled().temperature);

    assert!(monitor.reinitialize());
    assert!(monitor.auto_enabled().temperature);
    assert_eq!(monitor.get_status().gpus[0].gpu_temperature, 65);
}

#[test]
fn test_reinitialize_rebuilds_devices_and_switches() {
    let script = GpuScript::default();
    let mut monitor = scripted_monitor(&["L4", "L4"], &script, retry_policy(1));
    monitor.initialize();
    monitor
        .set_device_switch(1, MetricKind::Utilization, false)
        .unwrap();
    assert_eq!(monitor.get_status().gpus[1].gpu_utilization, -1);

    assert!(monitor.reinitialize());
    assert_eq!(script.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.device_count(), 2);
    assert_eq!(monitor.device_switches(1), Some(MetricFlags::default()));
    assert_eq!(monitor.get_status().gpus[1].gpu_utilization, 51);
}

#[test]
fn test_close_shuts_backend_down_once() {
    let script = GpuScript::default();
    let mut monitor = scripted_monitor(&["H100"], &script, retry_policy(1));
    monitor.initialize();

    monitor.close();
    monitor.close();
    drop(monitor);
    assert_eq!(script.shutdowns.load(Ordering::SeqCst), 1);
}
