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

//! Shared GPU memory usage on Windows.
//!
//! Shared GPU memory is system RAM that WDDM lends to GPUs once dedicated
//! VRAM runs out. Usage comes from the `GPU Adapter Memory` performance
//! counters, read through PowerShell because no stable native API exposes it.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::common::config::{AppConfig, ProbePolicy};
use crate::device::platform_detection::is_windows;
use crate::device::types::{percent_or_sentinel, SENTINEL, SENTINEL_F64};
use crate::error::{Error, Result};
use crate::probe::cache::{ProbeCache, ProbeValue};
use crate::utils::{bytes_to_mb, run_command_with_timeout};

const POWERSHELL: &str = "powershell.exe";
const SHARED_USAGE_SCRIPT: &str = "$samples = (Get-Counter \"\\GPU Adapter Memory(*)\\Shared Usage\" \
    -ErrorAction SilentlyContinue).CounterSamples; \
    $sum = 0; foreach($s in $samples) { $sum += $s.CookedValue }; $sum";

/// Shared GPU memory figures in bytes; sentinels when unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SharedGpuMemory {
    pub used: i64,
    pub total: i64,
    pub percent: f64,
}

impl Default for SharedGpuMemory {
    fn default() -> Self {
        Self {
            used: SENTINEL,
            total: SENTINEL,
            percent: SENTINEL_F64,
        }
    }
}

impl ProbeValue for SharedGpuMemory {}

impl SharedGpuMemory {
    pub fn new(used: u64, total: u64) -> Self {
        Self {
            used: used as i64,
            total: total as i64,
            percent: percent_or_sentinel(used, total),
        }
    }
}

/// Parses the summed counter value printed by PowerShell.
pub fn parse_shared_usage(stdout: &str) -> Result<u64> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(Error::Probe("empty performance counter output".to_string()));
    }

    let value: f64 = trimmed
        .parse()
        .map_err(|e| Error::Probe(format!("unparsable counter output {trimmed:?}: {e}")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::Probe(format!("invalid counter value {value}")));
    }
    Ok(value as u64)
}

/// Sum of `Shared Usage` across all GPU adapters, in bytes.
fn query_shared_usage(timeout: Duration) -> Result<u64> {
    let output = run_command_with_timeout(
        POWERSHELL,
        &["-NoProfile", "-Command", SHARED_USAGE_SCRIPT],
        timeout,
    )
    .map_err(|e| match e.kind() {
        io::ErrorKind::TimedOut => Error::Timeout("performance counter query".to_string()),
        _ => Error::Io(e),
    })?;

    if !output.status.success() {
        return Err(Error::Probe(format!(
            "performance counter query exited with {}",
            output.status
        )));
    }
    parse_shared_usage(&String::from_utf8_lossy(&output.stdout))
}

/// Windows lets GPUs borrow up to half of system RAM.
fn total_shared_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory() / 2
}

fn probe_shared_memory() -> Result<SharedGpuMemory> {
    let timeout = Duration::from_millis(AppConfig::SHARED_MEMORY_QUERY_TIMEOUT_MS);
    let used = query_shared_usage(timeout)?;
    let total = total_shared_memory();
    tracing::debug!(
        "Shared GPU memory: {:.1} MB of {:.1} MB",
        bytes_to_mb(used),
        bytes_to_mb(total)
    );
    Ok(SharedGpuMemory::new(used, total))
}

/// Owner of the shared-GPU-memory switch and its background cache.
pub struct SharedGpuMemoryInfo {
    /// `None` on platforms without the performance counters
    cache: Option<ProbeCache<SharedGpuMemory>>,
    switch_shared_gpu_memory: bool,
}

impl SharedGpuMemoryInfo {
    pub fn new(enabled: bool) -> Self {
        if is_windows() {
            tracing::info!("Shared GPU Memory monitoring initialized (Windows)");
            Self::with_probe(probe_shared_memory, ProbePolicy::shared_memory(), enabled)
        } else {
            tracing::info!("Shared GPU Memory monitoring is only available on Windows");
            Self {
                cache: None,
                switch_shared_gpu_memory: enabled,
            }
        }
    }

    /// Uses `probe` in place of the performance-counter query.
    pub fn with_probe<F>(probe: F, policy: ProbePolicy, enabled: bool) -> Self
    where
        F: Fn() -> Result<SharedGpuMemory> + Send + Sync + 'static,
    {
        Self {
            cache: Some(ProbeCache::new(
                "shared-gpu-memory",
                SharedGpuMemory::default(),
                policy,
                probe,
            )),
            switch_shared_gpu_memory: enabled,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.cache.is_some()
    }

    /// Latest figures without waiting; sentinels when switched off or unsupported.
    pub fn get_shared_gpu_memory_info(&self) -> SharedGpuMemory {
        if !self.switch_shared_gpu_memory {
            return SharedGpuMemory::default();
        }
        match &self.cache {
            Some(cache) => cache.poll(),
            None => SharedGpuMemory::default(),
        }
    }

    pub fn switch_shared_gpu_memory(&self) -> bool {
        self.switch_shared_gpu_memory
    }

    pub fn set_switch_shared_gpu_memory(&mut self, enabled: bool) {
        self.switch_shared_gpu_memory = enabled;
    }

    pub fn reset(&self) {
        if let Some(cache) = &self.cache {
            cache.reset();
        }
    }
}
