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

use std::path::PathBuf;
use std::time::Duration;

/// Application configuration constants
pub struct AppConfig;

impl AppConfig {
    // GPU backend initialization
    pub const GPU_INIT_MAX_ATTEMPTS: u32 = 3;
    pub const GPU_INIT_INITIAL_DELAY_MS: u64 = 1000;
    pub const GPU_INIT_BACKOFF_MULTIPLIER: u32 = 2;

    // Shared GPU memory probe (Windows only)
    pub const SHARED_MEMORY_INTERVAL_MS: u64 = 2000;
    pub const SHARED_MEMORY_MAX_FAILURES: u32 = 3;
    pub const SHARED_MEMORY_COOLDOWN_SECS: u64 = 60;
    pub const SHARED_MEMORY_QUERY_TIMEOUT_MS: u64 = 2000;

    // Transfer speed benchmark
    pub const TRANSFER_TEST_SIZE_MB: usize = 32;
    pub const TRANSFER_INTERVAL_MS: u64 = 5000;
    pub const TRANSFER_MAX_FAILURES: u32 = 2;
    pub const TRANSFER_COOLDOWN_SECS: u64 = 30;
    pub const TRANSFER_MAX_ATTEMPTS: u32 = 2;
    pub const TRANSFER_RETRY_PAUSE_MS: u64 = 100;

    // Polling driver
    pub const DEFAULT_RATE_SECS: f64 = 1.0;
    pub const DEFAULT_PORT: u16 = 9091;
    pub const DEFAULT_DISK_PATH: &'static str = "/";
}

/// Retry schedule for backend initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: AppConfig::GPU_INIT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(AppConfig::GPU_INIT_INITIAL_DELAY_MS),
            multiplier: AppConfig::GPU_INIT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given zero-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay * self.multiplier.saturating_pow(attempt)
    }

    /// Delays between consecutive attempts, in order.
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_after(attempt))
            .collect()
    }
}

/// Scheduling and circuit-breaking parameters of one background probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbePolicy {
    /// Minimum time between the end of one probe and the start of the next
    pub min_interval: Duration,
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long dispatching stays suppressed once the breaker opens
    pub cooldown: Duration,
}

impl ProbePolicy {
    pub fn shared_memory() -> Self {
        Self {
            min_interval: Duration::from_millis(AppConfig::SHARED_MEMORY_INTERVAL_MS),
            failure_threshold: AppConfig::SHARED_MEMORY_MAX_FAILURES,
            cooldown: Duration::from_secs(AppConfig::SHARED_MEMORY_COOLDOWN_SECS),
        }
    }

    pub fn transfer_speed(interval: Duration) -> Self {
        Self {
            min_interval: interval,
            failure_threshold: AppConfig::TRANSFER_MAX_FAILURES,
            cooldown: Duration::from_secs(AppConfig::TRANSFER_COOLDOWN_SECS),
        }
    }
}

/// Configuration options for [`HardwareInfo`](crate::hardware::HardwareInfo)
/// and the polling [`Monitor`](crate::monitor::Monitor).
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Seconds between snapshots. 0 keeps the driver idle.
    pub rate_secs: f64,
    pub switch_cpu: bool,
    pub switch_gpu: bool,
    pub switch_hdd: bool,
    pub switch_ram: bool,
    pub switch_vram: bool,
    pub switch_transfer_speed: bool,
    pub switch_shared_gpu_memory: bool,
    /// Path whose filesystem is reported as "the disk"
    pub which_hdd: String,
    pub transfer_test_size_mb: usize,
    pub transfer_interval: Duration,
    pub gpu_retry: RetryPolicy,
    /// Filesystem root used when probing Jetson sysfs nodes
    pub sysfs_root: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rate_secs: AppConfig::DEFAULT_RATE_SECS,
            switch_cpu: true,
            switch_gpu: true,
            switch_hdd: true,
            switch_ram: true,
            switch_vram: true,
            switch_transfer_speed: false,
            switch_shared_gpu_memory: false,
            which_hdd: AppConfig::DEFAULT_DISK_PATH.to_string(),
            transfer_test_size_mb: AppConfig::TRANSFER_TEST_SIZE_MB,
            transfer_interval: Duration::from_millis(AppConfig::TRANSFER_INTERVAL_MS),
            gpu_retry: RetryPolicy::default(),
            sysfs_root: PathBuf::from("/"),
        }
    }
}

impl MonitorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate(mut self, rate_secs: f64) -> Self {
        self.rate_secs = rate_secs;
        self
    }

    pub fn cpu(mut self, enabled: bool) -> Self {
        self.switch_cpu = enabled;
        self
    }

    pub fn gpu(mut self, enabled: bool) -> Self {
        self.switch_gpu = enabled;
        self
    }

    pub fn hdd(mut self, enabled: bool) -> Self {
        self.switch_hdd = enabled;
        self
    }

    pub fn ram(mut self, enabled: bool) -> Self {
        self.switch_ram = enabled;
        self
    }

    pub fn vram(mut self, enabled: bool) -> Self {
        self.switch_vram = enabled;
        self
    }

    pub fn transfer_speed(mut self, enabled: bool) -> Self {
        self.switch_transfer_speed = enabled;
        self
    }

    pub fn shared_gpu_memory(mut self, enabled: bool) -> Self {
        self.switch_shared_gpu_memory = enabled;
        self
    }

    pub fn disk_path(mut self, path: impl Into<String>) -> Self {
        self.which_hdd = path.into();
        self
    }

    pub fn transfer_test_size(mut self, size_mb: usize) -> Self {
        self.transfer_test_size_mb = size_mb;
        self
    }

    pub fn transfer_interval(mut self, interval: Duration) -> Self {
        self.transfer_interval = interval;
        self
    }

    pub fn gpu_retry(mut self, policy: RetryPolicy) -> Self {
        self.gpu_retry = policy;
        self
    }

    pub fn sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }
}
