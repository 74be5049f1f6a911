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

//! CPU to GPU transfer bandwidth.
//!
//! Two variants are measured: a copy from pageable host memory (reported as
//! the VRAM transfer speed) and a copy from page-locked host memory, which
//! stands in for shared GPU memory bandwidth.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::{rng, Rng};
use serde::{Deserialize, Serialize};

use crate::common::config::{AppConfig, MonitorConfig, ProbePolicy};
use crate::device::types::SENTINEL_F64;
use crate::error::{Error, Result};
use crate::probe::cache::{ProbeCache, ProbeValue};
use crate::probe::cuda_driver::CudaDriver;
use crate::utils::units::BYTES_PER_MB;

/// Accelerator able to time a synchronous host-to-device copy.
pub trait TransferBackend: Send + Sync {
    /// Copies `data` to a fresh device buffer and returns the elapsed time
    /// between two device synchronizations. `pinned` stages the data in
    /// page-locked host memory first.
    fn transfer(&self, data: &[f32], pinned: bool) -> Result<Duration>;
}

/// Latest measured speeds in MB/s; the sentinel when never measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferSpeeds {
    pub vram_speed: f64,
    pub shared_gpu_speed: f64,
}

impl Default for TransferSpeeds {
    fn default() -> Self {
        Self {
            vram_speed: SENTINEL_F64,
            shared_gpu_speed: SENTINEL_F64,
        }
    }
}

impl ProbeValue for TransferSpeeds {
    /// A variant that failed comes back as the sentinel and keeps its previous value.
    fn merge(&mut self, fresh: Self) {
        if fresh.vram_speed >= 0.0 {
            self.vram_speed = fresh.vram_speed;
        }
        if fresh.shared_gpu_speed >= 0.0 {
            self.shared_gpu_speed = fresh.shared_gpu_speed;
        }
    }
}

/// Configuration reported by `GET /monitor/TransferSpeed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSpeedConfig {
    pub cuda_available: bool,
    pub test_size_mb: usize,
    /// Seconds
    pub measurement_interval: f64,
    pub switch_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferVariant {
    Vram,
    Pinned,
}

impl TransferVariant {
    fn label(self) -> &'static str {
        match self {
            TransferVariant::Vram => "VRAM",
            TransferVariant::Pinned => "shared GPU memory",
        }
    }
}

/// `size_mb / seconds`, or 0 when no time elapsed.
pub fn speed_mb_per_sec(size_mb: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        size_mb as f64 / secs
    } else {
        0.0
    }
}

/// One benchmark run over both variants.
pub struct TransferBenchmark {
    backend: Arc<dyn TransferBackend>,
    test_size_mb: usize,
    max_attempts: u32,
    retry_pause: Duration,
}

impl TransferBenchmark {
    pub fn new(backend: Arc<dyn TransferBackend>, test_size_mb: usize) -> Self {
        Self {
            backend,
            test_size_mb,
            max_attempts: AppConfig::TRANSFER_MAX_ATTEMPTS,
            retry_pause: Duration::from_millis(AppConfig::TRANSFER_RETRY_PAUSE_MS),
        }
    }

    fn random_buffer(&self) -> Vec<f32> {
        let elements = self.test_size_mb * BYTES_PER_MB as usize / std::mem::size_of::<f32>();
        let mut rng = rng();
        (0..elements).map(|_| rng.random::<f32>()).collect()
    }

    fn measure_once(&self, variant: TransferVariant) -> Result<f64> {
        let data = self.random_buffer();
        let elapsed = self
            .backend
            .transfer(&data, variant == TransferVariant::Pinned)?;
        let speed = speed_mb_per_sec(self.test_size_mb, elapsed);
        if speed > 0.0 {
            Ok(speed)
        } else {
            Err(Error::Probe(format!(
                "{} transfer reported a non-positive speed",
                variant.label()
            )))
        }
    }

    /// Measures one variant, retrying once after a short pause.
    pub fn measure(&self, variant: TransferVariant) -> Result<f64> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.measure_once(variant) {
                Ok(speed) => return Ok(speed),
                Err(e) if attempt >= attempts => {
                    tracing::error!("Error measuring {} transfer speed: {e}", variant.label());
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(
                        "{} transfer attempt {attempt}/{attempts} failed: {e}",
                        variant.label()
                    );
                    attempt += 1;
                    thread::sleep(self.retry_pause);
                }
            }
        }
    }

    /// Both variants. Succeeds when at least one variant produced a speed.
    pub fn run(&self) -> Result<TransferSpeeds> {
        let vram = self.measure(TransferVariant::Vram);
        let pinned = self.measure(TransferVariant::Pinned);

        match (vram, pinned) {
            (Err(vram), Err(pinned)) => Err(Error::Probe(format!(
                "both transfer measurements failed: {vram}; {pinned}"
            ))),
            (vram, pinned) => Ok(TransferSpeeds {
                vram_speed: vram.unwrap_or(SENTINEL_F64),
                shared_gpu_speed: pinned.unwrap_or(SENTINEL_F64),
            }),
        }
    }
}

/// Owner of the transfer-speed switch and its background cache.
pub struct TransferSpeedInfo {
    /// `None` when no CUDA device is usable
    cache: Option<ProbeCache<TransferSpeeds>>,
    test_size_mb: usize,
    measurement_interval: Duration,
    switch_transfer_speed: bool,
}

impl TransferSpeedInfo {
    /// Binds the CUDA driver if present.
    pub fn new(config: &MonitorConfig) -> Self {
        let backend: Option<Arc<dyn TransferBackend>> = match CudaDriver::load() {
            Ok(driver) => {
                tracing::info!(
                    "Transfer speed measurement initialized. CUDA device: {}",
                    driver.device_name()
                );
                Some(Arc::new(driver))
            }
            Err(e) => {
                tracing::warn!(
                    "CUDA is not available. Transfer speed measurement will return -1. ({e})"
                );
                None
            }
        };
        Self::with_backend(
            backend,
            config.transfer_test_size_mb,
            config.transfer_interval,
            config.switch_transfer_speed,
        )
    }

    pub fn with_backend(
        backend: Option<Arc<dyn TransferBackend>>,
        test_size_mb: usize,
        measurement_interval: Duration,
        enabled: bool,
    ) -> Self {
        let cache = backend.map(|backend| {
            let benchmark = TransferBenchmark::new(backend, test_size_mb);
            ProbeCache::new(
                "transfer-speed",
                TransferSpeeds::default(),
                ProbePolicy::transfer_speed(measurement_interval),
                move || benchmark.run(),
            )
        });

        Self {
            cache,
            test_size_mb,
            measurement_interval,
            switch_transfer_speed: enabled,
        }
    }

    pub fn cuda_available(&self) -> bool {
        self.cache.is_some()
    }

    /// Latest speeds without waiting; sentinels when switched off or without CUDA.
    pub fn get_speeds(&self) -> TransferSpeeds {
        if !self.switch_transfer_speed {
            return TransferSpeeds::default();
        }
        match &self.cache {
            Some(cache) => cache.poll(),
            None => TransferSpeeds::default(),
        }
    }

    pub fn get_info(&self) -> TransferSpeedConfig {
        TransferSpeedConfig {
            cuda_available: self.cuda_available(),
            test_size_mb: self.test_size_mb,
            measurement_interval: self.measurement_interval.as_secs_f64(),
            switch_enabled: self.switch_transfer_speed,
        }
    }

    pub fn switch_transfer_speed(&self) -> bool {
        self.switch_transfer_speed
    }

    pub fn set_switch_transfer_speed(&mut self, enabled: bool) {
        self.switch_transfer_speed = enabled;
    }

    /// Forgets cached speeds and breaker state.
    pub fn reset(&self) {
        if let Some(cache) = &self.cache {
            cache.reset();
        }
    }
}
