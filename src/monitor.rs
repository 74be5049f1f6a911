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

//! The polling driver.
//!
//! [`Monitor`] calls [`HardwareInfo::get_status`] at a fixed rate on a Tokio
//! task and keeps the most recent snapshot for readers. Hardware reads run on
//! the blocking pool so a slow sensor never stalls the runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::hardware::{HardwareInfo, StatusSnapshot};

pub type SharedHardware = Arc<Mutex<HardwareInfo>>;

pub struct Monitor {
    hardware: SharedHardware,
    /// `f64` seconds stored as bits; 0 means idle
    rate: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
    latest: Arc<RwLock<Option<StatusSnapshot>>>,
    /// Bumped whenever settings change; a cycle that straddles a bump is not stored
    epoch: Arc<AtomicU64>,
}

fn validate_rate(rate_secs: f64) -> Result<()> {
    if !rate_secs.is_finite() || rate_secs < 0.0 {
        return Err(Error::Validation(
            "Rate must be a non-negative number.".to_string(),
        ));
    }
    Ok(())
}

fn collect(hardware: &SharedHardware) -> StatusSnapshot {
    hardware
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get_status()
}

impl Monitor {
    /// Creates an idle driver. Call [`start`](Self::start) or set a positive rate to begin.
    pub fn new(hardware: SharedHardware, rate_secs: f64) -> Result<Self> {
        validate_rate(rate_secs)?;
        Ok(Self {
            hardware,
            rate: Arc::new(AtomicU64::new(rate_secs.to_bits())),
            task: Mutex::new(None),
            latest: Arc::new(RwLock::new(None)),
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn hardware(&self) -> SharedHardware {
        self.hardware.clone()
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::SeqCst))
    }

    /// Changes the sampling interval in seconds.
    ///
    /// A transition from 0 to a positive rate starts polling; a rate of 0
    /// lets the running task finish after its current cycle.
    pub fn set_rate(&self, rate_secs: f64) -> Result<()> {
        validate_rate(rate_secs)?;
        let previous = f64::from_bits(self.rate.swap(rate_secs.to_bits(), Ordering::SeqCst));
        tracing::info!("Sampling rate set to {rate_secs}s");

        if previous == 0.0 && rate_secs > 0.0 {
            self.start()?;
        }
        Ok(())
    }

    /// Spawns the polling task on the current Tokio runtime.
    ///
    /// No-op when already running.
    pub fn start(&self) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        if self.rate() <= 0.0 {
            return Err(Error::Validation(
                "Rate must be positive to start monitoring.".to_string(),
            ));
        }

        let runtime = Handle::try_current()
            .map_err(|e| Error::NotSupported(format!("polling requires a Tokio runtime: {e}")))?;

        let hardware = self.hardware.clone();
        let rate = self.rate.clone();
        let latest = self.latest.clone();
        let epoch = self.epoch.clone();
        *task = Some(runtime.spawn(poll_loop(hardware, rate, latest, epoch)));
        tracing::info!("Monitoring started");
        Ok(())
    }

    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = task {
            handle.abort();
            tracing::info!("Monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// The snapshot taken by the most recent polling cycle.
    pub async fn latest(&self) -> Option<StatusSnapshot> {
        self.latest.read().await.clone()
    }

    /// Takes a snapshot right now and records it as the latest one.
    pub async fn snapshot_now(&self) -> Result<StatusSnapshot> {
        let snapshot = self.with_hardware(|hw| hw.get_status()).await?;
        *self.latest.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Forgets the latest snapshot after a settings change.
    pub async fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.latest.write().await = None;
    }

    /// Runs `f` against the hardware on the blocking pool.
    ///
    /// The hardware lock can be held for seconds by a reinitialization, so it
    /// is never taken on a runtime worker.
    pub async fn with_hardware<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut HardwareInfo) -> R + Send + 'static,
        R: Send + 'static,
    {
        let hardware = self.hardware.clone();
        tokio::task::spawn_blocking(move || {
            let mut hw = hardware.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut hw)
        })
        .await
        .map_err(|e| Error::DeviceAccess(format!("hardware task failed: {e}")))
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    hardware: SharedHardware,
    rate: Arc<AtomicU64>,
    latest: Arc<RwLock<Option<StatusSnapshot>>>,
    epoch: Arc<AtomicU64>,
) {
    loop {
        let rate_secs = f64::from_bits(rate.load(Ordering::SeqCst));
        if rate_secs <= 0.0 {
            tracing::info!("Sampling rate is 0, monitoring paused");
            break;
        }

        let started = epoch.load(Ordering::SeqCst);
        let hw = hardware.clone();
        match tokio::task::spawn_blocking(move || collect(&hw)).await {
            Ok(snapshot) => {
                let mut latest = latest.write().await;
                if epoch.load(Ordering::SeqCst) == started {
                    *latest = Some(snapshot);
                }
            }
            Err(e) => tracing::error!("Status collection failed: {e}"),
        }

        tokio::time::sleep(Duration::from_secs_f64(rate_secs)).await;
    }
}
