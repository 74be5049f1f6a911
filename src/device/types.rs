use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer sentinel for a metric that is unavailable, disabled or not yet measured
pub const SENTINEL: i64 = -1;
/// Floating point counterpart of [`SENTINEL`]
pub const SENTINEL_F64: f64 = -1.0;

/// A GPU discovered during backend initialization.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Device {
    pub index: u32,
    pub name: String,
}

/// Opaque reference to a device inside the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub(crate) u32);

impl DeviceHandle {
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// Memory figures reported by a backend, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuMemory {
    pub used: u64,
    pub total: u64,
}

impl GpuMemory {
    /// `used / total * 100`, or the sentinel when total is zero.
    pub fn used_percent(&self) -> f64 {
        percent_or_sentinel(self.used, self.total)
    }
}

/// Share of `used` in `total` as a percentage; sentinel when `total` is zero.
pub fn percent_or_sentinel(used: u64, total: u64) -> f64 {
    if total > 0 {
        used as f64 / total as f64 * 100.0
    } else {
        SENTINEL_F64
    }
}

/// The per-device metric kinds that can be switched off or auto-disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Utilization,
    Vram,
    Temperature,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::Utilization,
        MetricKind::Vram,
        MetricKind::Temperature,
    ];
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Utilization => write!(f, "utilization"),
            MetricKind::Vram => write!(f, "vram"),
            MetricKind::Temperature => write!(f, "temperature"),
        }
    }
}

/// One boolean per [`MetricKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricFlags {
    pub utilization: bool,
    pub vram: bool,
    pub temperature: bool,
}

impl Default for MetricFlags {
    fn default() -> Self {
        Self::all(true)
    }
}

impl MetricFlags {
    pub fn all(value: bool) -> Self {
        Self {
            utilization: value,
            vram: value,
            temperature: value,
        }
    }

    pub fn get(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Utilization => self.utilization,
            MetricKind::Vram => self.vram,
            MetricKind::Temperature => self.temperature,
        }
    }

    pub fn set(&mut self, kind: MetricKind, value: bool) {
        match kind {
            MetricKind::Utilization => self.utilization = value,
            MetricKind::Vram => self.vram = value,
            MetricKind::Temperature => self.temperature = value,
        }
    }
}

/// Metrics of a single GPU within a snapshot. Every field falls back to the sentinel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GpuDeviceStatus {
    pub gpu_utilization: i64,
    pub gpu_temperature: i64,
    pub vram_total: i64,
    pub vram_used: i64,
    pub vram_used_percent: f64,
}

impl Default for GpuDeviceStatus {
    fn default() -> Self {
        Self {
            gpu_utilization: SENTINEL,
            gpu_temperature: SENTINEL,
            vram_total: SENTINEL,
            vram_used: SENTINEL,
            vram_used_percent: SENTINEL_F64,
        }
    }
}

/// Output of [`GpuMonitor::get_status`](crate::device::gpu_monitor::GpuMonitor::get_status).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GpuStatus {
    pub device_type: String,
    pub gpus: Vec<GpuDeviceStatus>,
}
