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

//! Unified error types for the hwmon-smi library.
//!
//! Almost every failure below [`HardwareInfo`](crate::hardware::HardwareInfo)
//! is converted into a sentinel value or a disabled switch and never reaches
//! the caller. The variants here are what the internals pass around before
//! that conversion, plus [`Error::Validation`], the only kind the route layer
//! surfaces to clients.
//!
//! # Example
//!
//! ```rust,no_run
//! use hwmon_smi::{HardwareInfo, MonitorConfig, Result};
//!
//! fn main() -> Result<()> {
//!     let mut hw = HardwareInfo::new(MonitorConfig::default());
//!     hw.set_device_switch(0, hwmon_smi::MetricKind::Temperature, false)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for hwmon-smi operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The GPU backend could not be brought up.
    ///
    /// Retried with exponential backoff during initialization; once the
    /// retries are exhausted GPU telemetry degrades to unavailable.
    #[error("Platform initialization failed: {0}")]
    PlatformInit(String),

    /// The library or kernel interface a backend depends on is absent.
    ///
    /// Initialization stops immediately on this error since retrying
    /// cannot make a missing dependency appear.
    #[error("Module not installed: {0}")]
    ModuleNotInstalled(String),

    /// A single metric read against a device failed.
    #[error("Device access error: {0}")]
    DeviceAccess(String),

    /// A background probe did not produce a usable measurement.
    #[error("Probe failed: {0}")]
    Probe(String),

    /// An external command or probe exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed input handed to a setter. No state was changed.
    #[error("{0}")]
    Validation(String),

    /// Feature not supported on this platform.
    #[error("Feature not supported on this platform: {0}")]
    NotSupported(String),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true when retrying the failed operation cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::ModuleNotInstalled(_) | Error::NotSupported(_))
    }
}

/// A specialized Result type for hwmon-smi operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PlatformInit("NVML not found".to_string());
        assert_eq!(
            err.to_string(),
            "Platform initialization failed: NVML not found"
        );

        let err = Error::ModuleNotInstalled("libnvidia-ml.so".to_string());
        assert_eq!(err.to_string(), "Module not installed: libnvidia-ml.so");

        let err = Error::DeviceAccess("GPU 0 not responding".to_string());
        assert_eq!(err.to_string(), "Device access error: GPU 0 not responding");

        let err = Error::Validation("switchCPU must be a boolean.".to_string());
        assert_eq!(err.to_string(), "switchCPU must be a boolean.");

        let err = Error::NotSupported("shared GPU memory".to_string());
        assert_eq!(
            err.to_string(),
            "Feature not supported on this platform: shared GPU memory"
        );
    }

    #[test]
    fn test_terminal_errors() {
        assert!(Error::ModuleNotInstalled("jtop".into()).is_terminal());
        assert!(Error::NotSupported("x".into()).is_terminal());
        assert!(!Error::PlatformInit("busy".into()).is_terminal());
        assert!(!Error::Timeout("2s".into()).is_terminal());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
