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

// GPU telemetry backends, one per vendor SDK

pub mod nvidia;
pub mod nvidia_jetson;

use std::path::PathBuf;

use crate::device::traits::{BackendConnector, BackendKind, GpuBackend};
use crate::error::Result;

pub use nvidia::NvmlBackend;
pub use nvidia_jetson::JetsonBackend;

/// Connects to the real SDK for `kind`. Jetson nodes are looked up under `sysfs_root`.
pub struct NativeConnector {
    kind: BackendKind,
    sysfs_root: PathBuf,
}

impl NativeConnector {
    pub fn new(kind: BackendKind, sysfs_root: PathBuf) -> Self {
        Self { kind, sysfs_root }
    }
}

impl BackendConnector for NativeConnector {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn connect(&self) -> Result<Box<dyn GpuBackend>> {
        match self.kind {
            BackendKind::Nvml => Ok(Box::new(NvmlBackend::init()?)),
            BackendKind::Jetson => Ok(Box::new(JetsonBackend::init(&self.sysfs_root)?)),
        }
    }
}
