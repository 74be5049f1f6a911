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

//! Host CPU, memory and disk readings.
//!
//! This module provides the [`HostReader`] trait and a [`LocalHostReader`]
//! implementation backed by `sysinfo`.

use std::path::Path;
use std::sync::Mutex;

use sysinfo::{Disks, System};

use crate::device::types::percent_or_sentinel;
use crate::error::{Error, Result};

/// Used and total bytes of a memory pool or filesystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub total: u64,
    pub used: u64,
    pub percent: f64,
}

impl Usage {
    pub fn new(used: u64, total: u64) -> Self {
        Self {
            total,
            used,
            percent: percent_or_sentinel(used, total),
        }
    }
}

/// Source of host metrics.
///
/// Implementations must be thread-safe (`Send + Sync`) so the aggregator can
/// be shared with the polling task.
pub trait HostReader: Send + Sync {
    /// Overall CPU utilization in percent since the previous call.
    fn cpu_utilization(&self) -> f64;

    fn memory(&self) -> Usage;

    /// Usage of the filesystem holding `path`.
    fn disk_usage(&self, path: &str) -> Result<Usage>;
}

/// Local host reader using `sysinfo`.
pub struct LocalHostReader {
    system: Mutex<System>,
}

impl LocalHostReader {
    /// Takes a first CPU sample so the next reading has a baseline.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for LocalHostReader {
    fn default() -> Self {
        Self::new()
    }
}

impl HostReader for LocalHostReader {
    fn cpu_utilization(&self) -> f64 {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_cpu_usage();
        system.global_cpu_usage() as f64
    }

    fn memory(&self) -> Usage {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_memory();
        Usage::new(system.used_memory(), system.total_memory())
    }

    fn disk_usage(&self, path: &str) -> Result<Usage> {
        let disks = Disks::new_with_refreshed_list();
        let mounts = disks
            .iter()
            .map(|disk| (disk.mount_point(), disk.total_space(), disk.available_space()));

        let (total, available) = select_mount(mounts, Path::new(path))
            .ok_or_else(|| Error::DeviceAccess(format!("no filesystem mounted at {path}")))?;
        Ok(Usage::new(total.saturating_sub(available), total))
    }
}

/// Picks the mount whose mount point is the longest prefix of `path`.
///
/// Returns `(total, available)` bytes of that mount.
pub fn select_mount<'a, I>(mounts: I, path: &Path) -> Option<(u64, u64)>
where
    I: IntoIterator<Item = (&'a Path, u64, u64)>,
{
    mounts
        .into_iter()
        .filter(|(mount_point, _, _)| path.starts_with(mount_point))
        .max_by_key(|(mount_point, _, _)| mount_point.components().count())
        .map(|(_, total, available)| (total, available))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_longest_prefix() {
        let mounts = vec![
            (Path::new("/"), 100, 40),
            (Path::new("/home"), 500, 100),
            (Path::new("/home/user/data"), 1000, 900),
        ];
        assert_eq!(
            select_mount(mounts.clone(), Path::new("/home/user")),
            Some((500, 100))
        );
        assert_eq!(
            select_mount(mounts.clone(), Path::new("/home/user/data/models")),
            Some((1000, 900))
        );
        assert_eq!(select_mount(mounts.clone(), Path::new("/var")), Some((100, 40)));
        // Component-wise: "/homework" is not under "/home"
        assert_eq!(select_mount(mounts, Path::new("/homework")), Some((100, 40)));
    }

    #[test]
    fn test_select_no_match() {
        let mounts = vec![(Path::new("/data"), 10, 5)];
        assert_eq!(select_mount(mounts, Path::new("/")), None);
    }

    #[test]
    fn test_usage_percent() {
        let usage = Usage::new(4_294_967_296, 10_737_418_240);
        assert!((usage.percent - 40.0).abs() < 1e-9);
        assert_eq!(Usage::new(0, 0).percent, -1.0);
    }

    #[test]
    fn test_local_reader_does_not_panic() {
        let reader = LocalHostReader::new();
        let cpu = reader.cpu_utilization();
        assert!((0.0..=100.0 * 1024.0).contains(&cpu));

        let memory = reader.memory();
        assert!(memory.used <= memory.total);
        let _ = reader.disk_usage("/");
    }

    #[test]
    fn test_local_reader_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LocalHostReader>();
    }
}
