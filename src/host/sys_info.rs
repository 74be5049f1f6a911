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

use std::fs;
use std::sync::OnceLock;

use regex::Regex;
use sysinfo::System;

use crate::device::platform_detection::get_os_type;

static MODEL_NAME_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

/// First `model name` entry of `/proc/cpuinfo`.
pub fn parse_cpu_brand(cpuinfo: &str) -> Option<String> {
    let regex = MODEL_NAME_REGEX
        .get_or_init(|| Regex::new(r"model name\s*:\s*(.+)").ok())
        .as_ref()?;

    cpuinfo.lines().find_map(|line| {
        regex
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

pub fn cpu_brand() -> String {
    if let Some(brand) = fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|cpuinfo| parse_cpu_brand(&cpuinfo))
    {
        return brand;
    }

    let mut system = System::new();
    system.refresh_cpu_all();
    system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// One-line host summary, e.g. `CPU: AMD Ryzen 9 7950X - Arch: x86_64 - OS: linux 6.8.0`.
pub fn system_summary() -> String {
    let arch = std::env::consts::ARCH;
    let release = System::kernel_version().unwrap_or_default();
    format!(
        "CPU: {} - Arch: {arch} - OS: {} {release}",
        cpu_brand(),
        get_os_type()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_brand() {
        let cpuinfo = "processor\t: 0\nvendor_id\t: AuthenticAMD\nmodel name\t: AMD Ryzen 9 7950X 16-Core Processor\nprocessor\t: 1\nmodel name\t: AMD Ryzen 9 7950X 16-Core Processor\n";
        assert_eq!(
            parse_cpu_brand(cpuinfo).as_deref(),
            Some("AMD Ryzen 9 7950X 16-Core Processor")
        );
    }

    #[test]
    fn test_parse_cpu_brand_missing() {
        // ARM boards often have no model name line
        assert_eq!(parse_cpu_brand("processor\t: 0\nBogoMIPS\t: 62.50\n"), None);
    }

    #[test]
    fn test_system_summary() {
        let summary = system_summary();
        assert!(summary.starts_with("CPU: "));
        assert!(summary.contains(" - Arch: "));
        assert!(summary.contains(" - OS: "));
    }
}
