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

use std::time::Duration;

use clap::Parser;

use crate::common::config::{AppConfig, MonitorConfig};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The port to listen on for the API server.
    #[arg(short, long, default_value_t = AppConfig::DEFAULT_PORT)]
    pub port: u16,
    /// Seconds between snapshots. 0 starts the driver idle.
    #[arg(
        short,
        long,
        default_value_t = AppConfig::DEFAULT_RATE_SECS,
        value_parser = parse_seconds
    )]
    pub rate: f64,
    /// Path whose filesystem is reported as the disk.
    #[arg(long, default_value = AppConfig::DEFAULT_DISK_PATH)]
    pub disk: String,
    /// Disable CPU utilization.
    #[arg(long)]
    pub no_cpu: bool,
    /// Disable GPU utilization.
    #[arg(long)]
    pub no_gpu: bool,
    /// Disable disk usage.
    #[arg(long)]
    pub no_hdd: bool,
    /// Disable RAM usage.
    #[arg(long)]
    pub no_ram: bool,
    /// Disable VRAM usage.
    #[arg(long)]
    pub no_vram: bool,
    /// Measure CPU to GPU transfer speed in the background.
    #[arg(long)]
    pub transfer_speed: bool,
    /// Report shared GPU memory usage (Windows only).
    #[arg(long)]
    pub shared_gpu_memory: bool,
    /// Size of the transfer benchmark buffer in MiB.
    #[arg(long, default_value_t = AppConfig::TRANSFER_TEST_SIZE_MB)]
    pub transfer_size: usize,
    /// Seconds between transfer speed measurements.
    #[arg(
        long,
        default_value_t = AppConfig::TRANSFER_INTERVAL_MS as f64 / 1000.0,
        value_parser = parse_seconds
    )]
    pub transfer_interval: f64,
}

/// A finite, non-negative number of seconds.
fn parse_seconds(value: &str) -> Result<f64, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("`{value}` must be a finite, non-negative number of seconds"));
    }
    Ok(secs)
}

impl Cli {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new()
            .rate(self.rate)
            .cpu(!self.no_cpu)
            .gpu(!self.no_gpu)
            .hdd(!self.no_hdd)
            .ram(!self.no_ram)
            .vram(!self.no_vram)
            .transfer_speed(self.transfer_speed)
            .shared_gpu_memory(self.shared_gpu_memory)
            .disk_path(self.disk.clone())
            .transfer_test_size(self.transfer_size)
            .transfer_interval(
                Duration::try_from_secs_f64(self.transfer_interval)
                    .unwrap_or(Duration::from_millis(AppConfig::TRANSFER_INTERVAL_MS)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["hwmon-smi"]);
        assert_eq!(cli.port, 9091);
        assert_eq!(cli.rate, 1.0);

        let config = cli.monitor_config();
        assert!(config.switch_cpu);
        assert!(config.switch_vram);
        assert!(!config.switch_transfer_speed);
        assert_eq!(config.which_hdd, "/");
        assert_eq!(config.transfer_test_size_mb, 32);
        assert_eq!(config.transfer_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_flags_map_to_switches() {
        let cli = Cli::parse_from([
            "hwmon-smi",
            "--no-gpu",
            "--transfer-speed",
            "--disk",
            "/data",
            "--rate",
            "0.5",
        ]);
        let config = cli.monitor_config();
        assert!(!config.switch_gpu);
        assert!(config.switch_transfer_speed);
        assert_eq!(config.which_hdd, "/data");
        assert_eq!(config.rate_secs, 0.5);
    }

    #[test]
    fn test_seconds_must_be_finite_and_non_negative() {
        for bad in ["inf", "NaN", "-1", "soon"] {
            assert!(Cli::try_parse_from(["hwmon-smi", "--transfer-interval", bad]).is_err());
            assert!(Cli::try_parse_from(["hwmon-smi", "--rate", bad]).is_err());
        }

        let cli = Cli::try_parse_from(["hwmon-smi", "--transfer-interval", "2.5"]).unwrap();
        assert_eq!(
            cli.monitor_config().transfer_interval,
            Duration::from_millis(2500)
        );
    }
}
