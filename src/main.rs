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

use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hwmon_smi::api::run_server;
use hwmon_smi::cli::Cli;
use hwmon_smi::{HardwareInfo, Monitor, ShutdownHooks};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hwmon_smi=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.monitor_config();
    let rate = config.rate_secs;

    // GPU initialization may retry for a few seconds
    let hardware = tokio::task::spawn_blocking(move || HardwareInfo::new(config))
        .await
        .context("hardware initialization panicked")?;
    let hardware = Arc::new(Mutex::new(hardware));

    let hooks = Arc::new(ShutdownHooks::new());
    HardwareInfo::register_shutdown(&hardware, &hooks);

    let monitor = Arc::new(Monitor::new(hardware, rate).context("invalid sampling rate")?);
    if rate > 0.0 {
        monitor.start().context("failed to start monitoring")?;
    }

    let stopping = monitor.clone();
    hooks.register("monitor", move || stopping.stop());

    run_server(monitor, cli.port, shutdown_signal())
        .await
        .with_context(|| format!("API server on port {} failed", cli.port))?;

    hooks.run_all();
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutting down");
}
