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

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::api::settings::{GpuSwitchSettings, MonitorSettings, MonitorSwitch};
use crate::device::types::Device;
use crate::error::Error;
use crate::hardware::StatusSnapshot;
use crate::monitor::Monitor;
use crate::probe::transfer_speed::TransferSpeedConfig;

pub type SharedState = Arc<Monitor>;

pub type ApiResult<T> = std::result::Result<T, (StatusCode, String)>;

fn error_response(error: Error) -> (StatusCode, String) {
    match error {
        Error::Validation(message) => (StatusCode::BAD_REQUEST, message),
        other => {
            tracing::error!("Request failed: {other}");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// Current switches and rate, echoed after every settings change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSettings {
    pub rate: f64,
    pub monitoring: bool,
    #[serde(rename = "switchCPU")]
    pub switch_cpu: bool,
    #[serde(rename = "switchGPU")]
    pub switch_gpu: bool,
    #[serde(rename = "switchHDD")]
    pub switch_hdd: bool,
    #[serde(rename = "switchRAM")]
    pub switch_ram: bool,
    #[serde(rename = "switchVRAM")]
    pub switch_vram: bool,
    pub switch_transfer_speed: bool,
    #[serde(rename = "switchSharedGPUMemory")]
    pub switch_shared_gpu_memory: bool,
    #[serde(rename = "whichHDD")]
    pub which_hdd: String,
}

async fn current_settings(monitor: &Monitor) -> ApiResult<CurrentSettings> {
    let (rate, monitoring) = (monitor.rate(), monitor.is_running());
    monitor
        .with_hardware(move |hw| CurrentSettings {
            rate,
            monitoring,
            switch_cpu: hw.switch_cpu(),
            switch_gpu: hw.switch_gpu(),
            switch_hdd: hw.switch_hdd(),
            switch_ram: hw.switch_ram(),
            switch_vram: hw.switch_vram(),
            switch_transfer_speed: hw.switch_transfer_speed(),
            switch_shared_gpu_memory: hw.switch_shared_gpu_memory(),
            which_hdd: hw.which_hdd().to_string(),
        })
        .await
        .map_err(error_response)
}

/// `GET /monitor`
///
/// Serves the polled snapshot while the driver runs; otherwise reads the
/// hardware so switch changes show up immediately.
pub async fn status_handler(State(monitor): State<SharedState>) -> ApiResult<Json<StatusSnapshot>> {
    if monitor.is_running() {
        if let Some(snapshot) = monitor.latest().await {
            return Ok(Json(snapshot));
        }
    }
    monitor
        .snapshot_now()
        .await
        .map(Json)
        .map_err(error_response)
}

/// `PATCH /monitor`
pub async fn update_settings_handler(
    State(monitor): State<SharedState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<CurrentSettings>> {
    let settings = MonitorSettings::from_json(&body).map_err(error_response)?;

    let switches = settings.clone();
    monitor
        .with_hardware(move |hw| switches.apply(hw))
        .await
        .and_then(|applied| applied)
        .map_err(error_response)?;
    monitor.invalidate().await;
    settings.apply_rate(&monitor).map_err(error_response)?;

    tracing::debug!("Settings updated: {settings:?}");
    current_settings(&monitor).await.map(Json)
}

/// `POST /monitor/switch`
pub async fn switch_handler(
    State(monitor): State<SharedState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let switch = MonitorSwitch::from_json(&body).map_err(error_response)?;
    if switch.monitor {
        monitor.start().map_err(error_response)?;
    } else {
        monitor.stop();
    }
    Ok(Json(serde_json::json!({ "monitor": monitor.is_running() })))
}

/// `GET /monitor/GPU`
pub async fn gpu_info_handler(
    State(monitor): State<SharedState>,
) -> ApiResult<Json<Vec<Device>>> {
    monitor
        .with_hardware(|hw| hw.get_gpu_info())
        .await
        .map(Json)
        .map_err(error_response)
}

/// `PATCH /monitor/GPU/{index}`
pub async fn gpu_switch_handler(
    State(monitor): State<SharedState>,
    Path(index): Path<usize>,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    let settings = GpuSwitchSettings::from_json(&body).map_err(error_response)?;
    monitor
        .with_hardware(move |hw| settings.apply(index, hw))
        .await
        .and_then(|applied| applied)
        .map_err(error_response)?;
    monitor.invalidate().await;
    Ok(StatusCode::OK)
}

/// `GET /monitor/TransferSpeed`
pub async fn transfer_speed_handler(
    State(monitor): State<SharedState>,
) -> ApiResult<Json<TransferSpeedConfig>> {
    monitor
        .with_hardware(|hw| hw.get_transfer_speed_info())
        .await
        .map(Json)
        .map_err(error_response)
}

/// `POST /monitor/reinitialize`
pub async fn reinitialize_handler(State(monitor): State<SharedState>) -> ApiResult<Json<Value>> {
    // Backend initialization may sleep between retries
    let success = monitor
        .with_hardware(|hw| hw.reinitialize())
        .await
        .map_err(error_response)?;
    monitor.invalidate().await;

    Ok(Json(serde_json::json!({ "success": success })))
}
