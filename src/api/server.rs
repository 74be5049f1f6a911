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

use std::future::Future;

use axum::routing::{get, patch, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::handlers::{
    gpu_info_handler, gpu_switch_handler, reinitialize_handler, status_handler, switch_handler,
    transfer_speed_handler, update_settings_handler, SharedState,
};

/// All monitoring routes over the shared driver.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/monitor",
            get(status_handler).patch(update_settings_handler),
        )
        .route("/monitor/switch", post(switch_handler))
        .route("/monitor/GPU", get(gpu_info_handler))
        .route("/monitor/GPU/{index}", patch(gpu_switch_handler))
        .route("/monitor/TransferSpeed", get(transfer_speed_handler))
        .route("/monitor/reinitialize", post(reinitialize_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Serves the routes on `0.0.0.0:{port}` until `shutdown` resolves.
pub async fn run_server<F>(state: SharedState, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
