//! Health and service listing routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::server::AppState;
use crate::service::ServiceInfo;
use crate::stats::StatsSnapshot;
use crate::task::TaskCounts;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/services", get(list_services))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub tasks: TaskCounts,
}

#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceInfo>,
}

/// Each probe counts as a heartbeat and is pushed to stats subscribers.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        stats: state.media.heartbeat(),
        tasks: state.media.task_counts(),
    })
}

async fn list_services(State(state): State<AppState>) -> Json<ServicesResponse> {
    Json(ServicesResponse {
        services: state.media.services(),
    })
}
