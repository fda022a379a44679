//! Task status routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::service::{TaskPhaseView, TaskStatusView};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/task/{id}", get(status).delete(delete_task))
        .route("/task/{id}/phase", get(phase))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskStatusView>> {
    Ok(Json(state.media.get_status(&id)?))
}

async fn phase(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskPhaseView>> {
    Ok(Json(state.media.get_phase(&id)?))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.media.delete_task(&id).await?;
    Ok(Json(MessageResponse {
        message: "task cleaned up successfully".to_string(),
    }))
}
