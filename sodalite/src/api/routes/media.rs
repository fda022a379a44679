//! Metadata, process submission and file download routes.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::media::{ImageFormat, SanitizedDescription};
use crate::service::ProcessRequest;
use crate::task::TaskStatus;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/download", post(describe))
        .route("/process", post(process))
        .route("/download/photo", get(photo))
        .route("/download/{id}/file", get(download_file))
}

#[derive(Debug, Deserialize)]
pub struct DescribeRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct PhotoQuery {
    pub url: String,
    #[serde(default)]
    pub format: ImageFormat,
}

async fn describe(
    State(state): State<AppState>,
    Json(request): Json<DescribeRequest>,
) -> ApiResult<Json<SanitizedDescription>> {
    let description = state.media.submit_metadata(&request.url).await?;
    Ok(Json(description))
}

async fn process(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    let task_id = state.media.submit_process(request).await?;
    Ok(Json(ProcessResponse {
        task_id,
        status: TaskStatus::Queued,
    }))
}

async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let served = state.media.open_file(&id).await?;
    let file = tokio::fs::File::open(&served.path).await.map_err(|e| {
        tracing::warn!(task_id = %id, error = %e, "Output vanished before streaming");
        ApiError::not_found("file not found")
    })?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, served.mime_type.to_string()),
            (header::CONTENT_LENGTH, served.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", served.file_name),
            ),
        ],
        body,
    )
        .into_response())
}

async fn photo(
    State(state): State<AppState>,
    Query(query): Query<PhotoQuery>,
) -> ApiResult<Response> {
    let bytes = state.media.fetch_photo(&query.url, query.format).await?;
    Ok((
        [
            (header::CONTENT_TYPE, query.format.mime_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"download.{}\"", query.format.as_str()),
            ),
        ],
        bytes,
    )
        .into_response())
}
