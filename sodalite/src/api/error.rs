//! HTTP mapping of application errors.
//!
//! Every failure leaves a handler as `{ "code", "message", "details"? }`
//! with a status derived from the domain error.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::extractor::ExtractionError;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

/// Error returned by route handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Machine-readable code for the status.
    pub fn code(&self) -> &'static str {
        match self.status {
            StatusCode::BAD_REQUEST => "BAD_REQUEST",
            StatusCode::NOT_FOUND => "NOT_FOUND",
            StatusCode::CONFLICT => "CONFLICT",
            StatusCode::SERVICE_UNAVAILABLE => "SERVICE_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            message: &self.message,
            details: self.details.as_ref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::ServiceDetection(url) => {
                return ApiError::bad_request("unsupported service")
                    .with_details(serde_json::json!({ "url": url }));
            }
            Error::Extraction(ExtractionError::ToolUnavailable(tool)) => {
                tracing::error!(%tool, "Extractor tool missing");
                return ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "metadata extraction is unavailable",
                );
            }
            Error::Extraction(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            _ => {
                tracing::error!(error = %err, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match err {
            Error::Validation(msg) | Error::Conflict(msg) => msg,
            other => other.to_string(),
        };
        ApiError::new(status, message)
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
