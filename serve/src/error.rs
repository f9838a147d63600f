//! Core error → HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use atelier::CoreError;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl From<atelier::store::StoreError> for ApiError {
    fn from(err: atelier::store::StoreError) -> Self {
        ApiError(CoreError::Storage(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            CoreError::Validation(reason) => (StatusCode::UNPROCESSABLE_ENTITY, reason.clone()),
            CoreError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            CoreError::Unauthorized => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            CoreError::AlreadyResolved(_) => {
                (StatusCode::BAD_REQUEST, "approval already resolved".to_string())
            }
            CoreError::Gone(_) => (StatusCode::GONE, "approval request has timed out".to_string()),
            CoreError::QueueFull(_) => {
                (StatusCode::TOO_MANY_REQUESTS, "agent queue is full".to_string())
            }
            CoreError::Upstream(reason) | CoreError::UpstreamTimeout(reason) => {
                (StatusCode::BAD_GATEWAY, reason.clone())
            }
            CoreError::Publish(_) | CoreError::Storage(_) | CoreError::Internal(_) => {
                // Internals are logged, not leaked.
                tracing::error!(error = %self.0, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({"detail": detail}))).into_response()
    }
}
