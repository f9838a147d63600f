//! Caller identity. Authentication is an upstream concern; by the time a
//! request reaches this service, the gateway has stamped `x-user-id`.

use axum::http::HeaderMap;
use uuid::Uuid;

use atelier::CoreError;

use crate::error::ApiError;

pub const USER_HEADER: &str = "x-user-id";

pub fn current_user(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| {
            ApiError(CoreError::Validation(format!(
                "missing or invalid {USER_HEADER} header"
            )))
        })
}
