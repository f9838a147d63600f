//! Approval decision routes. Every load runs the opportunistic timeout check
//! first, per the data-driven timer model.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use atelier::models::ApprovalRecord;

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::current_user;

pub async fn list_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApprovalRecord>>, ApiError> {
    let user_id = current_user(&headers)?;
    let pending = state.approvals.list_pending(user_id).await?;
    // Expire overdue requests as we pass by; keep the still-live ones.
    let mut live = Vec::with_capacity(pending.len());
    for approval in pending {
        if !state.approvals.check_timeout(user_id, approval.id).await? {
            live.push(state.approvals.get(user_id, approval.id).await?);
        }
    }
    Ok(Json(live))
}

pub async fn confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(approval_id): Path<Uuid>,
) -> Result<Json<ApprovalRecord>, ApiError> {
    let user_id = current_user(&headers)?;
    let record = state.approvals.confirm(user_id, approval_id).await?;
    Ok(Json(record))
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn reject(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(approval_id): Path<Uuid>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<ApprovalRecord>, ApiError> {
    let user_id = current_user(&headers)?;
    let reason = body.and_then(|Json(r)| r.reason);
    let record = state.approvals.reject(user_id, approval_id, reason).await?;
    Ok(Json(record))
}
