//! Chat session CRUD and message listing.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use atelier::models::{ChatSession, MessageRecord};
use atelier::store;
use atelier::CoreError;

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::current_user;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub project_id: Uuid,
}

#[derive(Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<ChatSession>,
    pub total: usize,
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<ChatSession>), ApiError> {
    let user_id = current_user(&headers)?;
    let project_id = request.project_id;

    let session = state
        .db
        .with_tx(move |tx| {
            if store::get_project(tx, project_id, user_id)?.is_none() {
                return Ok(None);
            }
            store::create_session(tx, user_id, project_id).map(Some)
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("project {project_id}")))?;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionListResponse>, ApiError> {
    let user_id = current_user(&headers)?;
    let sessions = state
        .db
        .with_tx(move |tx| store::list_sessions(tx, user_id))
        .await?;
    let total = sessions.len();
    Ok(Json(SessionListResponse { sessions, total }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = current_user(&headers)?;
    let deleted = state
        .db
        .with_tx(move |tx| store::delete_session(tx, session_id, user_id))
        .await?;
    if !deleted {
        return Err(ApiError(CoreError::NotFound(format!("session {session_id}"))));
    }
    state.broker.close_session(session_id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageRecord>,
    pub total: i64,
    pub session_id: Uuid,
}

/// Visible messages only; `tool_internal` rows are filtered by the store.
pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let user_id = current_user(&headers)?;
    let (limit, offset) = (query.limit, query.offset);

    let result = state
        .db
        .with_tx(move |tx| {
            if store::get_owned_session(tx, session_id, user_id)?.is_none() {
                return Ok(None);
            }
            let messages = store::list_visible_messages(tx, session_id, limit, offset)?;
            let total = store::count_messages(tx, session_id)?;
            Ok(Some((messages, total)))
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;

    let (messages, total) = result;
    Ok(Json(MessageListResponse {
        messages,
        total,
        session_id,
    }))
}
