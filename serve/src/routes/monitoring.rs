//! Health and stats snapshots.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use atelier::outbox::repository;

use crate::app::AppState;
use crate::error::ApiError;

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// One aggregate snapshot: worker spaces, stream broker, outbox publisher.
pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let spaces = state.manager.stats().await;
    let broker = state.broker.stats().await;
    let outbox = state.publisher.metrics();
    let pending_backlog = state.db.with_tx(repository::count_pending).await?;
    Ok(Json(json!({
        "worker_spaces": spaces,
        "stream": {
            "total_connections": broker.total_connections,
            "total_sessions": broker.total_sessions,
            "total_users": broker.total_users,
        },
        "outbox": {
            "pending_backlog": pending_backlog,
            "pending_count": outbox.pending_count,
            "published_total": outbox.published_total,
            "failed_total": outbox.failed_total,
        },
    })))
}
