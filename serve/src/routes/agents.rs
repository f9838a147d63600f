//! Project agent CRUD, bridged through the worker space so bus registration
//! stays coherent with the store.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use atelier::agent::AgentConfig;
use atelier::models::AgentRecord;
use atelier::CoreError;

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::current_user;

#[derive(Serialize)]
pub struct AgentListResponse {
    pub agents: Vec<AgentRecord>,
    pub total: usize,
}

pub async fn list_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
) -> Result<Json<AgentListResponse>, ApiError> {
    let user_id = current_user(&headers)?;
    let workspace = state.manager.get_or_create(user_id, project_id).await?;
    let agents = workspace.agent_records().await;
    let total = agents.len();
    Ok(Json(AgentListResponse { agents, total }))
}

pub async fn create_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(config): Json<AgentConfig>,
) -> Result<(StatusCode, Json<AgentRecord>), ApiError> {
    let user_id = current_user(&headers)?;
    let workspace = state.manager.get_or_create(user_id, project_id).await?;
    let record = workspace.add_agent(config).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn delete_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, agent_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let user_id = current_user(&headers)?;
    let workspace = state.manager.get_or_create(user_id, project_id).await?;
    if !workspace.remove_agent(agent_id).await? {
        return Err(ApiError(CoreError::NotFound(format!("agent {agent_id}"))));
    }
    Ok(StatusCode::NO_CONTENT)
}
