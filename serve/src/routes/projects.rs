//! Project creation. A new project is seeded with the starter agent pack in
//! the same transaction.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use atelier::models::{AgentRecord, Project};
use atelier::store;
use atelier::workspace::starter;

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::current_user;

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub workspace_path: Option<String>,
}

#[derive(Serialize)]
pub struct ProjectResponse {
    pub project: Project,
    pub agents: Vec<AgentRecord>,
}

pub async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>), ApiError> {
    let user_id = current_user(&headers)?;
    if request.name.trim().is_empty() {
        return Err(ApiError(atelier::CoreError::Validation(
            "project name must not be empty".to_string(),
        )));
    }

    let name = request.name;
    let workspace_path = request
        .workspace_path
        .unwrap_or_else(|| format!("/workspaces/{name}"));

    let (project, agents) = state
        .db
        .with_tx(move |tx| {
            store::ensure_user(tx, user_id)?;
            let project = store::insert_project(tx, user_id, &name, &workspace_path)?;
            let agents = starter::seed_starter_agents(tx, user_id, project.id)?;
            Ok((project, agents))
        })
        .await?;

    tracing::info!(
        project_id = %project.id,
        owner_id = %user_id,
        agent_count = agents.len(),
        "project created with starter pack"
    );
    Ok((StatusCode::CREATED, Json(ProjectResponse { project, agents })))
}
