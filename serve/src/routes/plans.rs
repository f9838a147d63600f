//! Plan routes: create (validated, risk-classified, approval-gated) and
//! execute (layered DAG run through the worker space).

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use atelier::graph::{self, Edge, PlanTaskSpec};
use atelier::models::{ApprovalRecord, ApprovalStatus, PlanStatus, TaskPlanRecord, TaskStatus};
use atelier::outbox::repository;
use atelier::store;
use atelier::{CoreError, PlanExecutor, PlanRunResult};

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::current_user;

#[derive(Deserialize)]
pub struct CreatePlanRequest {
    pub original_request: String,
    pub tasks: Vec<PlanTaskSpec>,
    #[serde(default)]
    pub dependencies: Vec<Edge>,
}

#[derive(Serialize)]
pub struct PlanResponse {
    pub plan: TaskPlanRecord,
    pub approval: ApprovalRecord,
}

pub async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<PlanResponse>), ApiError> {
    let user_id = current_user(&headers)?;

    // DAG validation before any write: cycles, unknown ids, empty plans.
    graph::validate(&request.tasks, &request.dependencies)
        .map_err(|e| CoreError::Validation(e.to_string()))?;

    let session = state
        .db
        .with_tx(move |tx| store::get_owned_session(tx, session_id, user_id))
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;

    let total_cost = graph::total_cost(&request.tasks);
    let total_duration = graph::total_duration(&request.tasks);
    let task_count = request.tasks.len();
    let risk = atelier::risk::assess_plan(total_cost, total_duration, task_count, &[]);
    let requires_approval = !atelier::risk::auto_approve(risk, total_cost);

    let tasks = request.tasks.clone();
    let original_request = request.original_request.clone();
    let (owner, project) = (session.owner_id, session.project_id);
    let plan = state
        .db
        .with_tx(move |tx| {
            let plan = store::insert_plan(
                tx,
                owner,
                project,
                session_id,
                &original_request,
                &tasks,
                total_cost,
                total_duration,
                requires_approval,
            )?;
            repository::record_event(
                tx,
                "task_plan",
                plan.id,
                owner,
                project,
                "task_plan_created",
                json!({
                    "session_id": session_id.to_string(),
                    "plan_id": plan.id.to_string(),
                    "task_count": task_count,
                    "total_estimated_cost": total_cost,
                    "total_estimated_duration": total_duration,
                }),
            )?;
            Ok(plan)
        })
        .await?;

    let approval = state
        .approvals
        .request_plan_approval(&plan, task_count, &[], None)
        .await?;

    // Pending approval parks the plan until the user decides.
    let plan = if approval.status == ApprovalStatus::Pending {
        let plan_id = plan.id;
        state
            .db
            .with_tx(move |tx| {
                store::set_plan_status(tx, plan_id, PlanStatus::PendingApproval)?;
                store::get_plan(tx, plan_id, owner)
            })
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("plan {plan_id}")))?
    } else {
        plan
    };

    Ok((StatusCode::CREATED, Json(PlanResponse { plan, approval })))
}

#[derive(Serialize)]
pub struct ExecutePlanResponse {
    pub plan: TaskPlanRecord,
    pub result: PlanRunResult,
}

pub async fn execute_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<ExecutePlanResponse>, ApiError> {
    let user_id = current_user(&headers)?;

    let (plan, task_rows) = state
        .db
        .with_tx(move |tx| {
            let Some(plan) = store::get_plan(tx, plan_id, user_id)? else {
                return Ok(None);
            };
            let tasks = store::list_plan_tasks(tx, plan_id)?;
            Ok(Some((plan, tasks)))
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("plan {plan_id}")))?;

    match plan.status {
        PlanStatus::Created | PlanStatus::PendingApproval if !plan.requires_approval => {}
        PlanStatus::Created => {}
        PlanStatus::PendingApproval => {
            return Err(ApiError(CoreError::Validation(
                "plan is awaiting approval".to_string(),
            )));
        }
        PlanStatus::Rejected => {
            return Err(ApiError(CoreError::Validation("plan was rejected".to_string())));
        }
        other => {
            return Err(ApiError(CoreError::Validation(format!(
                "plan is {other}, not executable"
            ))));
        }
    }

    let specs: Vec<PlanTaskSpec> = task_rows
        .iter()
        .map(|t| PlanTaskSpec {
            task_id: t.logical_id.clone(),
            description: t.description.clone(),
            assigned_to: t.assigned_agent.clone(),
            depends_on: t.depends_on.clone(),
            estimated_cost: t.estimated_cost,
            estimated_duration: t.estimated_duration,
        })
        .collect();

    let workspace = state
        .manager
        .get_or_create(plan.owner_id, plan.project_id)
        .await?;

    let (owner, project, session_id) = (plan.owner_id, plan.project_id, plan.session_id);
    state
        .db
        .with_tx(move |tx| {
            store::set_plan_status(tx, plan_id, PlanStatus::Executing)?;
            repository::record_event(
                tx,
                "task_plan",
                plan_id,
                owner,
                project,
                "task_started",
                json!({
                    "session_id": session_id.to_string(),
                    "plan_id": plan_id.to_string(),
                }),
            )?;
            Ok(())
        })
        .await?;

    let executor = PlanExecutor::new(
        state.settings.max_concurrent_tasks,
        Duration::from_secs(state.settings.task_timeout),
    );
    let result = executor.execute(&workspace, &specs, &[]).await;

    let final_status = if result.success {
        PlanStatus::Completed
    } else if result.completed_tasks > 0 {
        PlanStatus::PartialSuccess
    } else {
        PlanStatus::Failed
    };

    // Persist per-task outcomes, the final plan status, and the completion
    // event in one transaction.
    let task_results = result.task_results.clone();
    let summary = json!({
        "session_id": session_id.to_string(),
        "plan_id": plan_id.to_string(),
        "status": final_status.as_str(),
        "completed_tasks": result.completed_tasks,
        "failed_tasks": result.failed_tasks,
        "total_duration_seconds": result.total_duration_seconds,
    });
    let plan = state
        .db
        .with_tx(move |tx| {
            for (logical_id, outcome) in &task_results {
                let status = if outcome.success {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
                store::update_task_outcome(
                    tx,
                    plan_id,
                    logical_id,
                    status,
                    outcome.result.as_deref(),
                    outcome.error.as_deref(),
                )?;
            }
            store::set_plan_status(tx, plan_id, final_status)?;
            repository::record_event(
                tx,
                "task_plan",
                plan_id,
                owner,
                project,
                "task_completed",
                summary,
            )?;
            store::get_plan(tx, plan_id, owner)
        })
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("plan {plan_id}")))?;

    Ok(Json(ExecutePlanResponse { plan, result }))
}
