//! Task plans and their tasks.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use uuid::Uuid;

use crate::graph::PlanTaskSpec;
use crate::models::{PlanStatus, PlanTaskRecord, TaskPlanRecord, TaskStatus};
use crate::store::{decode_error, from_millis, parse_uuid, to_millis, StoreError};

pub fn insert_plan(
    tx: &Transaction<'_>,
    owner_id: Uuid,
    project_id: Uuid,
    session_id: Uuid,
    original_request: &str,
    tasks: &[PlanTaskSpec],
    total_cost: f64,
    total_duration: f64,
    requires_approval: bool,
) -> Result<TaskPlanRecord, StoreError> {
    let now = Utc::now();
    let plan = TaskPlanRecord {
        id: Uuid::new_v4(),
        owner_id,
        project_id,
        session_id,
        original_request: original_request.to_string(),
        status: PlanStatus::Created,
        total_estimated_cost: total_cost,
        total_estimated_duration: total_duration,
        requires_approval,
        created_at: now,
        updated_at: now,
    };
    tx.execute(
        "INSERT INTO task_plans (id, owner_id, project_id, session_id, original_request, \
         status, total_estimated_cost, total_estimated_duration, requires_approval, \
         created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            plan.id.to_string(),
            plan.owner_id.to_string(),
            plan.project_id.to_string(),
            plan.session_id.to_string(),
            plan.original_request,
            plan.status.as_str(),
            plan.total_estimated_cost,
            plan.total_estimated_duration,
            plan.requires_approval as i64,
            to_millis(now),
            to_millis(now)
        ],
    )?;
    for task in tasks {
        tx.execute(
            "INSERT INTO task_plan_tasks (id, plan_id, logical_id, description, \
             assigned_agent, depends_on, estimated_cost, estimated_duration, status, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                Uuid::new_v4().to_string(),
                plan.id.to_string(),
                task.task_id,
                task.description,
                task.assigned_to,
                serde_json::to_string(&task.depends_on)?,
                task.estimated_cost,
                task.estimated_duration,
                TaskStatus::Pending.as_str(),
                to_millis(now),
                to_millis(now)
            ],
        )?;
    }
    Ok(plan)
}

fn plan_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskPlanRecord> {
    let status_text: String = row.get(5)?;
    let status =
        PlanStatus::parse(&status_text).ok_or_else(|| decode_error("plan status", &status_text))?;
    Ok(TaskPlanRecord {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        owner_id: parse_uuid(&row.get::<_, String>(1)?)?,
        project_id: parse_uuid(&row.get::<_, String>(2)?)?,
        session_id: parse_uuid(&row.get::<_, String>(3)?)?,
        original_request: row.get(4)?,
        status,
        total_estimated_cost: row.get(6)?,
        total_estimated_duration: row.get(7)?,
        requires_approval: row.get::<_, i64>(8)? != 0,
        created_at: from_millis(row.get(9)?)?,
        updated_at: from_millis(row.get(10)?)?,
    })
}

const PLAN_COLUMNS: &str = "id, owner_id, project_id, session_id, original_request, status, \
                            total_estimated_cost, total_estimated_duration, requires_approval, \
                            created_at, updated_at";

pub fn get_plan(
    tx: &Transaction<'_>,
    id: Uuid,
    owner_id: Uuid,
) -> Result<Option<TaskPlanRecord>, StoreError> {
    let row = tx
        .query_row(
            &format!("SELECT {PLAN_COLUMNS} FROM task_plans WHERE id = ?1 AND owner_id = ?2"),
            params![id.to_string(), owner_id.to_string()],
            plan_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn set_plan_status(
    tx: &Transaction<'_>,
    id: Uuid,
    status: PlanStatus,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE task_plans SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), status.as_str(), to_millis(Utc::now())],
    )?;
    Ok(())
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlanTaskRecord> {
    let status_text: String = row.get(8)?;
    let status =
        TaskStatus::parse(&status_text).ok_or_else(|| decode_error("task status", &status_text))?;
    let depends_text: String = row.get(5)?;
    let depends_on: Vec<String> = serde_json::from_str(&depends_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(PlanTaskRecord {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        plan_id: parse_uuid(&row.get::<_, String>(1)?)?,
        logical_id: row.get(2)?,
        description: row.get(3)?,
        assigned_agent: row.get(4)?,
        depends_on,
        estimated_cost: row.get(6)?,
        estimated_duration: row.get(7)?,
        status,
        result: row.get(9)?,
        error: row.get(10)?,
        created_at: from_millis(row.get(11)?)?,
        updated_at: from_millis(row.get(12)?)?,
    })
}

pub fn list_plan_tasks(
    tx: &Transaction<'_>,
    plan_id: Uuid,
) -> Result<Vec<PlanTaskRecord>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT id, plan_id, logical_id, description, assigned_agent, depends_on, \
         estimated_cost, estimated_duration, status, result, error, created_at, updated_at \
         FROM task_plan_tasks WHERE plan_id = ?1 ORDER BY logical_id ASC",
    )?;
    let rows = stmt
        .query_map(params![plan_id.to_string()], task_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_task_outcome(
    tx: &Transaction<'_>,
    plan_id: Uuid,
    logical_id: &str,
    status: TaskStatus,
    result: Option<&str>,
    error: Option<&str>,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE task_plan_tasks SET status = ?3, result = ?4, error = ?5, updated_at = ?6 \
         WHERE plan_id = ?1 AND logical_id = ?2",
        params![
            plan_id.to_string(),
            logical_id,
            status.as_str(),
            result,
            error,
            to_millis(Utc::now())
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{create_session, insert_project, insert_user, Database};

    #[tokio::test]
    async fn plan_round_trip_with_task_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db")).unwrap();

        let tasks = vec![
            PlanTaskSpec {
                task_id: "t0".to_string(),
                description: "first".to_string(),
                assigned_to: Some("Coder".to_string()),
                depends_on: Vec::new(),
                estimated_cost: 0.05,
                estimated_duration: 10.0,
            },
            PlanTaskSpec {
                task_id: "t1".to_string(),
                description: "second".to_string(),
                assigned_to: None,
                depends_on: vec!["t0".to_string()],
                estimated_cost: 0.03,
                estimated_duration: 5.0,
            },
        ];

        let plan = db
            .with_tx(move |tx| {
                let user = insert_user(tx, "a@example.com")?;
                let project = insert_project(tx, user.id, "p", "/tmp/p")?;
                let session = create_session(tx, user.id, project.id)?;
                insert_plan(
                    tx, user.id, project.id, session.id, "do it", &tasks, 0.08, 15.0, true,
                )
            })
            .await
            .unwrap();
        assert_eq!(plan.status, PlanStatus::Created);
        assert!(plan.requires_approval);

        let plan_id = plan.id;
        let rows = db
            .with_tx(move |tx| list_plan_tasks(tx, plan_id))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].logical_id, "t0");
        assert_eq!(rows[1].depends_on, vec!["t0".to_string()]);
        assert!(rows.iter().all(|t| t.status == TaskStatus::Pending));

        db.with_tx(move |tx| {
            update_task_outcome(tx, plan_id, "t0", TaskStatus::Completed, Some("done"), None)?;
            update_task_outcome(tx, plan_id, "t1", TaskStatus::Failed, None, Some("boom"))?;
            set_plan_status(tx, plan_id, PlanStatus::PartialSuccess)
        })
        .await
        .unwrap();

        let (plan, rows) = db
            .with_tx(move |tx| {
                let plan = get_plan(tx, plan_id, plan_owner(tx, plan_id)?)?;
                Ok((plan, list_plan_tasks(tx, plan_id)?))
            })
            .await
            .unwrap();
        let plan = plan.unwrap();
        assert_eq!(plan.status, PlanStatus::PartialSuccess);
        assert_eq!(rows[0].result.as_deref(), Some("done"));
        assert_eq!(rows[1].error.as_deref(), Some("boom"));
    }

    fn plan_owner(tx: &Transaction<'_>, plan_id: Uuid) -> Result<Uuid, StoreError> {
        let owner: String = tx.query_row(
            "SELECT owner_id FROM task_plans WHERE id = ?1",
            params![plan_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(crate::store::parse_uuid(&owner)?)
    }
}
