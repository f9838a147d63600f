//! Agent rows: CRUD plus status transitions.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use uuid::Uuid;

use crate::agent::AgentConfig;
use crate::models::{AgentRecord, AgentStatus};
use crate::store::{decode_error, from_millis, parse_uuid, to_millis, StoreError};

fn agent_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
    let config_text: String = row.get(4)?;
    let config: AgentConfig = serde_json::from_str(&config_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status_text: String = row.get(5)?;
    let status = AgentStatus::parse(&status_text)
        .ok_or_else(|| decode_error("agent status", &status_text))?;
    Ok(AgentRecord {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        owner_id: parse_uuid(&row.get::<_, String>(1)?)?,
        project_id: parse_uuid(&row.get::<_, String>(2)?)?,
        name: row.get(3)?,
        config,
        status,
        created_at: from_millis(row.get(6)?)?,
    })
}

const AGENT_COLUMNS: &str = "id, owner_id, project_id, name, config, status, created_at";

pub fn insert_agent(
    tx: &Transaction<'_>,
    owner_id: Uuid,
    project_id: Uuid,
    config: &AgentConfig,
) -> Result<AgentRecord, StoreError> {
    let record = AgentRecord {
        id: Uuid::new_v4(),
        owner_id,
        project_id,
        name: config.name.clone(),
        config: config.clone(),
        status: AgentStatus::Ready,
        created_at: Utc::now(),
    };
    tx.execute(
        "INSERT INTO agents (id, owner_id, project_id, name, config, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.id.to_string(),
            record.owner_id.to_string(),
            record.project_id.to_string(),
            record.name,
            serde_json::to_string(&record.config)?,
            record.status.as_str(),
            to_millis(record.created_at)
        ],
    )?;
    Ok(record)
}

pub fn get_agent(tx: &Transaction<'_>, id: Uuid) -> Result<Option<AgentRecord>, StoreError> {
    let row = tx
        .query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
            params![id.to_string()],
            agent_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_agent_by_name(
    tx: &Transaction<'_>,
    owner_id: Uuid,
    project_id: Uuid,
    name: &str,
) -> Result<Option<AgentRecord>, StoreError> {
    let row = tx
        .query_row(
            &format!(
                "SELECT {AGENT_COLUMNS} FROM agents \
                 WHERE owner_id = ?1 AND project_id = ?2 AND name = ?3"
            ),
            params![owner_id.to_string(), project_id.to_string(), name],
            agent_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_project_agents(
    tx: &Transaction<'_>,
    owner_id: Uuid,
    project_id: Uuid,
) -> Result<Vec<AgentRecord>, StoreError> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {AGENT_COLUMNS} FROM agents \
         WHERE owner_id = ?1 AND project_id = ?2 ORDER BY created_at ASC"
    ))?;
    let rows = stmt
        .query_map(
            params![owner_id.to_string(), project_id.to_string()],
            agent_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_agent(tx: &Transaction<'_>, id: Uuid, owner_id: Uuid) -> Result<bool, StoreError> {
    let affected = tx.execute(
        "DELETE FROM agents WHERE id = ?1 AND owner_id = ?2",
        params![id.to_string(), owner_id.to_string()],
    )?;
    Ok(affected > 0)
}

pub fn set_agent_status(
    tx: &Transaction<'_>,
    id: Uuid,
    status: AgentStatus,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE agents SET status = ?2 WHERE id = ?1",
        params![id.to_string(), status.as_str()],
    )?;
    Ok(())
}
