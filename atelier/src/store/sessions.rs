//! Users, projects, chat sessions, and messages.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{ChatSession, MessageRecord, MessageRole, Project, User};
use crate::store::{from_millis, parse_json, parse_uuid, to_millis, StoreError};

pub fn insert_user(tx: &Transaction<'_>, email: &str) -> Result<User, StoreError> {
    let user = User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        created_at: Utc::now(),
    };
    tx.execute(
        "INSERT INTO users (id, email, created_at) VALUES (?1, ?2, ?3)",
        params![user.id.to_string(), user.email, to_millis(user.created_at)],
    )?;
    Ok(user)
}

/// Upserts a user row for an authenticated principal. The real identity
/// surface lives upstream; this keeps foreign keys satisfied for ids minted
/// there.
pub fn ensure_user(tx: &Transaction<'_>, id: Uuid) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO users (id, email, created_at) VALUES (?1, ?2, ?3)",
        params![
            id.to_string(),
            format!("{id}@users.local"),
            to_millis(Utc::now())
        ],
    )?;
    Ok(())
}

pub fn insert_project(
    tx: &Transaction<'_>,
    owner_id: Uuid,
    name: &str,
    workspace_path: &str,
) -> Result<Project, StoreError> {
    let project = Project {
        id: Uuid::new_v4(),
        owner_id,
        name: name.to_string(),
        workspace_path: workspace_path.to_string(),
        created_at: Utc::now(),
    };
    tx.execute(
        "INSERT INTO projects (id, owner_id, name, workspace_path, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            project.id.to_string(),
            project.owner_id.to_string(),
            project.name,
            project.workspace_path,
            to_millis(project.created_at)
        ],
    )?;
    Ok(project)
}

pub fn get_project(
    tx: &Transaction<'_>,
    id: Uuid,
    owner_id: Uuid,
) -> Result<Option<Project>, StoreError> {
    let row = tx
        .query_row(
            "SELECT id, owner_id, name, workspace_path, created_at FROM projects \
             WHERE id = ?1 AND owner_id = ?2",
            params![id.to_string(), owner_id.to_string()],
            |row| {
                Ok(Project {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    owner_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    name: row.get(2)?,
                    workspace_path: row.get(3)?,
                    created_at: from_millis(row.get(4)?)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn create_session(
    tx: &Transaction<'_>,
    owner_id: Uuid,
    project_id: Uuid,
) -> Result<ChatSession, StoreError> {
    let session = ChatSession {
        id: Uuid::new_v4(),
        owner_id,
        project_id,
        created_at: Utc::now(),
    };
    tx.execute(
        "INSERT INTO sessions (id, owner_id, project_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            session.id.to_string(),
            session.owner_id.to_string(),
            session.project_id.to_string(),
            to_millis(session.created_at)
        ],
    )?;
    Ok(session)
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSession> {
    Ok(ChatSession {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        owner_id: parse_uuid(&row.get::<_, String>(1)?)?,
        project_id: parse_uuid(&row.get::<_, String>(2)?)?,
        created_at: from_millis(row.get(3)?)?,
    })
}

/// Loads a session only when `owner_id` owns it; isolation happens here.
pub fn get_owned_session(
    tx: &Transaction<'_>,
    id: Uuid,
    owner_id: Uuid,
) -> Result<Option<ChatSession>, StoreError> {
    let row = tx
        .query_row(
            "SELECT id, owner_id, project_id, created_at FROM sessions \
             WHERE id = ?1 AND owner_id = ?2",
            params![id.to_string(), owner_id.to_string()],
            session_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_sessions(tx: &Transaction<'_>, owner_id: Uuid) -> Result<Vec<ChatSession>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT id, owner_id, project_id, created_at FROM sessions \
         WHERE owner_id = ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt
        .query_map(params![owner_id.to_string()], session_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deletes the session; messages and plans cascade. Returns false when the
/// session does not exist or belongs to someone else.
pub fn delete_session(tx: &Transaction<'_>, id: Uuid, owner_id: Uuid) -> Result<bool, StoreError> {
    let affected = tx.execute(
        "DELETE FROM sessions WHERE id = ?1 AND owner_id = ?2",
        params![id.to_string(), owner_id.to_string()],
    )?;
    Ok(affected > 0)
}

pub fn insert_message(
    tx: &Transaction<'_>,
    session_id: Uuid,
    role: MessageRole,
    content: &str,
    agent_id: Option<Uuid>,
    payload: Option<&Value>,
) -> Result<MessageRecord, StoreError> {
    let record = MessageRecord {
        id: Uuid::new_v4(),
        session_id,
        role,
        content: content.to_string(),
        agent_id,
        payload: payload.cloned(),
        created_at: Utc::now(),
    };
    let payload_text = match payload {
        Some(value) => Some(serde_json::to_string(value)?),
        None => None,
    };
    tx.execute(
        "INSERT INTO messages (id, session_id, role, content, agent_id, payload, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.id.to_string(),
            record.session_id.to_string(),
            record.role.as_str(),
            record.content,
            record.agent_id.map(|id| id.to_string()),
            payload_text,
            to_millis(record.created_at)
        ],
    )?;
    Ok(record)
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let role_text: String = row.get(2)?;
    let role = MessageRole::parse(&role_text)
        .ok_or_else(|| crate::store::decode_error("message role", &role_text))?;
    let payload = row
        .get::<_, Option<String>>(5)?
        .map(|s| parse_json(&s))
        .transpose()?;
    Ok(MessageRecord {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        session_id: parse_uuid(&row.get::<_, String>(1)?)?,
        role,
        content: row.get(3)?,
        agent_id: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        payload,
        created_at: from_millis(row.get(6)?)?,
    })
}

/// Client-visible messages, oldest first. `tool_internal` rows are filtered
/// at this boundary.
pub fn list_visible_messages(
    tx: &Transaction<'_>,
    session_id: Uuid,
    limit: usize,
    offset: usize,
) -> Result<Vec<MessageRecord>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT id, session_id, role, content, agent_id, payload, created_at FROM messages \
         WHERE session_id = ?1 AND role IN ('user', 'assistant', 'system') \
         ORDER BY created_at ASC, rowid ASC LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(
            params![session_id.to_string(), limit as i64, offset as i64],
            message_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Last `limit` user/assistant turns, oldest first, for threading into the
/// agent as chat history.
pub fn recent_history(
    tx: &Transaction<'_>,
    session_id: Uuid,
    limit: usize,
) -> Result<Vec<MessageRecord>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT id, session_id, role, content, agent_id, payload, created_at FROM messages \
         WHERE session_id = ?1 AND role IN ('user', 'assistant') \
         ORDER BY created_at DESC, rowid DESC LIMIT ?2",
    )?;
    let mut rows = stmt
        .query_map(params![session_id.to_string(), limit as i64], message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.reverse();
    Ok(rows)
}

pub fn count_messages(tx: &Transaction<'_>, session_id: Uuid) -> Result<i64, StoreError> {
    let count = tx.query_row(
        "SELECT COUNT(*) FROM messages WHERE session_id = ?1 \
         AND role IN ('user', 'assistant', 'system')",
        params![session_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}
