//! Approval request rows.
//!
//! Resolution goes through [`resolve_if_pending`], whose `WHERE status =
//! 'pending'` guard makes the pending → resolved transition happen at most
//! once regardless of racing writers.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{ApprovalKind, ApprovalRecord, ApprovalStatus};
use crate::store::{decode_error, from_millis, parse_json, parse_uuid, to_millis, StoreError};

pub fn insert_approval(
    tx: &Transaction<'_>,
    owner_id: Uuid,
    kind: ApprovalKind,
    payload: Value,
    status: ApprovalStatus,
    decision: Option<&str>,
) -> Result<ApprovalRecord, StoreError> {
    let now = Utc::now();
    let resolved_at = (status != ApprovalStatus::Pending).then_some(now);
    let record = ApprovalRecord {
        id: Uuid::new_v4(),
        owner_id,
        kind,
        payload,
        status,
        created_at: now,
        resolved_at,
        decision: decision.map(str::to_string),
    };
    tx.execute(
        "INSERT INTO approval_requests (id, owner_id, kind, payload, status, created_at, \
         resolved_at, decision) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id.to_string(),
            record.owner_id.to_string(),
            record.kind.as_str(),
            serde_json::to_string(&record.payload)?,
            record.status.as_str(),
            to_millis(record.created_at),
            record.resolved_at.map(to_millis),
            record.decision
        ],
    )?;
    Ok(record)
}

fn approval_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalRecord> {
    let kind_text: String = row.get(2)?;
    let kind =
        ApprovalKind::parse(&kind_text).ok_or_else(|| decode_error("approval kind", &kind_text))?;
    let status_text: String = row.get(4)?;
    let status = ApprovalStatus::parse(&status_text)
        .ok_or_else(|| decode_error("approval status", &status_text))?;
    Ok(ApprovalRecord {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        owner_id: parse_uuid(&row.get::<_, String>(1)?)?,
        kind,
        payload: parse_json(&row.get::<_, String>(3)?)?,
        status,
        created_at: from_millis(row.get(5)?)?,
        resolved_at: row
            .get::<_, Option<i64>>(6)?
            .map(from_millis)
            .transpose()?,
        decision: row.get(7)?,
    })
}

const APPROVAL_COLUMNS: &str =
    "id, owner_id, kind, payload, status, created_at, resolved_at, decision";

pub fn get_approval(
    tx: &Transaction<'_>,
    id: Uuid,
    owner_id: Uuid,
) -> Result<Option<ApprovalRecord>, StoreError> {
    let row = tx
        .query_row(
            &format!(
                "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE id = ?1 AND owner_id = ?2"
            ),
            params![id.to_string(), owner_id.to_string()],
            approval_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_pending_approvals(
    tx: &Transaction<'_>,
    owner_id: Uuid,
) -> Result<Vec<ApprovalRecord>, StoreError> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {APPROVAL_COLUMNS} FROM approval_requests \
         WHERE owner_id = ?1 AND status = 'pending' ORDER BY created_at ASC"
    ))?;
    let rows = stmt
        .query_map(params![owner_id.to_string()], approval_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Writes the first and only non-pending transition. Returns false when the
/// row was already resolved (or does not exist) — the caller maps that to
/// `ALREADY_RESOLVED`.
pub fn resolve_if_pending(
    tx: &Transaction<'_>,
    id: Uuid,
    status: ApprovalStatus,
    decision: &str,
    resolved_at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let affected = tx.execute(
        "UPDATE approval_requests SET status = ?2, decision = ?3, resolved_at = ?4 \
         WHERE id = ?1 AND status = 'pending'",
        params![
            id.to_string(),
            status.as_str(),
            decision,
            to_millis(resolved_at)
        ],
    )?;
    Ok(affected > 0)
}
