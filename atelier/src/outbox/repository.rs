//! Outbox write path. Never commits; the caller owns the transaction.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{OutboxEvent, OutboxStatus};
use crate::store::{decode_error, from_millis, parse_json, parse_uuid, to_millis, StoreError};

/// Inserts one pending event in the caller's transaction, so it commits (or
/// rolls back) together with the domain write.
pub fn record_event(
    tx: &Transaction<'_>,
    aggregate_type: &str,
    aggregate_id: Uuid,
    owner_id: Uuid,
    project_id: Uuid,
    event_type: &str,
    payload: Value,
) -> Result<OutboxEvent, StoreError> {
    let event = OutboxEvent {
        id: Uuid::new_v4(),
        aggregate_type: aggregate_type.to_string(),
        aggregate_id,
        owner_id,
        project_id,
        event_type: event_type.to_string(),
        payload,
        status: OutboxStatus::Pending,
        retry_count: 0,
        next_retry_at: None,
        created_at: Utc::now(),
        published_at: None,
        last_error: None,
    };
    tx.execute(
        "INSERT INTO event_outbox (id, aggregate_type, aggregate_id, owner_id, project_id, \
         event_type, payload, status, retry_count, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            event.id.to_string(),
            event.aggregate_type,
            event.aggregate_id.to_string(),
            event.owner_id.to_string(),
            event.project_id.to_string(),
            event.event_type,
            serde_json::to_string(&event.payload)?,
            event.status.as_str(),
            event.retry_count,
            to_millis(event.created_at)
        ],
    )?;
    Ok(event)
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEvent> {
    let status_text: String = row.get(7)?;
    let status = OutboxStatus::parse(&status_text)
        .ok_or_else(|| decode_error("outbox status", &status_text))?;
    Ok(OutboxEvent {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        aggregate_type: row.get(1)?,
        aggregate_id: parse_uuid(&row.get::<_, String>(2)?)?,
        owner_id: parse_uuid(&row.get::<_, String>(3)?)?,
        project_id: parse_uuid(&row.get::<_, String>(4)?)?,
        event_type: row.get(5)?,
        payload: parse_json(&row.get::<_, String>(6)?)?,
        status,
        retry_count: row.get(8)?,
        next_retry_at: row.get::<_, Option<i64>>(9)?.map(from_millis).transpose()?,
        created_at: from_millis(row.get(10)?)?,
        published_at: row
            .get::<_, Option<i64>>(11)?
            .map(from_millis)
            .transpose()?,
        last_error: row.get(12)?,
    })
}

const EVENT_COLUMNS: &str = "id, aggregate_type, aggregate_id, owner_id, project_id, event_type, \
                             payload, status, retry_count, next_retry_at, created_at, \
                             published_at, last_error";

/// Claims up to `batch` due pending rows, oldest first, and stamps each with
/// a `lease` so a concurrent publisher's due-filter skips them. SQLite has no
/// `FOR UPDATE SKIP LOCKED`; the lease is the equivalent advisory scheme.
/// `mark_published` / `mark_failed` overwrite the lease.
pub fn claim_due(
    tx: &Transaction<'_>,
    batch: usize,
    lease: std::time::Duration,
    owner_id: Option<Uuid>,
    project_id: Option<Uuid>,
) -> Result<Vec<OutboxEvent>, StoreError> {
    let now = Utc::now();
    let mut sql = format!(
        "SELECT {EVENT_COLUMNS} FROM event_outbox \
         WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= ?1)"
    );
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(to_millis(now))];
    if let Some(owner) = owner_id {
        sql.push_str(&format!(" AND owner_id = ?{}", args.len() + 1));
        args.push(Box::new(owner.to_string()));
    }
    if let Some(project) = project_id {
        sql.push_str(&format!(" AND project_id = ?{}", args.len() + 1));
        args.push(Box::new(project.to_string()));
    }
    sql.push_str(&format!(
        " ORDER BY created_at ASC, rowid ASC LIMIT ?{}",
        args.len() + 1
    ));
    args.push(Box::new(batch as i64));

    let mut stmt = tx.prepare(&sql)?;
    let events = stmt
        .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let lease_until = now + ChronoDuration::milliseconds(lease.as_millis() as i64);
    for event in &events {
        tx.execute(
            "UPDATE event_outbox SET next_retry_at = ?2 WHERE id = ?1",
            params![event.id.to_string(), to_millis(lease_until)],
        )?;
    }
    Ok(events)
}

pub fn mark_published(tx: &Transaction<'_>, id: Uuid) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE event_outbox SET status = 'published', published_at = ?2, retry_count = 0, \
         next_retry_at = NULL, last_error = NULL WHERE id = ?1",
        params![id.to_string(), to_millis(Utc::now())],
    )?;
    Ok(())
}

/// Schedules a retry: bumps `retry_count`, records the error, keeps the row
/// pending with its next due time.
pub fn mark_failed(
    tx: &Transaction<'_>,
    id: Uuid,
    error: &str,
    next_retry_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE event_outbox SET retry_count = retry_count + 1, last_error = ?2, \
         next_retry_at = ?3 WHERE id = ?1",
        params![id.to_string(), error, to_millis(next_retry_at)],
    )?;
    Ok(())
}

/// Terminal failure after max retries: operator intervention required.
pub fn mark_terminal(tx: &Transaction<'_>, id: Uuid, error: &str) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE event_outbox SET status = 'failed', retry_count = retry_count + 1, \
         last_error = ?2, next_retry_at = NULL WHERE id = ?1",
        params![id.to_string(), error],
    )?;
    Ok(())
}

/// Resets a terminal row to pending with a clean retry slate. Returns false
/// when the row is not in the `failed` state.
pub fn reprocess(tx: &Transaction<'_>, id: Uuid) -> Result<bool, StoreError> {
    let affected = tx.execute(
        "UPDATE event_outbox SET status = 'pending', retry_count = 0, next_retry_at = NULL, \
         last_error = NULL WHERE id = ?1 AND status = 'failed'",
        params![id.to_string()],
    )?;
    Ok(affected > 0)
}

pub fn get_event(tx: &Transaction<'_>, id: Uuid) -> Result<Option<OutboxEvent>, StoreError> {
    let row = tx
        .query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM event_outbox WHERE id = ?1"),
            params![id.to_string()],
            event_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn count_pending(tx: &Transaction<'_>) -> Result<u64, StoreError> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM event_outbox WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
