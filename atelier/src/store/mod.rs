//! SQLite-backed persistence.
//!
//! One [`Database`] handle per process; every operation runs on a fresh
//! connection inside `spawn_blocking`. [`Database::with_tx`] is the only
//! write path: it opens an immediate transaction, runs the given closure, and
//! commits — so a domain write and its outbox row either both land or neither
//! does. Repositories are plain synchronous functions over
//! `rusqlite::Transaction`, composed inside one `with_tx` closure by callers.

mod agents;
mod approvals;
mod plans;
mod sessions;

pub use agents::*;
pub use approvals::*;
pub use plans::*;
pub use sessions::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("blocking task: {0}")]
    Join(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY,
    email       TEXT NOT NULL UNIQUE,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id              TEXT PRIMARY KEY,
    owner_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    workspace_path  TEXT NOT NULL,
    created_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    project_id  TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    config      TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'ready',
    created_at  INTEGER NOT NULL,
    UNIQUE (owner_id, project_id, name)
);

CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    project_id  TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL,
    agent_id    TEXT REFERENCES agents(id) ON DELETE SET NULL,
    payload     TEXT,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_messages_session_created ON messages (session_id, created_at);

CREATE TABLE IF NOT EXISTS task_plans (
    id                        TEXT PRIMARY KEY,
    owner_id                  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    project_id                TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    session_id                TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    original_request          TEXT NOT NULL,
    status                    TEXT NOT NULL DEFAULT 'created',
    total_estimated_cost      REAL NOT NULL DEFAULT 0,
    total_estimated_duration  REAL NOT NULL DEFAULT 0,
    requires_approval         INTEGER NOT NULL DEFAULT 0,
    created_at                INTEGER NOT NULL,
    updated_at                INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS task_plan_tasks (
    id                  TEXT PRIMARY KEY,
    plan_id             TEXT NOT NULL REFERENCES task_plans(id) ON DELETE CASCADE,
    logical_id          TEXT NOT NULL,
    description         TEXT NOT NULL,
    assigned_agent      TEXT,
    depends_on          TEXT NOT NULL,
    estimated_cost      REAL NOT NULL DEFAULT 0,
    estimated_duration  REAL NOT NULL DEFAULT 0,
    status              TEXT NOT NULL DEFAULT 'pending',
    result              TEXT,
    error               TEXT,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL,
    UNIQUE (plan_id, logical_id)
);

CREATE TABLE IF NOT EXISTS approval_requests (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    kind        TEXT NOT NULL,
    payload     TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    created_at  INTEGER NOT NULL,
    resolved_at INTEGER,
    decision    TEXT
);
CREATE INDEX IF NOT EXISTS ix_approvals_owner_status ON approval_requests (owner_id, status);

-- No foreign keys: the outbox is a durable log; the normal write path never
-- deletes from it, even when its aggregate goes away.
CREATE TABLE IF NOT EXISTS event_outbox (
    id              TEXT PRIMARY KEY,
    aggregate_type  TEXT NOT NULL,
    aggregate_id    TEXT NOT NULL,
    owner_id        TEXT NOT NULL,
    project_id      TEXT NOT NULL,
    event_type      TEXT NOT NULL,
    payload         TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',
    retry_count     INTEGER NOT NULL DEFAULT 0,
    next_retry_at   INTEGER,
    created_at      INTEGER NOT NULL,
    published_at    INTEGER,
    last_error      TEXT
);
CREATE INDEX IF NOT EXISTS ix_outbox_status_retry_created ON event_outbox (status, next_retry_at, created_at);
CREATE INDEX IF NOT EXISTS ix_outbox_aggregate_created ON event_outbox (aggregate_id, created_at);
CREATE INDEX IF NOT EXISTS ix_outbox_project_created ON event_outbox (project_id, created_at);
CREATE INDEX IF NOT EXISTS ix_outbox_owner_created ON event_outbox (owner_id, created_at);
"#;

/// Handle to the on-disk store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: Arc::new(path),
        })
    }

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(self.path.as_ref())?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Runs `f` inside one immediate transaction and commits on `Ok`.
    /// Anything the closure writes is atomic with everything else it writes.
    pub async fn with_tx<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.connect()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Read-only variant; no transaction, no commit.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.connect()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

pub(crate) fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {millis}").into(),
        )
    })
}

pub(crate) fn parse_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_json(s: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn decode_error(what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unrecognized {what}: {value}").into(),
    )
}
