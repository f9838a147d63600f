//! Core error taxonomy.
//!
//! Kinds, not call sites: boundary validation surfaces to the caller with the
//! specific reason; upstream (LLM / vector / cache / store) transients are
//! captured into task results; publish failures stay inside the publisher's
//! retry schedule and never reach a request.

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Bad input at a boundary: unknown task id, cycle, empty plan, empty
    /// message, invalid agent config. Not retryable.
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Approval already left the pending state.
    #[error("approval {0} already resolved")]
    AlreadyResolved(Uuid),

    /// Approval timed out before the caller's write.
    #[error("approval {0} timed out")]
    Gone(Uuid),

    /// Bounded enqueue did not complete within the submit window.
    #[error("queue full for agent {0}")]
    QueueFull(Uuid),

    /// LLM / vector store / cache transient failure.
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Outbox-to-stream push failed; retried by the publisher.
    #[error("publish failure: {0}")]
    Publish(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialize: {err}"))
    }
}
