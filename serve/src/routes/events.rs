//! Streaming endpoint: NDJSON by default, SSE wrapper for legacy consumers.
//!
//! The broker queue feeds the response body; the `Closed` sentinel ends the
//! stream. A dropped body closes the queue, and the broker's heartbeat sweep
//! prunes the dead connection.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use atelier::store;
use atelier::{CoreError, StreamItem};

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::current_user;

#[derive(Deserialize)]
pub struct EventsQuery {
    /// RFC3339 cut-off: only buffered events strictly newer are replayed.
    #[serde(default)]
    pub since: Option<String>,
    /// `ndjson` (default) or `sse`.
    #[serde(default)]
    pub format: Option<String>,
}

pub async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let user_id = current_user(&headers)?;

    state
        .db
        .with_tx(move |tx| store::get_owned_session(tx, session_id, user_id))
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;

    let since = match &query.since {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| CoreError::Validation(format!("bad since timestamp: {e}")))?,
        ),
        None => None,
    };
    let sse = query.format.as_deref() == Some("sse");

    let (_connection_id, receiver) = state.broker.register(session_id, user_id, since).await;

    let body_stream = ReceiverStream::new(receiver)
        .take_while(|item| futures::future::ready(!matches!(item, StreamItem::Closed)))
        .filter_map(move |item| {
            let encoded = match item {
                StreamItem::Event(event) => {
                    let framed = if sse { event.to_sse() } else { event.to_ndjson() };
                    match framed {
                        Ok(text) => Some(Ok::<_, std::convert::Infallible>(
                            axum::body::Bytes::from(text),
                        )),
                        Err(err) => {
                            tracing::error!(error = %err, "event encoding failed");
                            None
                        }
                    }
                }
                StreamItem::Closed => None,
            };
            futures::future::ready(encoded)
        });

    let content_type = if sse {
        "text/event-stream"
    } else {
        "application/x-ndjson"
    };
    let response = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .map_err(|e| CoreError::Internal(e.to_string()))?;
    Ok(response)
}
