//! Message ingestion: the request path of the chat data flow.
//!
//! The user message and its `message_created` outbox row commit in one
//! transaction; the assistant message and its row in another. Handlers never
//! broadcast domain events directly — the publisher drains the outbox.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use atelier::agent::history_from_messages;
use atelier::models::{MessageRecord, MessageRole};
use atelier::outbox::repository;
use atelier::store;
use atelier::CoreError;

use crate::app::AppState;
use crate::error::ApiError;
use crate::identity::current_user;

const HISTORY_LIMIT: usize = 10;

#[derive(Deserialize)]
pub struct MessageRequest {
    pub content: String,
    #[serde(default)]
    pub target_agent: Option<String>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: MessageRecord,
    pub agent_name: String,
    pub context_used: usize,
    pub tokens_used: u32,
    pub execution_time_ms: u64,
}

pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user_id = current_user(&headers)?;
    if request.content.trim().is_empty() {
        return Err(ApiError(CoreError::Validation(
            "message content must not be empty".to_string(),
        )));
    }

    let session = state
        .db
        .with_tx(move |tx| store::get_owned_session(tx, session_id, user_id))
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;

    let workspace = state
        .manager
        .get_or_create(session.owner_id, session.project_id)
        .await?;

    // Resolve the optional target agent by name before any write.
    let target_agent_id = match &request.target_agent {
        Some(name) => Some(
            workspace
                .find_agent_by_name(name)
                .await
                .ok_or_else(|| CoreError::NotFound(format!("agent '{name}'")))?
                .id,
        ),
        None => None,
    };

    // History plus the agent that answered last, for switch detection.
    let history_rows = state
        .db
        .with_tx(move |tx| store::recent_history(tx, session_id, HISTORY_LIMIT))
        .await?;
    let previous_agent = history_rows
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::Assistant)
        .and_then(|m| m.agent_id);
    let history = history_from_messages(&history_rows);

    // User message + outbox row, atomically.
    let content = request.content.clone();
    let (project_id, owner_id) = (session.project_id, session.owner_id);
    state
        .db
        .with_tx(move |tx| {
            let message =
                store::insert_message(tx, session_id, MessageRole::User, &content, None, None)?;
            repository::record_event(
                tx,
                "chat_message",
                message.id,
                owner_id,
                project_id,
                "message_created",
                json!({
                    "session_id": session_id.to_string(),
                    "message_id": message.id.to_string(),
                    "role": "user",
                    "content": message.content.clone(),
                }),
            )?;
            Ok(message)
        })
        .await?;

    let report = workspace
        .handle(&request.content, target_agent_id, &history, None, None)
        .await?;
    if !report.success {
        // The user message stays durable; the failure reaches the caller.
        return Err(ApiError(CoreError::Upstream(format!(
            "agent execution failed: {}",
            report.response
        ))));
    }

    // Assistant message + outbox row (+ agent_switched when routing moved),
    // atomically.
    let response_text = report.response.clone();
    let agent_id = report.agent_id;
    let routing = report.routing.clone();
    let assistant = state
        .db
        .with_tx(move |tx| {
            let message = store::insert_message(
                tx,
                session_id,
                MessageRole::Assistant,
                &response_text,
                Some(agent_id),
                None,
            )?;
            repository::record_event(
                tx,
                "chat_message",
                message.id,
                owner_id,
                project_id,
                "message_created",
                json!({
                    "session_id": session_id.to_string(),
                    "message_id": message.id.to_string(),
                    "role": "assistant",
                    "agent_id": agent_id.to_string(),
                    "content": message.content.clone(),
                }),
            )?;
            if let Some(decision) = routing {
                if previous_agent.is_some_and(|prev| prev != decision.selected_agent_id) {
                    repository::record_event(
                        tx,
                        "agent",
                        decision.selected_agent_id,
                        owner_id,
                        project_id,
                        "agent_switched",
                        json!({
                            "session_id": session_id.to_string(),
                            "agent_name": decision.agent_name,
                            "agent_role": decision.agent_role,
                            "routing_score": decision.routing_score,
                            "confidence": decision.confidence,
                            "required_capabilities": decision.required_capabilities,
                            "matched_capabilities": decision.matched_capabilities,
                        }),
                    )?;
                }
            }
            Ok(message)
        })
        .await?;

    tracing::info!(
        session_id = %session_id,
        agent_name = %report.agent_name,
        "message processed"
    );
    Ok(Json(MessageResponse {
        message: assistant,
        agent_name: report.agent_name,
        context_used: report.context_used,
        tokens_used: report.tokens_used,
        execution_time_ms: report.execution_time_ms,
    }))
}
