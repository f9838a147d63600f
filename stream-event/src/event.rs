//! Event type vocabulary and the `StreamEvent` envelope.
//!
//! `event_type` strings on the wire are snake_case and match the outbox
//! `event_type` column, so a pending outbox row can be turned into a wire
//! event without a mapping table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed set of event types a client can receive on the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    MessageCreated,
    AgentSwitched,
    DirectAgentCall,
    AgentStatusChanged,
    TaskPlanCreated,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    ToolRequest,
    PlanRequest,
    ContextRetrieved,
    ApprovalRequired,
    ApprovalResolved,
    ApprovalTimeout,
    ApprovalTimeoutWarning,
    Heartbeat,
    Error,
}

impl StreamEventType {
    /// Wire name of this event type (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreated => "message_created",
            Self::AgentSwitched => "agent_switched",
            Self::DirectAgentCall => "direct_agent_call",
            Self::AgentStatusChanged => "agent_status_changed",
            Self::TaskPlanCreated => "task_plan_created",
            Self::TaskStarted => "task_started",
            Self::TaskProgress => "task_progress",
            Self::TaskCompleted => "task_completed",
            Self::ToolRequest => "tool_request",
            Self::PlanRequest => "plan_request",
            Self::ContextRetrieved => "context_retrieved",
            Self::ApprovalRequired => "approval_required",
            Self::ApprovalResolved => "approval_resolved",
            Self::ApprovalTimeout => "approval_timeout",
            Self::ApprovalTimeoutWarning => "approval_timeout_warning",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
        }
    }
}

/// Returned when an `event_type` string is outside the vocabulary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl std::fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown stream event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl std::str::FromStr for StreamEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message_created" => Ok(Self::MessageCreated),
            "agent_switched" => Ok(Self::AgentSwitched),
            "direct_agent_call" => Ok(Self::DirectAgentCall),
            "agent_status_changed" => Ok(Self::AgentStatusChanged),
            "task_plan_created" => Ok(Self::TaskPlanCreated),
            "task_started" => Ok(Self::TaskStarted),
            "task_progress" => Ok(Self::TaskProgress),
            "task_completed" => Ok(Self::TaskCompleted),
            "tool_request" => Ok(Self::ToolRequest),
            "plan_request" => Ok(Self::PlanRequest),
            "context_retrieved" => Ok(Self::ContextRetrieved),
            "approval_required" => Ok(Self::ApprovalRequired),
            "approval_resolved" => Ok(Self::ApprovalResolved),
            "approval_timeout" => Ok(Self::ApprovalTimeout),
            "approval_timeout_warning" => Ok(Self::ApprovalTimeoutWarning),
            "heartbeat" => Ok(Self::Heartbeat),
            "error" => Ok(Self::Error),
            other => Err(UnknownEventType(other.to_string())),
        }
    }
}

/// One stream event as delivered to a client.
///
/// The payload is an open JSON object; for outbox-published events it carries
/// `event_id` (the stable outbox primary key, the consumer deduplication key),
/// `aggregate_type` and `aggregate_id` alongside the domain fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: StreamEventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<Uuid>,
}

impl StreamEvent {
    /// Creates an event stamped with the current time and no session.
    pub fn new(event_type: StreamEventType, payload: Value) -> Self {
        Self {
            event_type,
            payload,
            timestamp: Utc::now(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// NDJSON encoding: the serialized object followed by a newline.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}\n", serde_json::to_string(self)?))
    }

    /// SSE wrapper for legacy consumers: `event: <type>\ndata: <json>\n\n`.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "event: {}\ndata: {}\n\n",
            self.event_type.as_str(),
            serde_json::to_string(self)?
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_round_trips_through_wire_name() {
        let all = [
            StreamEventType::MessageCreated,
            StreamEventType::AgentSwitched,
            StreamEventType::DirectAgentCall,
            StreamEventType::AgentStatusChanged,
            StreamEventType::TaskPlanCreated,
            StreamEventType::TaskStarted,
            StreamEventType::TaskProgress,
            StreamEventType::TaskCompleted,
            StreamEventType::ToolRequest,
            StreamEventType::PlanRequest,
            StreamEventType::ContextRetrieved,
            StreamEventType::ApprovalRequired,
            StreamEventType::ApprovalResolved,
            StreamEventType::ApprovalTimeout,
            StreamEventType::ApprovalTimeoutWarning,
            StreamEventType::Heartbeat,
            StreamEventType::Error,
        ];
        for ty in all {
            let parsed: StreamEventType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, ty);
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = "message_deleted".parse::<StreamEventType>().unwrap_err();
        assert_eq!(err.0, "message_deleted");
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let s = serde_json::to_string(&StreamEventType::ApprovalTimeoutWarning).unwrap();
        assert_eq!(s, "\"approval_timeout_warning\"");
    }

    #[test]
    fn ndjson_is_one_object_per_line() {
        let event = StreamEvent::new(
            StreamEventType::MessageCreated,
            json!({"message_id": "m1"}),
        );
        let line = event.to_ndjson().unwrap();
        assert!(line.ends_with('\n'));
        let parsed: StreamEvent = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed.event_type, StreamEventType::MessageCreated);
        assert_eq!(parsed.payload["message_id"], "m1");
    }

    #[test]
    fn sse_wrapper_carries_event_name_and_data() {
        let session = Uuid::new_v4();
        let event =
            StreamEvent::new(StreamEventType::Heartbeat, json!({})).with_session(session);
        let framed = event.to_sse().unwrap();
        assert!(framed.starts_with("event: heartbeat\ndata: "));
        assert!(framed.ends_with("\n\n"));
    }

    #[test]
    fn timestamp_serializes_as_rfc3339() {
        let event = StreamEvent::new(StreamEventType::Heartbeat, json!({}));
        let value = serde_json::to_value(&event).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
