//! Domain rows and their status vocabularies.
//!
//! Every enum stores as its snake_case wire name; `as_str` / `parse` pairs are
//! the single source of truth for both the SQLite columns and JSON payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::AgentConfig;

macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum! {
    /// Message author role. Only user/assistant/system are client-visible;
    /// `tool_internal` rows never leave the API.
    MessageRole {
        User => "user",
        Assistant => "assistant",
        System => "system",
        ToolInternal => "tool_internal",
    }
}

impl MessageRole {
    pub fn is_visible(&self) -> bool {
        !matches!(self, MessageRole::ToolInternal)
    }
}

str_enum! {
    AgentStatus {
        Ready => "ready",
        Busy => "busy",
        Error => "error",
    }
}

str_enum! {
    PlanStatus {
        Created => "created",
        PendingApproval => "pending_approval",
        Executing => "executing",
        Completed => "completed",
        Failed => "failed",
        Rejected => "rejected",
        PartialSuccess => "partial_success",
    }
}

str_enum! {
    TaskStatus {
        Pending => "pending",
        Executing => "executing",
        Completed => "completed",
        Failed => "failed",
        Aborted => "aborted",
    }
}

str_enum! {
    ApprovalStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Timeout => "timeout",
    }
}

str_enum! {
    ApprovalKind {
        Tool => "tool",
        Plan => "plan",
    }
}

str_enum! {
    OutboxStatus {
        Pending => "pending",
        Published => "published",
        Failed => "failed",
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub workspace_path: String,
    pub created_at: DateTime<Utc>,
}

/// A configured agent row. `(owner_id, project_id, name)` is unique.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub config: AgentConfig,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub project_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub agent_id: Option<Uuid>,
    /// Structured payload for non-text messages (tool traces etc.).
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskPlanRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub project_id: Uuid,
    pub session_id: Uuid,
    pub original_request: String,
    pub status: PlanStatus,
    pub total_estimated_cost: f64,
    pub total_estimated_duration: f64,
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One task inside a plan. `logical_id` ("t0", "t1", ...) is the id the DAG
/// edges refer to; `depends_on` must stay within the same plan and acyclic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanTaskRecord {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub logical_id: String,
    pub description: String,
    pub assigned_agent: Option<String>,
    pub depends_on: Vec<String>,
    pub estimated_cost: f64,
    pub estimated_duration: f64,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: ApprovalKind,
    pub payload: Value,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub decision: Option<String>,
}

/// One durable outbox row. `id` is stable for the lifetime of the event and
/// doubles as the consumer deduplication key on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub owner_id: Uuid,
    pub project_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_enums_round_trip() {
        for s in [
            PlanStatus::Created,
            PlanStatus::PendingApproval,
            PlanStatus::Executing,
            PlanStatus::Completed,
            PlanStatus::Failed,
            PlanStatus::Rejected,
            PlanStatus::PartialSuccess,
        ] {
            assert_eq!(PlanStatus::parse(s.as_str()), Some(s));
        }
        for s in [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Timeout,
        ] {
            assert_eq!(ApprovalStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OutboxStatus::parse("published"), Some(OutboxStatus::Published));
        assert_eq!(OutboxStatus::parse("gone"), None);
    }

    #[test]
    fn tool_internal_messages_are_not_visible() {
        assert!(MessageRole::User.is_visible());
        assert!(MessageRole::Assistant.is_visible());
        assert!(MessageRole::System.is_visible());
        assert!(!MessageRole::ToolInternal.is_visible());
    }

    #[test]
    fn serde_names_match_as_str() {
        let v = serde_json::to_string(&PlanStatus::PendingApproval).unwrap();
        assert_eq!(v, "\"pending_approval\"");
        let v = serde_json::to_string(&MessageRole::ToolInternal).unwrap();
        assert_eq!(v, "\"tool_internal\"");
    }
}
