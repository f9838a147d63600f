//! Approval gate: `pending → {approved, rejected, timeout}` with a
//! data-driven timer.
//!
//! There is no background sweep: any call that loads an approval first checks
//! `created_at + timeout_seconds` and applies the timeout transition if due.
//! All transitions go through the store's status-guarded update, so only the
//! first non-pending write ever lands; every decision happens inside one
//! transaction and broadcasts fire after commit.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use stream_event::{StreamEvent, StreamEventType};
use uuid::Uuid;

use crate::broker::StreamBroker;
use crate::error::CoreError;
use crate::models::{ApprovalKind, ApprovalRecord, ApprovalStatus, PlanStatus, TaskPlanRecord};
use crate::risk::{self, RiskLevel};
use crate::store::{self, Database};

/// Seconds before expiry at which a warning event is emitted. Firing more
/// than once is fine; consumers deduplicate.
const WARNING_THRESHOLD_SECONDS: i64 = 60;

pub struct ApprovalManager {
    db: Database,
    broker: Arc<StreamBroker>,
    default_timeout_seconds: u64,
}

enum ResolveTx {
    NotFound,
    AlreadyResolved,
    /// Already in the timeout state before this call; no broadcast due.
    Gone,
    TimedOut(ApprovalRecord),
    Resolved(ApprovalRecord),
}

enum TimeoutTx {
    NotFound,
    NotPending,
    TimedOut(ApprovalRecord),
    Warning(ApprovalRecord, i64),
    Live,
}

impl ApprovalManager {
    pub fn new(db: Database, broker: Arc<StreamBroker>, default_timeout_seconds: u64) -> Self {
        Self {
            db,
            broker,
            default_timeout_seconds,
        }
    }

    /// Requests approval for a plan. LOW risk under the cost threshold is
    /// auto-approved in place; everything else goes pending and emits
    /// `approval_required`.
    pub async fn request_plan_approval(
        &self,
        plan: &TaskPlanRecord,
        task_count: usize,
        task_risks: &[RiskLevel],
        timeout_seconds: Option<u64>,
    ) -> Result<ApprovalRecord, CoreError> {
        let risk = risk::assess_plan(
            plan.total_estimated_cost,
            plan.total_estimated_duration,
            task_count,
            task_risks,
        );
        let timeout = timeout_seconds.unwrap_or_else(|| {
            let by_risk = risk::approval_timeout_seconds(risk);
            if by_risk == 0 {
                self.default_timeout_seconds
            } else {
                by_risk
            }
        });
        let auto = risk::auto_approve(risk, plan.total_estimated_cost);

        let mut payload = json!({
            "plan_id": plan.id.to_string(),
            "original_request": plan.original_request,
            "estimated_cost": plan.total_estimated_cost,
            "estimated_duration": plan.total_estimated_duration,
            "task_count": task_count,
            "risk_level": risk.as_str(),
            "auto_approved": auto,
        });
        if !auto {
            payload["timeout_seconds"] = json!(timeout);
        }

        self.insert_and_notify(plan.owner_id, ApprovalKind::Plan, payload, auto, timeout)
            .await
    }

    /// Requests approval for one tool invocation.
    pub async fn request_tool_approval(
        &self,
        owner_id: Uuid,
        tool_name: &str,
        tool_params: &Value,
        agent_id: Uuid,
        timeout_seconds: Option<u64>,
    ) -> Result<ApprovalRecord, CoreError> {
        let risk = risk::assess_tool(tool_name, tool_params);
        let timeout = timeout_seconds.unwrap_or_else(|| {
            let by_risk = risk::approval_timeout_seconds(risk);
            if by_risk == 0 {
                self.default_timeout_seconds
            } else {
                by_risk
            }
        });
        // Tool calls carry no cost estimate; only the risk level gates them.
        let auto = risk::auto_approve(risk, 0.0);

        let mut payload = json!({
            "tool_name": tool_name,
            "parameters": tool_params,
            "agent_id": agent_id.to_string(),
            "risk_level": risk.as_str(),
            "auto_approved": auto,
        });
        if !auto {
            payload["timeout_seconds"] = json!(timeout);
        }

        self.insert_and_notify(owner_id, ApprovalKind::Tool, payload, auto, timeout)
            .await
    }

    async fn insert_and_notify(
        &self,
        owner_id: Uuid,
        kind: ApprovalKind,
        payload: Value,
        auto: bool,
        timeout: u64,
    ) -> Result<ApprovalRecord, CoreError> {
        let (status, decision) = if auto {
            (ApprovalStatus::Approved, Some("auto"))
        } else {
            (ApprovalStatus::Pending, None)
        };
        let record = self
            .db
            .with_tx(move |tx| {
                store::insert_approval(tx, owner_id, kind, payload, status, decision)
            })
            .await?;

        tracing::info!(
            approval_id = %record.id,
            kind = kind.as_str(),
            status = record.status.as_str(),
            "approval request created"
        );

        if !auto {
            self.notify(
                owner_id,
                StreamEventType::ApprovalRequired,
                json!({
                    "approval_id": record.id.to_string(),
                    "kind": record.kind.as_str(),
                    "status": record.status.as_str(),
                    "payload": record.payload,
                    "timeout": timeout,
                }),
            )
            .await;
        }
        Ok(record)
    }

    /// User approves. `NOT_FOUND` / `ALREADY_RESOLVED` / `GONE` per state.
    /// Approving a plan approval releases the linked plan from
    /// `pending_approval`, in the same transaction.
    pub async fn confirm(&self, owner_id: Uuid, id: Uuid) -> Result<ApprovalRecord, CoreError> {
        let default_timeout = self.default_timeout_seconds;
        let outcome = self
            .db
            .with_tx(move |tx| {
                let outcome = resolve_in_tx(
                    tx,
                    owner_id,
                    id,
                    ApprovalStatus::Approved,
                    "Approved by user".to_string(),
                    default_timeout,
                )?;
                if let ResolveTx::Resolved(record) = &outcome {
                    if record.kind == ApprovalKind::Plan {
                        if let Some(plan_id) = linked_plan_id(record) {
                            if let Some(plan) = store::get_plan(tx, plan_id, owner_id)? {
                                if plan.status == PlanStatus::PendingApproval {
                                    store::set_plan_status(tx, plan_id, PlanStatus::Created)?;
                                }
                            }
                        }
                    }
                }
                Ok(outcome)
            })
            .await?;
        self.finish_resolution(owner_id, id, outcome, true).await
    }

    /// User rejects. Rejecting a plan approval also flips the linked plan to
    /// `rejected`, in the same transaction.
    pub async fn reject(
        &self,
        owner_id: Uuid,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<ApprovalRecord, CoreError> {
        let decision = reason.unwrap_or_else(|| "Rejected by user".to_string());
        let default_timeout = self.default_timeout_seconds;
        let outcome = self
            .db
            .with_tx(move |tx| {
                let outcome = resolve_in_tx(
                    tx,
                    owner_id,
                    id,
                    ApprovalStatus::Rejected,
                    decision,
                    default_timeout,
                )?;
                if let ResolveTx::Resolved(record) = &outcome {
                    if record.kind == ApprovalKind::Plan {
                        if let Some(plan_id) = linked_plan_id(record) {
                            store::set_plan_status(tx, plan_id, PlanStatus::Rejected)?;
                        }
                    }
                }
                Ok(outcome)
            })
            .await?;
        self.finish_resolution(owner_id, id, outcome, false).await
    }

    async fn finish_resolution(
        &self,
        owner_id: Uuid,
        id: Uuid,
        outcome: ResolveTx,
        approved: bool,
    ) -> Result<ApprovalRecord, CoreError> {
        match outcome {
            ResolveTx::NotFound => Err(CoreError::NotFound(format!("approval {id}"))),
            ResolveTx::AlreadyResolved => Err(CoreError::AlreadyResolved(id)),
            ResolveTx::Gone => Err(CoreError::Gone(id)),
            ResolveTx::TimedOut(record) => {
                self.notify_timeout(&record).await;
                Err(CoreError::Gone(id))
            }
            ResolveTx::Resolved(record) => {
                tracing::info!(
                    approval_id = %id,
                    kind = record.kind.as_str(),
                    approved,
                    "approval resolved"
                );
                self.notify(
                    owner_id,
                    StreamEventType::ApprovalResolved,
                    json!({
                        "approval_id": id.to_string(),
                        "kind": record.kind.as_str(),
                        "status": record.status.as_str(),
                        "approved": approved,
                        "decision": record.decision,
                        "resolved_at": record.resolved_at.map(|t| t.to_rfc3339()),
                    }),
                )
                .await;
                Ok(record)
            }
        }
    }

    /// Opportunistic timeout check. Applies the transition and broadcasts
    /// `approval_timeout` when expired; emits the warning inside the warning
    /// window. Returns true when the approval is (now) timed out.
    pub async fn check_timeout(&self, owner_id: Uuid, id: Uuid) -> Result<bool, CoreError> {
        let default_timeout = self.default_timeout_seconds;
        let outcome = self
            .db
            .with_tx(move |tx| {
                let Some(approval) = store::get_approval(tx, id, owner_id)? else {
                    return Ok(TimeoutTx::NotFound);
                };
                if approval.status != ApprovalStatus::Pending {
                    return Ok(TimeoutTx::NotPending);
                }
                let timeout = timeout_of(&approval, default_timeout);
                let elapsed = (Utc::now() - approval.created_at).num_seconds();
                if elapsed > timeout {
                    let decision = format!("Auto-rejected after {timeout}s timeout");
                    store::resolve_if_pending(
                        tx,
                        id,
                        ApprovalStatus::Timeout,
                        &decision,
                        Utc::now(),
                    )?;
                    let Some(record) = store::get_approval(tx, id, owner_id)? else {
                        return Ok(TimeoutTx::NotFound);
                    };
                    return Ok(TimeoutTx::TimedOut(record));
                }
                let remaining = timeout - elapsed;
                if remaining <= WARNING_THRESHOLD_SECONDS && remaining > 0 {
                    return Ok(TimeoutTx::Warning(approval, remaining));
                }
                Ok(TimeoutTx::Live)
            })
            .await?;

        match outcome {
            TimeoutTx::NotFound => Err(CoreError::NotFound(format!("approval {id}"))),
            TimeoutTx::NotPending | TimeoutTx::Live => Ok(false),
            TimeoutTx::TimedOut(record) => {
                tracing::warn!(approval_id = %id, "approval timed out");
                self.notify_timeout(&record).await;
                Ok(true)
            }
            TimeoutTx::Warning(record, remaining) => {
                self.notify(
                    record.owner_id,
                    StreamEventType::ApprovalTimeoutWarning,
                    json!({
                        "approval_id": record.id.to_string(),
                        "kind": record.kind.as_str(),
                        "remaining_seconds": remaining,
                        "message": format!("Approval request will time out in {remaining}s"),
                    }),
                )
                .await;
                Ok(false)
            }
        }
    }

    pub async fn list_pending(&self, owner_id: Uuid) -> Result<Vec<ApprovalRecord>, CoreError> {
        Ok(self
            .db
            .with_tx(move |tx| store::list_pending_approvals(tx, owner_id))
            .await?)
    }

    pub async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<ApprovalRecord, CoreError> {
        self.db
            .with_tx(move |tx| store::get_approval(tx, id, owner_id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("approval {id}")))
    }

    async fn notify_timeout(&self, record: &ApprovalRecord) {
        self.notify(
            record.owner_id,
            StreamEventType::ApprovalTimeout,
            json!({
                "approval_id": record.id.to_string(),
                "kind": record.kind.as_str(),
                "status": record.status.as_str(),
                "message": "Approval request timed out",
            }),
        )
        .await;
    }

    /// Notification failures are logged, never surfaced: the state machine
    /// has already committed.
    async fn notify(&self, owner_id: Uuid, event_type: StreamEventType, payload: Value) {
        let event = StreamEvent::new(event_type, payload);
        if let Err(err) = self.broker.broadcast_to_owner(owner_id, event, true).await {
            tracing::error!(owner_id = %owner_id, error = %err, "approval notification failed");
        }
    }
}

fn linked_plan_id(record: &ApprovalRecord) -> Option<Uuid> {
    record
        .payload
        .get("plan_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn timeout_of(approval: &ApprovalRecord, default_timeout: u64) -> i64 {
    approval
        .payload
        .get("timeout_seconds")
        .and_then(Value::as_u64)
        .unwrap_or(default_timeout) as i64
}

fn resolve_in_tx(
    tx: &rusqlite::Transaction<'_>,
    owner_id: Uuid,
    id: Uuid,
    status: ApprovalStatus,
    decision: String,
    default_timeout: u64,
) -> Result<ResolveTx, crate::store::StoreError> {
    let Some(approval) = store::get_approval(tx, id, owner_id)? else {
        return Ok(ResolveTx::NotFound);
    };
    match approval.status {
        ApprovalStatus::Pending => {}
        // Already expired: the caller gets GONE, not ALREADY_RESOLVED.
        ApprovalStatus::Timeout => return Ok(ResolveTx::Gone),
        _ => return Ok(ResolveTx::AlreadyResolved),
    }

    let timeout = timeout_of(&approval, default_timeout);
    let elapsed = (Utc::now() - approval.created_at).num_seconds();
    if elapsed > timeout {
        let timeout_decision = format!("Auto-rejected after {timeout}s timeout");
        store::resolve_if_pending(tx, id, ApprovalStatus::Timeout, &timeout_decision, Utc::now())?;
        let Some(record) = store::get_approval(tx, id, owner_id)? else {
            return Ok(ResolveTx::NotFound);
        };
        return Ok(ResolveTx::TimedOut(record));
    }

    if !store::resolve_if_pending(tx, id, status, &decision, Utc::now())? {
        return Ok(ResolveTx::AlreadyResolved);
    }
    let Some(record) = store::get_approval(tx, id, owner_id)? else {
        return Ok(ResolveTx::NotFound);
    };
    Ok(ResolveTx::Resolved(record))
}
