//! Worker space: the per-(user, project) concurrency container.
//!
//! Owns the agent instances for one project, their bus registrations, and
//! their context stores. Exactly one instance exists per live tuple; the
//! [`manager`] enforces that. All mutation of the local agent table runs
//! under the space's own lock; execution happens outside it on cloned `Arc`s.

pub mod manager;
pub mod starter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::{history_from_messages, AgentConfig, AgentRole, ContextualAgent};
use crate::bus::{AgentBus, TaskHandler, TaskItem};
use crate::cache::Cache;
use crate::context::{ContextStore, Embedder, VectorIndex};
use crate::error::CoreError;
use crate::llm::{ChatMessage, LlmClient};
use crate::models::{AgentRecord, AgentStatus, MessageRecord};
use crate::router::{self, RoutingDecision};
use crate::store::{self, Database};

/// Shared construction context for worker spaces: every process-wide handle a
/// space needs, injected explicitly (no ambient globals).
#[derive(Clone)]
pub struct SpaceContext {
    pub db: Database,
    pub cache: Arc<dyn Cache>,
    pub index: Option<Arc<dyn VectorIndex>>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn LlmClient>,
    pub bus: Arc<AgentBus>,
    pub context_search_limit: usize,
}

/// Outcome of one execution through a worker space.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub response: String,
    pub agent_id: Uuid,
    pub agent_name: String,
    pub context_used: usize,
    pub tokens_used: u32,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkspaceStats {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub initialized: bool,
    pub initialization_time: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
    pub active_agents: usize,
    pub agent_ids: Vec<Uuid>,
    pub is_healthy: bool,
}

struct AgentEntry {
    record: AgentRecord,
    instance: Arc<ContextualAgent>,
}

#[derive(Default)]
struct Inner {
    initialized: bool,
    initialized_at: Option<DateTime<Utc>>,
    agents: HashMap<Uuid, AgentEntry>,
}

/// Bridges a [`ContextualAgent`] onto the bus. The payload carries the
/// message and optional task id.
struct AgentTaskHandler {
    agent: Arc<ContextualAgent>,
}

#[async_trait]
impl TaskHandler for AgentTaskHandler {
    async fn handle(&self, item: &TaskItem) -> Result<Value, CoreError> {
        let message = item
            .payload
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Validation("task payload missing message".to_string()))?;
        let reply = self
            .agent
            .execute(message, &[], Some(item.task_id.as_str()))
            .await?;
        Ok(json!({
            "response": reply.response,
            "context_used": reply.context_used,
            "tokens_used": reply.tokens_used,
        }))
    }
}

const AGENT_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct WorkerSpace {
    pub user_id: Uuid,
    pub project_id: Uuid,
    ctx: SpaceContext,
    inner: Mutex<Inner>,
}

impl WorkerSpace {
    pub fn new(user_id: Uuid, project_id: Uuid, ctx: SpaceContext) -> Self {
        Self {
            user_id,
            project_id,
            ctx,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn agent_cache_key(agent_id: Uuid) -> String {
        format!("agent:{agent_id}")
    }

    /// Loads project agents and registers each with the bus. Single-flight
    /// under the instance lock; a second call is a no-op.
    pub async fn initialize(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if inner.initialized {
            tracing::info!(
                user_id = %self.user_id,
                project_id = %self.project_id,
                "worker space already initialized"
            );
            return Ok(());
        }

        let (owner, project) = (self.user_id, self.project_id);
        let records = self
            .ctx
            .db
            .with_tx(move |tx| store::list_project_agents(tx, owner, project))
            .await?;

        for record in records {
            self.register_locked(&mut inner, record).await;
        }

        inner.initialized = true;
        inner.initialized_at = Some(Utc::now());
        tracing::info!(
            user_id = %self.user_id,
            project_id = %self.project_id,
            agent_count = inner.agents.len(),
            "worker space initialized"
        );
        Ok(())
    }

    async fn ensure_initialized(&self) -> Result<(), CoreError> {
        let initialized = self.inner.lock().await.initialized;
        if !initialized {
            self.initialize().await?;
        }
        Ok(())
    }

    /// Builds the in-memory instance, registers it with the bus, and caches
    /// its config.
    async fn register_locked(&self, inner: &mut Inner, record: AgentRecord) {
        let context = ContextStore::new(
            self.ctx.index.clone(),
            self.ctx.embedder.clone(),
            self.user_id,
            &record.config.name,
        );
        let instance = Arc::new(ContextualAgent::new(
            record.id,
            self.user_id,
            record.config.clone(),
            self.ctx.llm.clone(),
            context,
            self.ctx.context_search_limit,
        ));

        self.ctx.bus.register(
            record.id,
            Arc::new(AgentTaskHandler {
                agent: instance.clone(),
            }),
            record.config.concurrency_limit,
        );

        if let Ok(config_json) = serde_json::to_string(&record.config) {
            if let Err(err) = self
                .ctx
                .cache
                .set(
                    &Self::agent_cache_key(record.id),
                    config_json,
                    Some(AGENT_CACHE_TTL),
                )
                .await
            {
                tracing::warn!(agent_id = %record.id, error = %err, "agent cache write failed");
            }
        }

        tracing::info!(
            agent_id = %record.id,
            agent_name = %record.name,
            project_id = %self.project_id,
            "agent registered in worker space"
        );
        inner.agents.insert(
            record.id,
            AgentEntry {
                record,
                instance,
            },
        );
    }

    pub async fn get_agent(&self, agent_id: Uuid) -> Option<Arc<ContextualAgent>> {
        if self.ensure_initialized().await.is_err() {
            return None;
        }
        self.inner
            .lock()
            .await
            .agents
            .get(&agent_id)
            .map(|e| e.instance.clone())
    }

    pub async fn agent_records(&self) -> Vec<AgentRecord> {
        self.inner
            .lock()
            .await
            .agents
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    pub async fn find_agent_by_name(&self, name: &str) -> Option<AgentRecord> {
        self.inner
            .lock()
            .await
            .agents
            .values()
            .find(|e| e.record.name == name)
            .map(|e| e.record.clone())
    }

    pub async fn first_ready_by_role(&self, role: AgentRole) -> Option<AgentRecord> {
        self.inner
            .lock()
            .await
            .agents
            .values()
            .find(|e| e.record.status == AgentStatus::Ready && e.record.config.role == role)
            .map(|e| e.record.clone())
    }

    /// Validates, persists, and registers a new agent.
    pub async fn add_agent(&self, config: AgentConfig) -> Result<AgentRecord, CoreError> {
        config.validate()?;
        self.ensure_initialized().await?;

        let (owner, project) = (self.user_id, self.project_id);
        let stored_config = config.clone();
        let record = self
            .ctx
            .db
            .with_tx(move |tx| store::insert_agent(tx, owner, project, &stored_config))
            .await?;

        let mut inner = self.inner.lock().await;
        self.register_locked(&mut inner, record.clone()).await;
        Ok(record)
    }

    /// Deregisters from the bus, invalidates caches, then deletes the row.
    pub async fn remove_agent(&self, agent_id: Uuid) -> Result<bool, CoreError> {
        self.ensure_initialized().await?;

        self.ctx.bus.deregister(agent_id);
        if let Err(err) = self.ctx.cache.delete(&Self::agent_cache_key(agent_id)).await {
            tracing::warn!(agent_id = %agent_id, error = %err, "agent cache invalidate failed");
        }
        self.inner.lock().await.agents.remove(&agent_id);

        let owner = self.user_id;
        let removed = self
            .ctx
            .db
            .with_tx(move |tx| store::delete_agent(tx, agent_id, owner))
            .await?;
        tracing::info!(agent_id = %agent_id, removed, "agent removed from worker space");
        Ok(removed)
    }

    /// Direct mode: the caller names the agent.
    pub async fn direct(
        &self,
        agent_id: Uuid,
        message: &str,
        history: &[ChatMessage],
        task_id: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<ExecutionReport, CoreError> {
        self.ensure_initialized().await?;
        let agent = self
            .get_agent(agent_id)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("agent {agent_id}")))?;

        if let Err(err) = agent
            .context_store()
            .add_interaction(
                &format!("[INPUT] {message}"),
                "direct_execution_input",
                task_id,
                true,
                metadata.clone(),
            )
            .await
        {
            tracing::warn!(agent_id = %agent_id, error = %err, "input context record failed");
        }

        let started = std::time::Instant::now();
        let result = agent.execute(message, history, task_id).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(reply) => {
                if let Err(err) = agent
                    .context_store()
                    .add_interaction(
                        &format!("[OUTPUT] {}", reply.response),
                        "direct_execution_output",
                        task_id,
                        true,
                        Some(json!({
                            "tokens": reply.tokens_used,
                            "execution_time_ms": execution_time_ms,
                        })),
                    )
                    .await
                {
                    tracing::warn!(agent_id = %agent_id, error = %err, "output context record failed");
                }
                tracing::info!(
                    agent_id = %agent_id,
                    execution_time_ms,
                    "direct execution completed"
                );
                Ok(ExecutionReport {
                    success: true,
                    response: reply.response,
                    agent_id,
                    agent_name: agent.config.name.clone(),
                    context_used: reply.context_used,
                    tokens_used: reply.tokens_used,
                    execution_time_ms,
                    timestamp: Utc::now(),
                    routing: None,
                })
            }
            // Upstream failures are captured into the report, not propagated:
            // a plan keeps running when one task's LLM call fails.
            Err(err @ (CoreError::Upstream(_) | CoreError::UpstreamTimeout(_))) => {
                tracing::error!(agent_id = %agent_id, error = %err, "direct execution failed");
                Ok(ExecutionReport {
                    success: false,
                    response: err.to_string(),
                    agent_id,
                    agent_name: agent.config.name.clone(),
                    context_used: 0,
                    tokens_used: 0,
                    execution_time_ms,
                    timestamp: Utc::now(),
                    routing: None,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Orchestrated mode: the router picks the agent; on routing failure the
    /// first ready agent serves as fallback.
    pub async fn orchestrated(
        &self,
        message: &str,
        history: &[ChatMessage],
        task_id: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<ExecutionReport, CoreError> {
        self.ensure_initialized().await?;
        let records = self.agent_records().await;
        if records.is_empty() {
            return Err(CoreError::Validation(
                "no agents available for orchestration".to_string(),
            ));
        }

        let (agent_id, routing) = match router::route(message, &records) {
            Ok(decision) => (decision.selected_agent_id, Some(decision)),
            Err(err) => {
                tracing::warn!(error = %err, "routing failed, using first ready agent");
                let fallback = records
                    .iter()
                    .find(|r| r.status == AgentStatus::Ready)
                    .or(records.first())
                    .map(|r| r.id)
                    .ok_or_else(|| {
                        CoreError::Validation("no agents available for orchestration".to_string())
                    })?;
                (fallback, None)
            }
        };

        let mut report = self
            .direct(agent_id, message, history, task_id, metadata)
            .await?;
        report.routing = routing;
        Ok(report)
    }

    /// Unified entry: direct when a target agent is given, orchestrated
    /// otherwise. Empty messages are rejected at this boundary.
    pub async fn handle(
        &self,
        message: &str,
        target_agent: Option<Uuid>,
        history: &[ChatMessage],
        task_id: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<ExecutionReport, CoreError> {
        if message.trim().is_empty() {
            return Err(CoreError::Validation("message must not be empty".to_string()));
        }
        match target_agent {
            Some(agent_id) => {
                self.direct(agent_id, message, history, task_id, metadata).await
            }
            None => self.orchestrated(message, history, task_id, metadata).await,
        }
    }

    /// Chat history for a session, ready to thread into `handle`.
    pub async fn session_history(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, CoreError> {
        let rows: Vec<MessageRecord> = self
            .ctx
            .db
            .with_tx(move |tx| store::recent_history(tx, session_id, limit))
            .await?;
        Ok(history_from_messages(&rows))
    }

    pub async fn stats(&self) -> WorkspaceStats {
        let inner = self.inner.lock().await;
        let uptime_seconds = inner
            .initialized_at
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        WorkspaceStats {
            user_id: self.user_id,
            project_id: self.project_id,
            initialized: inner.initialized,
            initialization_time: inner.initialized_at,
            uptime_seconds,
            active_agents: inner.agents.len(),
            agent_ids: inner.agents.keys().copied().collect(),
            is_healthy: inner.initialized && !inner.agents.is_empty(),
        }
    }

    pub async fn is_healthy(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.initialized && !inner.agents.is_empty()
    }

    /// Deregisters every agent from the bus and clears local state.
    pub async fn cleanup(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.initialized {
            return;
        }
        for agent_id in inner.agents.keys() {
            self.ctx.bus.deregister(*agent_id);
            if let Err(err) = self
                .ctx
                .cache
                .delete(&Self::agent_cache_key(*agent_id))
                .await
            {
                tracing::warn!(agent_id = %agent_id, error = %err, "agent cache invalidate failed");
            }
        }
        inner.agents.clear();
        inner.initialized = false;
        tracing::info!(
            user_id = %self.user_id,
            project_id = %self.project_id,
            "worker space cleaned up"
        );
    }

    pub async fn reset(&self) -> Result<(), CoreError> {
        self.cleanup().await;
        self.initialize().await
    }
}
