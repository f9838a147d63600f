//! Application state and router assembly.
//!
//! Singletons (bus, broker, publisher, worker-space manager) are constructed
//! once here and injected into handlers through [`AppState`]; there is no
//! ambient global state.

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use axum::routing::{delete, get, post};
use axum::Router;
use config::Settings;

use atelier::approval::ApprovalManager;
use atelier::broker::{BrokerConfig, StreamBroker};
use atelier::context::{Embedder, HashEmbedder, InMemoryVectorIndex, OpenAIEmbedder, VectorIndex};
use atelier::llm::LlmClient;
use atelier::{
    AgentBus, ChatOpenAI, Database, InMemoryCache, OutboxPublisher, SpaceContext,
    WorkerSpaceManager,
};

use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub broker: Arc<StreamBroker>,
    pub publisher: Arc<OutboxPublisher>,
    pub manager: Arc<WorkerSpaceManager>,
    pub approvals: Arc<ApprovalManager>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Wires the full production state from settings: SQLite store, in-memory
    /// cache and vector index, OpenAI-compatible chat + embeddings.
    pub fn from_settings(settings: Settings) -> Result<Self, atelier::store::StoreError> {
        let mut openai = OpenAIConfig::new().with_api_key(settings.openai_api_key.clone());
        if let Some(base) = &settings.openai_base_url {
            openai = openai.with_api_base(base.clone());
        }
        let llm: Arc<dyn LlmClient> = Arc::new(ChatOpenAI::with_config(openai.clone()));
        let embedder: Arc<dyn Embedder> = if settings.openai_api_key.is_empty() {
            // No credentials: deterministic digest vectors keep the context
            // store functional in dev.
            Arc::new(HashEmbedder::new(1536))
        } else {
            Arc::new(OpenAIEmbedder::with_config(
                openai,
                settings.openai_embedding_model.clone(),
            ))
        };
        let index: Option<Arc<dyn VectorIndex>> = Some(Arc::new(InMemoryVectorIndex::new()));

        let db = Database::open(&settings.database_path)?;
        Ok(Self::assemble(settings, db, llm, embedder, index))
    }

    /// Wires state from explicit parts. Tests inject mocks here.
    pub fn assemble(
        settings: Settings,
        db: Database,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
        index: Option<Arc<dyn VectorIndex>>,
    ) -> Self {
        let cache = Arc::new(InMemoryCache::new());
        let broker = Arc::new(StreamBroker::new(
            cache.clone(),
            BrokerConfig {
                buffer_size: settings.stream_event_buffer_size,
                buffer_ttl: Duration::from_secs(settings.stream_event_ttl),
                heartbeat_interval: Duration::from_secs(settings.stream_heartbeat_interval),
                ..BrokerConfig::default()
            },
        ));
        let publisher = Arc::new(OutboxPublisher::new(
            db.clone(),
            broker.clone(),
            settings.outbox.clone(),
        ));
        let approvals = Arc::new(ApprovalManager::new(
            db.clone(),
            broker.clone(),
            settings.approval_timeout,
        ));
        let bus = Arc::new(AgentBus::new(settings.agent_queue_size));
        let manager = Arc::new(WorkerSpaceManager::new(SpaceContext {
            db: db.clone(),
            cache,
            index,
            embedder,
            llm,
            bus,
            context_search_limit: settings.context_search_limit,
        }));

        Self {
            db,
            broker,
            publisher,
            manager,
            approvals,
            settings: Arc::new(settings),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::monitoring::health))
        .route("/api/stats", get(routes::monitoring::stats))
        .route("/api/projects", post(routes::projects::create_project))
        .route(
            "/api/projects/:project_id/agents",
            get(routes::agents::list_agents).post(routes::agents::create_agent),
        )
        .route(
            "/api/projects/:project_id/agents/:agent_id",
            delete(routes::agents::delete_agent),
        )
        .route(
            "/api/chat/sessions",
            get(routes::sessions::list_sessions).post(routes::sessions::create_session),
        )
        .route(
            "/api/chat/sessions/:session_id",
            delete(routes::sessions::delete_session),
        )
        .route(
            "/api/chat/:session_id/messages",
            get(routes::sessions::list_messages),
        )
        .route(
            "/api/chat/:session_id/message",
            post(routes::messages::send_message),
        )
        .route("/api/chat/:session_id/events", get(routes::events::events))
        .route(
            "/api/chat/:session_id/plans",
            post(routes::plans::create_plan),
        )
        .route("/api/plans/:plan_id/execute", post(routes::plans::execute_plan))
        .route("/api/approvals", get(routes::approvals::list_pending))
        .route(
            "/api/approvals/:approval_id/confirm",
            post(routes::approvals::confirm),
        )
        .route(
            "/api/approvals/:approval_id/reject",
            post(routes::approvals::reject),
        )
        .with_state(state)
}
