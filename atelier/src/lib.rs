//! # Atelier
//!
//! Backend control-plane core for a multi-tenant, multi-agent assistant
//! platform. Chat requests scoped to (user, project) are dispatched to
//! LLM-backed agents; multi-step plans run as layered DAGs; dangerous tool
//! invocations wait behind user approval; every domain event is committed
//! durably beside its aggregate and streamed to clients asynchronously.
//!
//! ## Main modules
//!
//! - [`risk`]: pure risk classifier for tools and plans.
//! - [`graph`]: task-DAG validation (iterative-DFS cycle check) and Kahn
//!   layering.
//! - [`bus`]: per-agent bounded queue + consumer with a concurrency cap
//!   ([`AgentBus`]).
//! - [`context`]: embedder + vector-index seams and the per-(user, agent)
//!   [`ContextStore`].
//! - [`cache`]: key/value [`Cache`] seam with list-trim semantics;
//!   [`InMemoryCache`].
//! - [`outbox`]: transactional outbox write path and the background
//!   [`OutboxPublisher`].
//! - [`broker`]: [`StreamBroker`] fan-out with heartbeat and reconnection
//!   replay.
//! - [`approval`]: [`ApprovalManager`] state machine with data-driven
//!   timeouts.
//! - [`workspace`]: [`WorkerSpace`] per-(user, project) container and its
//!   singleton [`WorkerSpaceManager`].
//! - [`executor`]: [`PlanExecutor`] running DAG layers in parallel.
//! - [`router`]: capability-keyword agent routing.
//! - [`llm`] / [`agent`]: the [`LlmClient`] seam and the contextual agent.
//! - [`models`] / [`store`]: domain rows and the SQLite persistence layer.
//!
//! Singletons (bus, broker, publisher, manager) are constructed once at
//! process start and injected into handlers; nothing here reads ambient
//! global state.

pub mod agent;
pub mod approval;
pub mod broker;
pub mod bus;
pub mod cache;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod llm;
pub mod models;
pub mod outbox;
pub mod risk;
pub mod router;
pub mod store;
pub mod workspace;

pub use agent::{AgentConfig, AgentReply, AgentRole, ContextualAgent};
pub use approval::ApprovalManager;
pub use broker::{BrokerConfig, StreamBroker, StreamItem};
pub use bus::{AgentBus, SubmitHandle, TaskHandler, TaskItem, TaskOutcome};
pub use cache::{Cache, InMemoryCache};
pub use context::{ContextStore, Embedder, HashEmbedder, InMemoryVectorIndex, VectorIndex};
pub use error::CoreError;
pub use executor::{PlanExecutor, PlanRunResult, TaskRunResult};
pub use graph::{Edge, GraphError, PlanTaskSpec};
pub use llm::{ChatMessage, ChatOpenAI, ChatOptions, LlmClient, MockLlm};
pub use outbox::{OutboxMetrics, OutboxPublisher};
pub use risk::RiskLevel;
pub use router::RoutingDecision;
pub use store::Database;
pub use workspace::manager::WorkerSpaceManager;
pub use workspace::{ExecutionReport, SpaceContext, WorkerSpace};
