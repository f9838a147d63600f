//! Shared helpers for integration tests: a seeded on-disk store and a
//! worker-space context wired with mocks.

use std::sync::Arc;

use atelier::agent::{AgentConfig, AgentRole};
use atelier::context::{HashEmbedder, InMemoryVectorIndex};
use atelier::models::AgentRecord;
use atelier::store::{self, Database};
use atelier::{AgentBus, InMemoryCache, LlmClient, SpaceContext};
use serde_json::json;
use uuid::Uuid;

pub struct TestEnv {
    pub db: Database,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub agents: Vec<AgentRecord>,
    // Keeps the database file alive for the test's duration.
    _dir: tempfile::TempDir,
}

pub fn agent_config(name: &str, role: AgentRole, capabilities: &[&str]) -> AgentConfig {
    AgentConfig {
        name: name.to_string(),
        system_prompt: format!("You are {name}."),
        model: "test-model".to_string(),
        role,
        capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
        temperature: 0.7,
        max_tokens: 512,
        concurrency_limit: 3,
        metadata: json!({}),
    }
}

/// Opens a fresh database and seeds one user, one project, and the given
/// agents.
pub async fn seeded_env(agents: &[AgentConfig]) -> TestEnv {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::open(dir.path().join("test.db")).expect("open db");

    let configs = agents.to_vec();
    let (user_id, project_id, agents) = db
        .with_tx(move |tx| {
            let user = store::insert_user(tx, "tester@example.com")?;
            let project = store::insert_project(tx, user.id, "proj", "/tmp/proj")?;
            let mut records = Vec::new();
            for config in &configs {
                records.push(store::insert_agent(tx, user.id, project.id, config)?);
            }
            Ok((user.id, project.id, records))
        })
        .await
        .expect("seed");

    TestEnv {
        db,
        user_id,
        project_id,
        agents,
        _dir: dir,
    }
}

/// Worker-space context over the test database with an in-memory vector
/// index, hash embedder, and the given LLM.
pub fn space_context(db: &Database, llm: Arc<dyn LlmClient>) -> SpaceContext {
    SpaceContext {
        db: db.clone(),
        cache: Arc::new(InMemoryCache::new()),
        index: Some(Arc::new(InMemoryVectorIndex::new())),
        embedder: Arc::new(HashEmbedder::new(16)),
        llm,
        bus: Arc::new(AgentBus::new(100)),
        context_search_limit: 5,
    }
}
