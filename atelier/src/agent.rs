//! Agent roles, configuration, and the contextual agent instance.
//!
//! An agent is a configured LLM persona: prompt + model + role + capability
//! tags + concurrency cap. [`ContextualAgent`] is the in-memory instance a
//! worker space holds: it retrieves relevant prior interactions, threads them
//! into the system prompt, calls the LLM, and records the exchange back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::{ContextStore, SearchFilter};
use crate::error::CoreError;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::models::MessageRole;

/// Agent role: drives routing defaults and the starter pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Architect,
    Code,
    Ask,
    Debug,
    #[default]
    Custom,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Architect => "architect",
            Self::Code => "code",
            Self::Ask => "ask",
            Self::Debug => "debug",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "orchestrator" => Some(Self::Orchestrator),
            "architect" => Some(Self::Architect),
            "code" => Some(Self::Code),
            "ask" => Some(Self::Ask),
            "debug" => Some(Self::Debug),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_concurrency_limit() -> usize {
    3
}

/// Persisted agent configuration (the polymorphic `config` column).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub system_prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default)]
    pub metadata: Value,
}

impl AgentConfig {
    /// Boundary validation; rejected configs never reach the store.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() || self.name.len() > 100 {
            return Err(CoreError::Validation(
                "agent name must be 1..=100 characters".to_string(),
            ));
        }
        if self.system_prompt.is_empty() {
            return Err(CoreError::Validation(
                "system prompt must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(CoreError::Validation(format!(
                "temperature {} outside 0.0..=2.0",
                self.temperature
            )));
        }
        if !(1..=10).contains(&self.concurrency_limit) {
            return Err(CoreError::Validation(format!(
                "concurrency_limit {} outside 1..=10",
                self.concurrency_limit
            )));
        }
        if !(1..=128_000).contains(&self.max_tokens) {
            return Err(CoreError::Validation(format!(
                "max_tokens {} outside 1..=128000",
                self.max_tokens
            )));
        }
        Ok(())
    }

    fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Result of one agent execution.
#[derive(Clone, Debug)]
pub struct AgentReply {
    pub response: String,
    pub context_used: usize,
    pub tokens_used: u32,
}

/// How many history turns are threaded into the prompt.
const HISTORY_WINDOW: usize = 10;

/// One live agent: config + LLM client + its context store.
pub struct ContextualAgent {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    context: ContextStore,
    search_limit: usize,
}

impl ContextualAgent {
    pub fn new(
        id: Uuid,
        owner_id: Uuid,
        config: AgentConfig,
        llm: Arc<dyn LlmClient>,
        context: ContextStore,
        search_limit: usize,
    ) -> Self {
        Self {
            id,
            owner_id,
            config,
            llm,
            context,
            search_limit,
        }
    }

    pub fn context_store(&self) -> &ContextStore {
        &self.context
    }

    /// Runs one turn: retrieve context, call the LLM, record the exchange.
    /// The failed exchange is recorded too, marked unsuccessful.
    pub async fn execute(
        &self,
        user_message: &str,
        history: &[ChatMessage],
        task_id: Option<&str>,
    ) -> Result<AgentReply, CoreError> {
        let filter = SearchFilter {
            success: Some(true),
            interaction_type: None,
        };
        let context_hits = self
            .context
            .search(user_message, self.search_limit, filter)
            .await
            .unwrap_or_default();

        let mut system_prompt = self.config.system_prompt.clone();
        if !context_hits.is_empty() {
            system_prompt.push_str("\n\n## Relevant context:\n");
            for (i, hit) in context_hits.iter().enumerate() {
                system_prompt.push_str(&format!("\n{}. {}\n", i + 1, hit.content));
            }
        }

        let mut messages = vec![ChatMessage::system(system_prompt)];
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        messages.extend(history[start..].iter().cloned());
        messages.push(ChatMessage::user(user_message));

        match self.llm.chat(&messages, &self.config.chat_options()).await {
            Ok(outcome) => {
                self.context
                    .add_interaction(
                        &format!("User: {user_message}\nAssistant: {}", outcome.content),
                        "chat",
                        task_id,
                        true,
                        Some(json!({
                            "model": self.config.model,
                            "tokens": outcome.tokens_used,
                        })),
                    )
                    .await?;
                tracing::info!(
                    agent_id = %self.id,
                    agent_name = %self.config.name,
                    context_used = context_hits.len(),
                    "agent executed"
                );
                Ok(AgentReply {
                    response: outcome.content,
                    context_used: context_hits.len(),
                    tokens_used: outcome.tokens_used,
                })
            }
            Err(err) => {
                tracing::error!(
                    agent_id = %self.id,
                    agent_name = %self.config.name,
                    error = %err,
                    "agent execution failed"
                );
                self.context
                    .add_interaction(
                        &format!("User: {user_message}\nError: {err}"),
                        "chat",
                        task_id,
                        false,
                        None,
                    )
                    .await?;
                Err(err)
            }
        }
    }
}

/// Builds chat history from persisted message rows, skipping non-dialogue
/// roles.
pub fn history_from_messages(messages: &[crate::models::MessageRecord]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .map(|m| ChatMessage {
            role: m.role,
            content: m.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{HashEmbedder, InMemoryVectorIndex};
    use crate::llm::MockLlm;

    fn config(name: &str) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            system_prompt: "You write code.".to_string(),
            model: default_model(),
            role: AgentRole::Code,
            capabilities: vec!["implement_feature".to_string()],
            temperature: 0.7,
            max_tokens: 512,
            concurrency_limit: 3,
            metadata: json!({}),
        }
    }

    fn agent_with(llm: Arc<dyn LlmClient>) -> ContextualAgent {
        let owner = Uuid::new_v4();
        let store = ContextStore::new(
            Some(Arc::new(InMemoryVectorIndex::new())),
            Arc::new(HashEmbedder::new(16)),
            owner,
            "coder",
        );
        ContextualAgent::new(Uuid::new_v4(), owner, config("coder"), llm, store, 5)
    }

    #[test]
    fn validate_rejects_bad_fields() {
        let mut c = config("coder");
        c.name = String::new();
        assert!(c.validate().is_err());

        let mut c = config("coder");
        c.temperature = 2.5;
        assert!(c.validate().is_err());

        let mut c = config("coder");
        c.concurrency_limit = 0;
        assert!(c.validate().is_err());

        assert!(config("coder").validate().is_ok());
    }

    #[test]
    fn role_round_trips() {
        for role in [
            AgentRole::Orchestrator,
            AgentRole::Architect,
            AgentRole::Code,
            AgentRole::Ask,
            AgentRole::Debug,
            AgentRole::Custom,
        ] {
            assert_eq!(AgentRole::parse(role.as_str()), Some(role));
        }
    }

    #[tokio::test]
    async fn execute_records_interaction_and_returns_reply() {
        let agent = agent_with(Arc::new(MockLlm::new("done")));
        let reply = agent.execute("write a parser", &[], Some("t0")).await.unwrap();
        assert_eq!(reply.response, "done");

        // The successful exchange is now retrievable context.
        let hits = agent
            .context_store()
            .search("write a parser", 5, SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("Assistant: done"));
    }

    #[tokio::test]
    async fn failed_execution_is_recorded_unsuccessful() {
        let agent = agent_with(Arc::new(MockLlm::failing()));
        assert!(agent.execute("anything", &[], None).await.is_err());

        let filter = SearchFilter {
            success: Some(false),
            interaction_type: None,
        };
        let hits = agent
            .context_store()
            .search("anything", 5, filter)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("Error:"));
    }
}
