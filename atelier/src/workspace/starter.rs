//! Starter pack: default agents seeded into a freshly created project.

use rusqlite::Transaction;
use serde_json::json;
use uuid::Uuid;

use crate::agent::{AgentConfig, AgentRole};
use crate::models::AgentRecord;
use crate::store::{self, StoreError};

/// The default agent set for a new project.
pub fn starter_agent_configs() -> Vec<AgentConfig> {
    vec![
        AgentConfig {
            name: "Coder".to_string(),
            system_prompt: "You are a coding assistant. Write clear, working code and \
                            explain the changes you make."
                .to_string(),
            model: "gpt-4.1".to_string(),
            role: AgentRole::Code,
            capabilities: vec!["implement_feature".to_string(), "test".to_string()],
            temperature: 0.7,
            max_tokens: 4096,
            concurrency_limit: 3,
            metadata: json!({"starter": true}),
        },
        AgentConfig {
            name: "Guide".to_string(),
            system_prompt: "You answer questions and explain concepts precisely, with \
                            examples where they help."
                .to_string(),
            model: "gpt-4.1".to_string(),
            role: AgentRole::Ask,
            capabilities: vec!["explain".to_string(), "design".to_string()],
            temperature: 0.8,
            max_tokens: 4096,
            concurrency_limit: 3,
            metadata: json!({"starter": true}),
        },
        AgentConfig {
            name: "Debugger".to_string(),
            system_prompt: "You investigate errors. Read the evidence, state the most \
                            likely cause, and propose a fix."
                .to_string(),
            model: "gpt-4.1".to_string(),
            role: AgentRole::Debug,
            capabilities: vec!["debug".to_string(), "test".to_string()],
            temperature: 0.3,
            max_tokens: 4096,
            concurrency_limit: 3,
            metadata: json!({"starter": true}),
        },
    ]
}

/// Inserts the starter agents inside the caller's transaction, so a project
/// and its default agents commit together.
pub fn seed_starter_agents(
    tx: &Transaction<'_>,
    owner_id: Uuid,
    project_id: Uuid,
) -> Result<Vec<AgentRecord>, StoreError> {
    starter_agent_configs()
        .iter()
        .map(|config| store::insert_agent(tx, owner_id, project_id, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_configs_are_valid_and_cover_core_roles() {
        let configs = starter_agent_configs();
        assert_eq!(configs.len(), 3);
        for config in &configs {
            config.validate().expect("starter config must validate");
        }
        let roles: Vec<AgentRole> = configs.iter().map(|c| c.role).collect();
        assert!(roles.contains(&AgentRole::Code));
        assert!(roles.contains(&AgentRole::Ask));
        assert!(roles.contains(&AgentRole::Debug));
    }
}
