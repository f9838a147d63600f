//! Capability router: picks the best agent for a message by keyword-derived
//! capability overlap. Pure over an in-memory agent list.

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use stream_event::{StreamEvent, StreamEventType};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{AgentRecord, AgentStatus};

/// Keyword sets per capability, English and Russian. Substring match over the
/// lowercased message.
static CAPABILITY_KEYWORDS: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            "debug",
            vec![
                "отладь", "баг", "ошибка", "debug", "error", "fix", "исправь",
                "почему не работает", "что не так", "trace", "stack",
            ],
        ),
        (
            "implement_feature",
            vec![
                "напиши", "создай", "реализуй", "implement", "write", "code", "функция",
                "метод", "class", "модуль", "generate",
            ],
        ),
        (
            "explain",
            vec![
                "объясни", "что такое", "как работает", "explain", "describe", "расскажи",
                "help me understand", "tell me",
            ],
        ),
        (
            "design",
            vec![
                "дизайн", "архитектура", "план", "design", "architecture", "structure",
                "как лучше", "предложи решение",
            ],
        ),
        (
            "test",
            vec![
                "тест", "test", "unit test", "integration test", "проверь", "валидируй",
                "validate",
            ],
        ),
    ]
});

/// Score below which a match is pure fallback bias.
const FALLBACK_SCORE: f64 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Full routing decision record, kept for observability.
#[derive(Clone, Debug, Serialize)]
pub struct RoutingDecision {
    pub selected_agent_id: Uuid,
    pub agent_name: String,
    pub agent_role: String,
    pub routing_score: f64,
    pub required_capabilities: Vec<String>,
    pub matched_capabilities: Vec<String>,
    pub confidence: Confidence,
}

/// Capabilities the message calls for; defaults to `explain` when no keyword
/// matches.
pub fn required_capabilities(message: &str) -> Vec<String> {
    let lowered = message.to_lowercase();
    let mut found: Vec<String> = CAPABILITY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(capability, _)| capability.to_string())
        .collect();
    if found.is_empty() {
        found.push("explain".to_string());
    }
    found.sort();
    found
}

/// Overlap score `|required ∩ available| / |required|` with the fallback
/// floor when nothing intersects.
fn score(required: &[String], available: &[String]) -> (f64, Vec<String>) {
    if required.is_empty() {
        return (1.0, Vec::new());
    }
    let matched: Vec<String> = required
        .iter()
        .filter(|cap| available.contains(cap))
        .cloned()
        .collect();
    if matched.is_empty() {
        (FALLBACK_SCORE, matched)
    } else {
        (matched.len() as f64 / required.len() as f64, matched)
    }
}

fn confidence(score: f64) -> Confidence {
    if score >= 0.8 {
        Confidence::High
    } else if score >= 0.5 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Picks the ready agent with the highest capability overlap.
pub fn route(message: &str, agents: &[AgentRecord]) -> Result<RoutingDecision, CoreError> {
    let required = required_capabilities(message);

    let mut best: Option<(&AgentRecord, f64, Vec<String>)> = None;
    for agent in agents.iter().filter(|a| a.status == AgentStatus::Ready) {
        let (agent_score, matched) = score(&required, &agent.config.capabilities);
        if best.as_ref().map_or(true, |(_, s, _)| agent_score > *s) {
            best = Some((agent, agent_score, matched));
        }
    }

    let (agent, routing_score, matched) = best.ok_or_else(|| {
        CoreError::Validation("no ready agents available for routing".to_string())
    })?;
    let routing_score = (routing_score * 1000.0).round() / 1000.0;

    Ok(RoutingDecision {
        selected_agent_id: agent.id,
        agent_name: agent.name.clone(),
        agent_role: agent.config.role.as_str().to_string(),
        routing_score,
        required_capabilities: required,
        matched_capabilities: matched,
        confidence: confidence(routing_score),
    })
}

/// Event announcing that routing picked a different agent than the session
/// used before.
pub fn agent_switched_event(session_id: Uuid, decision: &RoutingDecision) -> StreamEvent {
    let match_percentage = if decision.required_capabilities.is_empty() {
        0.0
    } else {
        (decision.matched_capabilities.len() as f64 / decision.required_capabilities.len() as f64
            * 1000.0)
            .round()
            / 10.0
    };
    StreamEvent::new(
        StreamEventType::AgentSwitched,
        json!({
            "selected_agent_id": decision.selected_agent_id.to_string(),
            "agent_name": decision.agent_name,
            "agent_role": decision.agent_role,
            "routing_score": decision.routing_score,
            "confidence": decision.confidence,
            "required_capabilities": decision.required_capabilities,
            "matched_capabilities": decision.matched_capabilities,
            "match_percentage": match_percentage,
        }),
    )
    .with_session(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, AgentRole};
    use chrono::Utc;

    fn agent(name: &str, role: AgentRole, capabilities: &[&str]) -> AgentRecord {
        AgentRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: name.to_string(),
            config: AgentConfig {
                name: name.to_string(),
                system_prompt: "prompt".to_string(),
                model: "m".to_string(),
                role,
                capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
                temperature: 0.7,
                max_tokens: 256,
                concurrency_limit: 3,
                metadata: json!({}),
            },
            status: AgentStatus::Ready,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn keywords_drive_required_capabilities() {
        assert_eq!(required_capabilities("debug the error in auth"), vec!["debug"]);
        assert_eq!(
            required_capabilities("write code and add a test"),
            vec!["implement_feature", "test"]
        );
        // Russian keywords count too.
        assert_eq!(required_capabilities("исправь баг"), vec!["debug"]);
    }

    #[test]
    fn no_keyword_defaults_to_explain() {
        assert_eq!(required_capabilities("zzz qqq"), vec!["explain"]);
    }

    #[test]
    fn full_overlap_is_high_confidence() {
        let agents = [
            agent("coder", AgentRole::Code, &["implement_feature", "test"]),
            agent("asker", AgentRole::Ask, &["explain"]),
        ];
        let decision = route("write code for the parser and a test", &agents).unwrap();
        assert_eq!(decision.agent_name, "coder");
        assert_eq!(decision.routing_score, 1.0);
        assert_eq!(decision.confidence, Confidence::High);
    }

    #[test]
    fn no_overlap_falls_back_with_low_confidence() {
        let agents = [agent("asker", AgentRole::Ask, &["explain"])];
        let decision = route("debug the stack trace", &agents).unwrap();
        assert_eq!(decision.routing_score, FALLBACK_SCORE);
        assert_eq!(decision.confidence, Confidence::Low);
        assert!(decision.matched_capabilities.is_empty());
    }

    #[test]
    fn busy_agents_are_skipped() {
        let mut busy = agent("coder", AgentRole::Code, &["implement_feature"]);
        busy.status = AgentStatus::Busy;
        let err = route("write code", &[busy]).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn switched_event_carries_decision() {
        let agents = [agent("coder", AgentRole::Code, &["implement_feature"])];
        let decision = route("write code", &agents).unwrap();
        let session = Uuid::new_v4();
        let event = agent_switched_event(session, &decision);
        assert_eq!(event.event_type, StreamEventType::AgentSwitched);
        assert_eq!(event.session_id, Some(session));
        assert_eq!(event.payload["agent_name"], "coder");
        assert_eq!(event.payload["match_percentage"], 100.0);
    }
}
