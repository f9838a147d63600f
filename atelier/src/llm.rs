//! LLM client seam: trait, OpenAI-compatible implementation, and a mock.
//!
//! Agent execution depends on a callable that turns chat messages into
//! assistant text plus token usage; this module defines that trait. The real
//! client speaks any OpenAI-compatible endpoint via base URL.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::CoreError;
use crate::models::MessageRole;

/// One chat turn handed to the model.
#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call sampling knobs; filled from the agent's config.
#[derive(Clone, Debug)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ChatOutcome {
    pub content: String,
    pub tokens_used: u32,
}

/// Chat completion seam. `MockLlm` for tests, [`ChatOpenAI`] for real calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatOutcome, CoreError>;
}

/// Client for an OpenAI-compatible chat endpoint.
pub struct ChatOpenAI {
    config: OpenAIConfig,
}

impl ChatOpenAI {
    /// Key from `OPENAI_API_KEY`; default endpoint.
    pub fn new() -> Self {
        Self {
            config: OpenAIConfig::new(),
        }
    }

    /// Custom key / base URL, e.g. a LiteLLM proxy.
    pub fn with_config(config: OpenAIConfig) -> Self {
        Self { config }
    }
}

impl Default for ChatOpenAI {
    fn default() -> Self {
        Self::new()
    }
}

fn to_request_message(msg: &ChatMessage) -> Result<ChatCompletionRequestMessage, CoreError> {
    let message = match msg.role {
        MessageRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(msg.content.clone())
            .build()
            .map_err(|e| CoreError::Upstream(e.to_string()))?
            .into(),
        MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(msg.content.clone())
            .build()
            .map_err(|e| CoreError::Upstream(e.to_string()))?
            .into(),
        // Tool-internal turns are surfaced to the model as user content.
        MessageRole::User | MessageRole::ToolInternal => {
            ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(|e| CoreError::Upstream(e.to_string()))?
                .into()
        }
    };
    Ok(message)
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatOutcome, CoreError> {
        let request_messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(options.model.clone())
            .messages(request_messages)
            .temperature(options.temperature)
            .max_completion_tokens(options.max_tokens)
            .build()
            .map_err(|e| CoreError::Upstream(e.to_string()))?;

        let client = Client::with_config(self.config.clone());
        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| CoreError::Upstream(format!("chat completion: {e}")))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        let tokens_used = response.usage.map(|u| u.total_tokens).unwrap_or(0);

        Ok(ChatOutcome {
            content,
            tokens_used,
        })
    }
}

/// Scripted client for tests: replies in order, then repeats the last reply.
/// `failing()` builds one that always errors.
pub struct MockLlm {
    replies: Vec<String>,
    calls: Mutex<usize>,
    fail: bool,
}

impl MockLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            replies: vec![reply.into()],
            calls: Mutex::new(0),
            fail: false,
        }
    }

    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies,
            calls: Mutex::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            replies: Vec::new(),
            calls: Mutex::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().expect("mock lock")
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatOutcome, CoreError> {
        let mut calls = self.calls.lock().expect("mock lock");
        *calls += 1;
        if self.fail {
            return Err(CoreError::Upstream("mock llm failure".to_string()));
        }
        let idx = (*calls - 1).min(self.replies.len().saturating_sub(1));
        let content = self.replies.get(idx).cloned().unwrap_or_default();
        Ok(ChatOutcome {
            content,
            tokens_used: 7,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ChatOptions {
        ChatOptions {
            model: "test-model".to_string(),
            temperature: 0.7,
            max_tokens: 128,
        }
    }

    #[tokio::test]
    async fn mock_replies_in_order_then_repeats() {
        let llm = MockLlm::with_replies(vec!["a".into(), "b".into()]);
        assert_eq!(llm.chat(&[], &options()).await.unwrap().content, "a");
        assert_eq!(llm.chat(&[], &options()).await.unwrap().content, "b");
        assert_eq!(llm.chat(&[], &options()).await.unwrap().content, "b");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn failing_mock_errors() {
        let llm = MockLlm::failing();
        assert!(matches!(
            llm.chat(&[], &options()).await,
            Err(CoreError::Upstream(_))
        ));
    }
}
