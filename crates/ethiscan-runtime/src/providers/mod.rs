//! Model backends behind the [`Oracle`](crate::oracle::Oracle).
//!
//! [`LlmProvider`] is the single seam: the hosted Anthropic and
//! OpenAI-compatible clients sit behind the `anthropic` and `openai`
//! features, and tests plug in scripted providers. API keys are resolved
//! through [`KeySpec`] and never printed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(any(feature = "anthropic", feature = "openai"))]
mod http;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource, KeySpec};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory, ANTHROPIC_API_KEY_ENV};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory, OPENAI_API_KEY_ENV};

/// Failure of a single completion call.
///
/// The [`Oracle`](crate::oracle::Oracle) retries only the variants for
/// which [`is_transient`](Self::is_transient) holds.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request to model API failed: {0}")]
    HttpError(String),

    #[error("model API rate limit hit (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("model API returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("unreadable model API response: {0}")]
    ParseError(String),

    #[error("model API rejected the credentials")]
    AuthError,

    #[error("no model API response within {0:?}")]
    Timeout(Duration),

    #[error("provider misconfigured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ApiError { status, .. } => *status >= 500,
            Self::HttpError(_) | Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::ParseError(_) | Self::AuthError | Self::NotConfigured(_) => false,
        }
    }
}

/// Model parameters for one call, derived from the `oracle` config section.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-attempt deadline; the Oracle applies it again around retries
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2000,
            temperature: 0.2,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a prompt. Analysis prompts are a system turn with the
/// expert persona followed by a single user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Raw answer text, possibly wrapped in a code fence
    pub content: String,
    pub usage: TokenUsage,
    /// Model that actually served the call
    pub model: String,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A chat-completion backend.
///
/// Only the [`Oracle`](crate::oracle::Oracle) calls this; analysis tasks
/// never hold a provider directly.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Cheap local check that the provider can be called at all.
    async fn health_check(&self) -> bool;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let message = ChatMessage::system("당신은 AI 윤리 전문가입니다.");
        assert!(message.is_system());
        assert!(!ChatMessage::user("평가해주세요.").is_system());

        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "user", "content": "hi" }));
    }

    #[test]
    fn test_only_transport_and_server_errors_are_retried() {
        let server = |status| ProviderError::ApiError {
            status,
            message: String::new(),
        };

        assert!(server(503).is_transient());
        assert!(!server(400).is_transient());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(!ProviderError::AuthError.is_transient());
        assert!(!ProviderError::ParseError("x".to_string()).is_transient());
    }

    #[test]
    fn test_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }
}
