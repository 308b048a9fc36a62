//! OpenAI-compatible Chat Completions provider.
//!
//! Works with any endpoint implementing `/chat/completions`, selected via
//! `base_url`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::http::{self, Endpoint};
use super::secrets::{ApiCredential, KeySpec};
use super::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, ProviderFactory,
    TokenUsage,
};

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const KEY: KeySpec = KeySpec::new("OpenAI API key", OPENAI_API_KEY_ENV);
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug)]
pub struct OpenAiProvider {
    credential: ApiCredential,
    endpoint: Endpoint,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: KEY.explicit(api_key),
            endpoint: Endpoint::new(DEFAULT_BASE_URL),
        }
    }

    pub fn from_config(settings: &JsonValue) -> Result<Self, ProviderError> {
        Ok(Self {
            credential: KEY.resolve(settings)?,
            endpoint: Endpoint::from_settings(settings, DEFAULT_BASE_URL)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    model: String,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl TryFrom<ChatResponse> for CompletionResponse {
    type Error = ProviderError;

    fn try_from(body: ChatResponse) -> Result<Self, Self::Error> {
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: body
                .usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
            model: body.model,
            stop_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = self
            .endpoint
            .post("chat/completions", config.timeout)
            .bearer_auth(self.credential.expose())
            .json(&ChatRequest {
                model: &config.model,
                messages: &messages,
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            });

        let body: ChatResponse = http::send_json(request, config.timeout).await?;
        body.try_into()
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Builds [`OpenAiProvider`]s from `{ "api_key": ..., "base_url": ... }`.
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenAiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        KEY.resolve(config)?;
        http::validate_base_url(config)
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible chat completions"
    }
}
