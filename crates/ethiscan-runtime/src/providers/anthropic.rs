//! Anthropic Messages API provider.

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

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const KEY: KeySpec = KeySpec::new("Anthropic API key", ANTHROPIC_API_KEY_ENV);
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicProvider {
    credential: ApiCredential,
    endpoint: Endpoint,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: KEY.explicit(api_key),
            endpoint: Endpoint::new(DEFAULT_BASE_URL),
        }
    }

    /// Provider from settings: `api_key` (or `ANTHROPIC_API_KEY`) and an
    /// optional `base_url`.
    pub fn from_config(settings: &JsonValue) -> Result<Self, ProviderError> {
        Ok(Self {
            credential: KEY.resolve(settings)?,
            endpoint: Endpoint::from_settings(settings, DEFAULT_BASE_URL)?,
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.endpoint = Endpoint::new(url);
        self
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatMessage>,
}

impl<'a> MessagesRequest<'a> {
    /// System messages become the top-level `system` field; the rest keep
    /// their order.
    fn new(messages: &'a [ChatMessage], config: &'a CompletionConfig) -> Self {
        let (system, turns): (Vec<&ChatMessage>, Vec<&ChatMessage>) =
            messages.iter().partition(|m| m.is_system());
        let system = (!system.is_empty()).then(|| {
            system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        });

        Self {
            model: &config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system,
            messages: turns,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl From<MessagesResponse> for CompletionResponse {
    fn from(body: MessagesResponse) -> Self {
        CompletionResponse {
            content: body.content.into_iter().filter_map(|block| block.text).collect(),
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
            },
            model: body.model,
            stop_reason: body.stop_reason,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = self
            .endpoint
            .post("messages", config.timeout)
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .json(&MessagesRequest::new(&messages, config));

        let body: MessagesResponse = http::send_json(request, config.timeout).await?;
        Ok(body.into())
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Builds [`AnthropicProvider`]s from `{ "api_key": ..., "base_url": ... }`.
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(AnthropicProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        KEY.resolve(config)?;
        http::validate_base_url(config)
    }

    fn description(&self) -> &'static str {
        "Anthropic Messages API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CredentialSource;
    use serde_json::json;

    #[test]
    fn test_request_lifts_system_prompt() {
        let messages = vec![
            ChatMessage::system("당신은 AI 윤리 전문가입니다."),
            ChatMessage::user("서비스를 평가해주세요."),
        ];
        let config = CompletionConfig::default();

        let body = serde_json::to_value(MessagesRequest::new(&messages, &config)).unwrap();
        assert_eq!(body["system"], "당신은 AI 윤리 전문가입니다.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 2000);
    }

    #[test]
    fn test_request_without_system_omits_field() {
        let messages = vec![ChatMessage::user("hi")];
        let config = CompletionConfig::default();
        let body = serde_json::to_value(MessagesRequest::new(&messages, &config)).unwrap();
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_response_joins_text_blocks() {
        let body: MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "```json\n"}, {"type": "text", "text": "{}\n```"}],
            "model": "claude-sonnet-4-5",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 40, "output_tokens": 8}
        }))
        .unwrap();

        let response = CompletionResponse::from(body);
        assert_eq!(response.content, "```json\n{}\n```");
        assert_eq!(response.usage.total(), 48);
    }

    #[test]
    fn test_key_redacted_and_settings_used() {
        let provider = AnthropicProvider::from_config(&json!({
            "api_key": "sk-ant-secret",
            "base_url": "https://gateway.example/v1/"
        }))
        .unwrap();

        assert!(!format!("{:?}", provider).contains("sk-ant-secret"));
        assert_eq!(provider.endpoint.base_url(), "https://gateway.example/v1");
        assert_eq!(provider.credential.source(), CredentialSource::Settings);
    }

    #[test]
    fn test_factory_rejects_bad_base_url() {
        let config = json!({"api_key": "k", "base_url": "gateway.example"});
        assert!(AnthropicProviderFactory.validate_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_health_check_requires_key() {
        assert!(AnthropicProvider::new("key").health_check().await);
        assert!(!AnthropicProvider::new("").health_check().await);
    }
}
