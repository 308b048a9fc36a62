//! Runtime configuration.
//!
//! Loaded from YAML by the CLI. Every field has a default, so an empty file
//! (or no file) is a valid configuration. Durations use humantime syntax
//! (`60s`, `2m`, `500ms`).

use ethiscan_core::RetrieverConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::providers::CompletionConfig;
use crate::resilience::RetryPolicy;

/// Default ethics guideline applied by the risk assessment.
pub const DEFAULT_GUIDELINE: &str = "OECD AI 가이드라인";

/// Invalid configuration values.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Visits to the join barrier before the run is declared failed
    pub max_join_attempts: u32,

    /// Wall-clock wait per barrier visit
    #[serde(with = "humantime_duration")]
    pub join_wait: Duration,

    /// Passages retrieved per query
    pub retrieval_k: usize,

    pub guideline: String,

    /// Where reports are written; `None` disables persistence
    pub report_dir: Option<PathBuf>,

    pub oracle: OracleConfig,
    pub provider: ProviderConfig,
    pub retriever: RetrieverConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_join_attempts: 5,
            join_wait: Duration::from_secs(60),
            retrieval_k: 3,
            guideline: DEFAULT_GUIDELINE.to_string(),
            report_dir: Some(PathBuf::from("./outputs")),
            oracle: OracleConfig::default(),
            provider: ProviderConfig::default(),
            retriever: RetrieverConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_join_attempts == 0 {
            return Err(ConfigError::invalid("max_join_attempts", "must be at least 1"));
        }
        if self.join_wait.is_zero() {
            return Err(ConfigError::invalid("join_wait", "must be positive"));
        }
        if self.retrieval_k == 0 {
            return Err(ConfigError::invalid("retrieval_k", "must be at least 1"));
        }
        if self.guideline.trim().is_empty() {
            return Err(ConfigError::invalid("guideline", "must not be empty"));
        }

        self.oracle.validate()?;
        validate_retriever(&self.retriever)
    }
}

/// Oracle call settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    /// Per-request timeout
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,

    /// Attempts per question, including the first
    pub max_attempts: u32,

    /// Response cache size; 0 disables the cache
    pub cache_capacity: u64,

    #[serde(with = "humantime_duration")]
    pub cache_ttl: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let completion = CompletionConfig::default();
        Self {
            model: completion.model,
            temperature: completion.temperature,
            max_tokens: completion.max_tokens,
            timeout: completion.timeout,
            max_attempts: 2,
            cache_capacity: 1_000,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl OracleConfig {
    pub fn completion(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid("oracle.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::invalid(
                "oracle.temperature",
                format!("{} is outside 0.0..=2.0", self.temperature),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid("oracle.max_tokens", "must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("oracle.timeout", "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("oracle.max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

/// Which provider to use and its JSON settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: String,

    /// Passed to the provider factory (`api_key`, `base_url`, ...)
    pub settings: JsonValue,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "openai".to_string(),
            settings: JsonValue::Object(Default::default()),
        }
    }
}

fn validate_retriever(config: &RetrieverConfig) -> Result<(), ConfigError> {
    if config.lexical_chunk_size == 0 || config.semantic_chunk_size == 0 {
        return Err(ConfigError::invalid("retriever", "chunk sizes must be positive"));
    }
    if config.lexical_chunk_overlap >= config.lexical_chunk_size {
        return Err(ConfigError::invalid(
            "retriever.lexical_chunk_overlap",
            "must be smaller than the chunk size",
        ));
    }
    if config.semantic_chunk_overlap >= config.semantic_chunk_size {
        return Err(ConfigError::invalid(
            "retriever.semantic_chunk_overlap",
            "must be smaller than the chunk size",
        ));
    }
    if config.lexical_weight < 0.0 || config.semantic_weight < 0.0 {
        return Err(ConfigError::invalid("retriever", "weights must be non-negative"));
    }
    if config.lexical_weight + config.semantic_weight <= 0.0 {
        return Err(ConfigError::invalid("retriever", "at least one weight must be positive"));
    }
    Ok(())
}

/// Serde adapter for humantime durations.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethiscan_core::retrieval::EmbeddingModel;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_join_attempts, 5);
        assert_eq!(config.retrieval_k, 3);
        assert_eq!(config.oracle.model, "gpt-4o-mini");
        assert_eq!(config.oracle.max_attempts, 2);
        assert_eq!(config.guideline, DEFAULT_GUIDELINE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RuntimeConfig = serde_json::from_value(serde_json::json!({
            "join_wait": "90s",
            "oracle": { "timeout": "2m", "max_attempts": 3 },
            "provider": { "type": "anthropic", "settings": { "base_url": "https://x" } }
        }))
        .unwrap();

        assert_eq!(config.join_wait, Duration::from_secs(90));
        assert_eq!(config.oracle.timeout, Duration::from_secs(120));
        assert_eq!(config.oracle.max_attempts, 3);
        assert_eq!(config.oracle.model, "gpt-4o-mini");
        assert_eq!(config.provider.kind, "anthropic");
        assert_eq!(config.max_join_attempts, 5);
    }

    #[test]
    fn test_embedding_model_selection() {
        let config = RuntimeConfig::default();
        assert_eq!(config.retriever.embedding_model, EmbeddingModel::AllMiniLmL6V2);

        let config: RuntimeConfig = serde_json::from_value(serde_json::json!({
            "retriever": { "embedding_model": "hashing", "model_cache_dir": "/tmp/models" }
        }))
        .unwrap();
        assert_eq!(config.retriever.embedding_model, EmbeddingModel::Hashing);
        assert_eq!(config.retriever.model_cache_dir, Some(PathBuf::from("/tmp/models")));
        assert!(config.validate().is_ok());

        let unknown: Result<RuntimeConfig, _> = serde_json::from_value(serde_json::json!({
            "retriever": { "embedding_model": "word2vec" }
        }));
        assert!(unknown.is_err());
    }

    #[test]
    fn test_duration_round_trip_is_humantime() {
        let json = serde_json::to_value(RuntimeConfig::default()).unwrap();
        assert_eq!(json["join_wait"], "1m");
        assert_eq!(json["oracle"]["cache_ttl"], "1h");
    }

    #[test]
    fn test_rejects_bad_duration() {
        let result: Result<RuntimeConfig, _> =
            serde_json::from_value(serde_json::json!({ "join_wait": "soon" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = RuntimeConfig {
            max_join_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_join_attempts", .. })
        ));

        config.max_join_attempts = 5;
        config.oracle.temperature = 3.5;
        assert!(config.validate().is_err());

        config.oracle.temperature = 0.2;
        config.retriever.semantic_chunk_overlap = 250;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_completion_config() {
        let oracle = OracleConfig {
            model: "claude-haiku-4-5".to_string(),
            ..Default::default()
        };
        let completion = oracle.completion();
        assert_eq!(completion.model, "claude-haiku-4-5");
        assert_eq!(completion.max_tokens, 2000);
        assert_eq!(oracle.retry_policy().max_attempts, 2);
    }
}
