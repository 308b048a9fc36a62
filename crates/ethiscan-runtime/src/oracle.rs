//! The text-generation oracle used by every analysis task.
//!
//! `Oracle::ask` wraps an [`LlmProvider`] with:
//! - a per-request timeout
//! - bounded retry with exponential backoff for transient failures
//! - an optional response cache
//! - token usage accounting per stage
//!
//! Tasks treat any `Err` from `ask` as a task-level failure.

use backon::Retryable;
use ethiscan_core::Stage;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{CacheKey, ResponseCache};
use crate::config::OracleConfig;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};
use crate::resilience::{RetryPolicy, UsageTracker};

/// Errors surfaced by [`Oracle::ask`].
#[derive(Error, Debug)]
pub enum OracleError {
    /// A failure retrying cannot fix.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("Gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: ProviderError,
    },
}

pub struct Oracle {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    retry: RetryPolicy,
    cache: Option<ResponseCache>,
    usage: Arc<UsageTracker>,
}

impl Oracle {
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            provider,
            completion,
            retry: RetryPolicy::default(),
            cache: None,
            usage: Arc::new(UsageTracker::new()),
        }
    }

    /// Oracle configured from runtime settings. A zero cache capacity
    /// disables caching.
    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &OracleConfig) -> Self {
        let oracle = Self::new(provider, config.completion()).with_retry(config.retry_policy());
        if config.cache_capacity > 0 {
            oracle.with_cache(ResponseCache::new(config.cache_capacity, config.cache_ttl))
        } else {
            oracle
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.completion.model
    }

    /// Ask one question and return the answer text.
    pub async fn ask(&self, stage: Stage, system: &str, user: &str) -> Result<String, OracleError> {
        let key = CacheKey::new(&self.completion.model, system, user);
        if let Some(cache) = &self.cache {
            if let Some(answer) = cache.get(&key).await {
                tracing::debug!(stage = %stage, "Oracle cache hit");
                self.usage.record_cache_hit(stage);
                return Ok(answer);
            }
        }

        tracing::debug!(
            stage = %stage,
            provider = self.provider.name(),
            prompt_chars = system.len() + user.len(),
            "Calling oracle"
        );

        let result = (|| self.attempt(stage, system, user))
            .retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(|e: &ProviderError| e.is_transient())
            .notify(|e: &ProviderError, delay| {
                tracing::warn!(stage = %stage, error = %e, delay = ?delay, "Retrying oracle call");
            })
            .await;

        match result {
            Ok(answer) => {
                if let Some(cache) = &self.cache {
                    cache.insert(key, answer.clone()).await;
                }
                Ok(answer)
            }
            Err(e) if e.is_transient() => Err(OracleError::Exhausted {
                attempts: self.retry.max_attempts,
                source: e,
            }),
            Err(e) => Err(OracleError::Provider(e)),
        }
    }

    async fn attempt(&self, stage: Stage, system: &str, user: &str) -> Result<String, ProviderError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let timeout = self.completion.timeout;

        let response = tokio::time::timeout(timeout, self.provider.complete(messages, &self.completion))
            .await
            .map_err(|_| ProviderError::Timeout(timeout))??;

        self.usage.record(stage, &response.usage, &response.model);
        Ok(response.content)
    }
}

impl std::fmt::Debug for Oracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Oracle")
            .field("provider", &self.provider.name())
            .field("model", &self.completion.model)
            .field("retry", &self.retry)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}
