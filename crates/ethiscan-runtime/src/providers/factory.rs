//! Provider registry.
//!
//! The `provider.type` in a config file is looked up here and the matching
//! factory turns `provider.settings` into a live [`LlmProvider`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};
use crate::config::ProviderConfig;

/// Builds one kind of provider from its JSON settings.
pub trait ProviderFactory: Send + Sync {
    /// Name used as `provider.type`, e.g. "openai".
    fn provider_type(&self) -> &'static str;

    fn create(&self, settings: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check settings without building anything. Runs before every
    /// [`create`](Self::create) issued through the registry.
    fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError>;

    fn description(&self) -> &'static str {
        "LLM provider"
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every provider compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));

        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));

        registry
    }

    /// Later registrations of the same type win.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.provider_type(), factory);
    }

    pub fn create(
        &self,
        provider_type: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let Some(factory) = self.factories.get(provider_type) else {
            return Err(ProviderError::NotConfigured(format!(
                "unknown provider type '{}' (this build has: {})",
                provider_type,
                self.describe_types()
            )));
        };

        factory.validate_config(settings)?;
        let provider = factory.create(settings)?;
        tracing::debug!(provider_type, name = provider.name(), "Provider created");
        Ok(provider)
    }

    /// Provider for the `provider` section of a runtime config.
    pub fn from_config(&self, config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.create(&config.kind, &config.settings)
    }

    pub fn available_types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    fn describe_types(&self) -> String {
        if self.factories.is_empty() {
            return "none; enable the `openai` or `anthropic` feature".to_string();
        }
        self.factories
            .values()
            .map(|f| format!("{} ({})", f.provider_type(), f.description()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
