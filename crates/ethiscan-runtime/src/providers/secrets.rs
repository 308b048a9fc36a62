//! API keys for the model providers.
//!
//! A [`KeySpec`] names where a provider's key may come from: the `api_key`
//! setting first, then an environment variable. Resolved keys are held as
//! [`ApiCredential`]s, which wrap a [`secrecy::SecretString`] and never
//! print their value. The raw key is read only through
//! [`ApiCredential::expose`] when a request header is set.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Provider setting that carries the key.
pub const API_KEY_SETTING: &str = "api_key";

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Settings,
    Environment,
    /// Passed directly to a provider constructor
    Explicit,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::Settings => "settings",
            CredentialSource::Environment => "environment",
            CredentialSource::Explicit => "explicit",
        })
    }
}

/// The lookup rules for one provider's key.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    /// Human-readable name used in errors, e.g. "OpenAI API key"
    pub label: &'static str,
    pub env_var: &'static str,
}

impl KeySpec {
    pub const fn new(label: &'static str, env_var: &'static str) -> Self {
        Self { label, env_var }
    }

    /// Wrap a key handed over in code.
    pub fn explicit(&self, key: impl Into<String>) -> ApiCredential {
        ApiCredential::new(key.into(), CredentialSource::Explicit, self.label)
    }

    /// Find the key in `settings`, then in the environment.
    ///
    /// Blank values count as missing, so an empty `api_key:` in a config
    /// file still falls through to the environment.
    pub fn lookup(&self, settings: &JsonValue) -> Option<ApiCredential> {
        let from_settings = settings[API_KEY_SETTING]
            .as_str()
            .filter(|key| !key.trim().is_empty())
            .map(|key| ApiCredential::new(key.to_string(), CredentialSource::Settings, self.label));

        from_settings.or_else(|| {
            std::env::var(self.env_var)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .map(|key| ApiCredential::new(key, CredentialSource::Environment, self.label))
        })
    }

    /// Like [`lookup`](Self::lookup), but a missing key is an error naming
    /// both places it was looked for.
    pub fn resolve(&self, settings: &JsonValue) -> Result<ApiCredential, ProviderError> {
        self.lookup(settings).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "{} required: set '{}' in provider settings or the {} environment variable",
                self.label, API_KEY_SETTING, self.env_var
            ))
        })
    }
}

/// A resolved API key.
pub struct ApiCredential {
    secret: SecretString,
    source: CredentialSource,
    label: &'static str,
}

impl ApiCredential {
    fn new(key: String, source: CredentialSource, label: &'static str) -> Self {
        Self {
            secret: SecretString::from(key),
            source,
            label,
        }
    }

    /// The raw key. Call only where it is sent.
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiCredential({} from {}, [REDACTED])", self.label, self.source)
    }
}
