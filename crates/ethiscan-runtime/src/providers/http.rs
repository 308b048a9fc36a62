//! HTTP plumbing shared by the hosted providers.
//!
//! Both APIs report errors as `{"error": {"message": ...}}` and signal rate
//! limits with 429 plus an optional `retry-after` header, so status mapping
//! lives here once.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::ProviderError;

/// Provider setting that overrides the API base URL.
pub const BASE_URL_SETTING: &str = "base_url";

/// A base URL plus the client that talks to it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base_url: String,
    client: reqwest::Client,
}

impl Endpoint {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Endpoint from provider settings, using `default_base` when no
    /// `base_url` is set.
    pub fn from_settings(settings: &JsonValue, default_base: &str) -> Result<Self, ProviderError> {
        validate_base_url(settings)?;
        let base = settings[BASE_URL_SETTING].as_str().unwrap_or(default_base);
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;

        Ok(Self {
            base_url: base.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// A POST to `path` under the base URL, bounded by `timeout`.
    pub fn post(&self, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .timeout(timeout)
    }
}

pub fn validate_base_url(settings: &JsonValue) -> Result<(), ProviderError> {
    match settings[BASE_URL_SETTING].as_str() {
        Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
            Err(ProviderError::NotConfigured(format!(
                "{} must start with http:// or https://, got '{}'",
                BASE_URL_SETTING, url
            )))
        }
        _ => Ok(()),
    }
}

/// Send a request and decode a successful JSON body.
pub async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout(timeout)
        } else {
            ProviderError::HttpError(e.to_string())
        }
    })?;

    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::ParseError(e.to_string()))
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::AuthError),
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited {
            retry_after: retry_after(response.headers()),
        }),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: error_message(&body),
            })
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// The API's own error message, or the raw body when it has none.
fn error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
