//! HTTP client for the external recommendation engine.
//!
//! Events are posted to `{base_url}/interactions/record` with an
//! `Idempotency-Key` header so the engine can drop redelivered payloads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{ForwardPayload, InteractionSink};
use crate::{MuninnError, Result};

/// Default engine base URL when neither config nor environment set one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8001";

/// Environment variable overriding the engine base URL.
pub const BASE_URL_ENV: &str = "RECOMMENDATION_API_URL";

/// Default request timeout. Forwarding is best-effort and must not hold up
/// the caller for long.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Header carrying the delivery idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const RECORD_PATH: &str = "/interactions/record";

/// Longest slice of an error body kept in [`MuninnError::Api`] messages.
const MAX_ERROR_BODY: usize = 512;

/// Client for the recommendation engine's interaction endpoint.
#[derive(Clone, Debug)]
pub struct EngineClient {
    http: Client,
    url: String,
    timeout: Duration,
}

impl EngineClient {
    /// Client for `RECOMMENDATION_API_URL`, or the local default.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url)
    }

    /// Client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Client with a custom base URL and request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                MuninnError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;

        let base_url = base_url.into();
        Ok(Self {
            http,
            url: format!("{}{RECORD_PATH}", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    /// Full URL events are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl InteractionSink for EngineClient {
    fn name(&self) -> &str {
        "recommendation-engine"
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.url)
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn deliver(&self, payload: &ForwardPayload, idempotency_key: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MuninnError::Timeout(self.timeout)
                } else {
                    MuninnError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|&i| message.is_char_boundary(i))
                .unwrap_or(0);
            message.truncate(cut);
        }
        Err(MuninnError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
