//! Matching service client
//!
//! The dispatch orchestrator talks to the matching service through the
//! [`MatchingTransport`] seam; [`HttpMatchingClient`] is the reqwest-backed
//! implementation used in production.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::payload_builder::PayloadRowGroup;

/// Matching webhook of the original deployment
pub const DEFAULT_MATCHING_URL: &str =
    "https://n8n.kivosoftware.de/webhook/ebffe043-8b78-4c28-bd7a-35d278511b44";

/// Server-side budget of the matching workflow (25 minutes)
pub const DEFAULT_MATCHING_TIMEOUT_SECS: u64 = 1500;

/// Matching request errors
///
/// All of these are per-row recoverable: the row stays without a result.
#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Matching service returned status {0}: {1}")]
    Status(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Transport for one matching request
#[async_trait]
pub trait MatchingTransport: Send + Sync {
    /// Submit one payload row group, returning the raw response body
    async fn submit(&self, payload: &PayloadRowGroup) -> Result<Value, MatchingError>;
}

/// reqwest-backed matching client
#[derive(Debug, Clone)]
pub struct HttpMatchingClient {
    http_client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpMatchingClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, MatchingError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MatchingError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST an arbitrary JSON body to the matching webhook
    pub async fn post_json(&self, body: &Value) -> Result<Value, MatchingError> {
        tracing::debug!(url = %self.url, "Posting to matching service");

        let response = self
            .http_client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Matching service returned error status");
            return Err(MatchingError::Status(status.as_u16(), error_text));
        }

        let text = response.text().await.map_err(|e| self.classify(e))?;
        serde_json::from_str(&text).map_err(|e| MatchingError::Parse(e.to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> MatchingError {
        if err.is_timeout() {
            MatchingError::Timeout(self.timeout)
        } else {
            MatchingError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl MatchingTransport for HttpMatchingClient {
    async fn submit(&self, payload: &PayloadRowGroup) -> Result<Value, MatchingError> {
        let body = serde_json::to_value(payload).map_err(|e| MatchingError::Parse(e.to_string()))?;
        self.post_json(&body).await
    }
}
