//! MTConnect agent client.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors fetching documents from the agent.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Agent returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Source of raw MTConnect documents.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Fetch the probe (device structure) document.
    async fn fetch_probe(&self) -> Result<String, FetchError>;

    /// Fetch the current (latest values) document.
    async fn fetch_current(&self) -> Result<String, FetchError>;
}

/// HTTP client for an MTConnect agent.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentClient {
    /// Create a client for the agent at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Agent base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, request: &str) -> String {
        format!("{}/{}", self.base_url, request)
    }

    async fn get(&self, request: &str) -> Result<String, FetchError> {
        let url = self.endpoint(request);
        tracing::trace!(url = %url, "Fetching");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|source| FetchError::Body { url, source })
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn fetch_probe(&self) -> Result<String, FetchError> {
        self.get("probe").await
    }

    async fn fetch_current(&self) -> Result<String, FetchError> {
        self.get("current").await
    }
}
