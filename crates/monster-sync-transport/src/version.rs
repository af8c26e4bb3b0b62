//! Server protocol version probe.

use async_trait::async_trait;
use monster_sync_proto::{Endpoints, REQUIRED_VERSION};
use reqwest::Client;
use std::time::Duration;

/// Looks up the protocol version the server speaks.
#[async_trait]
pub trait VersionFetcher: Send + Sync {
    /// Fetch the remote version string.
    async fn fetch_version(&self) -> Result<String, VersionError>;
}

/// True if the remote version matches the one this client speaks.
#[must_use]
pub fn is_supported(remote: &str) -> bool {
    remote.trim() == REQUIRED_VERSION
}

/// `GET {base}/version` over HTTP.
pub struct HttpVersionFetcher {
    client: Client,
    url: String,
}

impl HttpVersionFetcher {
    /// Create a fetcher for the server's version endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(endpoints: &Endpoints, timeout: Duration) -> Result<Self, VersionError> {
        let mut builder = Client::builder().timeout(timeout);
        if endpoints.version().starts_with("https://") {
            builder = builder.use_rustls_tls();
        }

        let client = builder
            .build()
            .map_err(|e| VersionError::Init(e.to_string()))?;

        Ok(Self {
            client,
            url: endpoints.version().to_string(),
        })
    }

    /// Probe URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl VersionFetcher for HttpVersionFetcher {
    async fn fetch_version(&self) -> Result<String, VersionError> {
        tracing::debug!(url = %self.url, "GET version");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| VersionError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VersionError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| VersionError::Request(e.to_string()))?;

        Ok(body.trim().to_string())
    }
}

/// Errors from the version probe.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VersionError {
    /// Client initialization failed
    #[error("client init error: {0}")]
    Init(String),
    /// HTTP request failed
    #[error("request error: {0}")]
    Request(String),
    /// Server answered with an error status
    #[error("version probe failed (status {status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },
}
