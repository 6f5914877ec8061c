//! Outbound HTTP connections to upstream sources
//!
//! The engine only sees [`ConnectionFactory::open`]. Failures carry a
//! message; a rate-limit response is recognised by the HTTP 429 indicator in
//! that message.

use async_trait::async_trait;
use recon_common::Error;
use std::time::Duration;
use tracing::debug;

/// Marker the engine looks for to classify a failure as throttling
pub const THROTTLE_INDICATOR: &str = "HTTP response code: 429";

/// Failure opening or reading an upstream URL
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error for a non-success HTTP status
    pub fn from_status(status: u16, url: &str) -> Self {
        Self::new(format!(
            "Server returned HTTP response code: {} for URL: {}",
            status, url
        ))
    }

    /// Whether the upstream signalled a rate limit
    pub fn is_throttle(&self) -> bool {
        self.message.contains(THROTTLE_INDICATOR)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        if err.is_throttle() {
            Error::Throttled(err.message)
        } else {
            Error::Transport(err.message)
        }
    }
}

/// Source of response bodies for URLs
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Fetch `url` and return the full response body
    async fn open(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// reqwest-backed connection factory
pub struct HttpConnectionFactory {
    client: reqwest::Client,
}

impl HttpConnectionFactory {
    /// Build the shared client
    ///
    /// reqwest 0.11 has no per-read timeout, so `read_timeout` is folded into
    /// one whole-request deadline of `connect_timeout + read_timeout`. A slow
    /// body is cut off by that total, not by a stalled-read timer.
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(connect_timeout + read_timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn from_config(config: &recon_common::config::HttpConfig) -> Result<Self, Error> {
        Self::new(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.read_timeout_secs),
            &config.user_agent,
        )
    }
}

#[async_trait]
impl ConnectionFactory for HttpConnectionFactory {
    async fn open(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        debug!(url = %url, "Opening upstream connection");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::new(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::from_status(status.as_u16(), url));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(format!("Reading body from {} failed: {}", url, e)))?;

        Ok(body.to_vec())
    }
}
