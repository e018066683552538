//! HTTP health boundary: a single unauthenticated `GET /healthcheck`

use crate::resilience::{ResilienceError, RetryConfig, RetryExecutor};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Per-request timeout used by the CLI
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One probe; `Ok` only for a success status
    async fn probe(&self, url: &str) -> Result<(), HealthError>;
}

pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, HealthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(HealthError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> Result<(), HealthError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| HealthError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Health probe answered");
        if status.is_success() {
            Ok(())
        } else {
            Err(HealthError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

/// Probe `url` until it succeeds or the retry budget runs out
pub async fn wait_until_healthy(
    probe: &dyn HealthProbe,
    url: &str,
    retry: &RetryConfig,
) -> Result<(), ResilienceError> {
    let executor = RetryExecutor::new(retry.clone());
    executor.execute(move || async move { probe.probe(url).await }).await?;
    info!(url = %url, "Health check passed");
    Ok(())
}
