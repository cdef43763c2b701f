//! reqwest-backed fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;
use tracing::debug;

use super::user_agent::resolve_user_agent;
use super::{FetchError, FetchResponse, Fetcher};

/// HTTP fetcher with a fixed user agent and compression support.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher.
    /// - `user_agent`: see [`resolve_user_agent`]
    /// - `timeout`: upper bound for any single request
    pub fn new(user_agent: Option<&str>, timeout: Duration) -> Result<Self, FetchError> {
        let user_agent = resolve_user_agent(user_agent);
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;

        let start = Instant::now();
        let response = self
            .client
            .get(parsed)
            .header("Accept", "application/json, text/html;q=0.9, */*;q=0.8")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(timeout)
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Body(e.to_string())
            }
        })?;
        let latency = start.elapsed();

        debug!("GET {} -> {} in {:?}", url, status, latency);
        Ok(FetchResponse {
            status,
            body,
            latency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_invalid_url() {
        let fetcher = HttpFetcher::new(None, Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch("not a url", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
