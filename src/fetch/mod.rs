//! Network client capability.
//!
//! Sources fetch through the [`Fetcher`] trait so tests can substitute
//! canned responses for real HTTP.

mod client;
mod user_agent;

pub use client::HttpFetcher;
pub use user_agent::{resolve_user_agent, BROWSER_USER_AGENTS, USER_AGENT};

use std::time::Duration;

use async_trait::async_trait;

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors for requests that produced no usable response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to read response body: {0}")]
    Body(String),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`, giving up after `timeout`.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError>;
}
