//! The source capability consumed by the aggregator.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::recipe::Recipe;
use crate::fetch::FetchError;
use crate::rate_limit::DEFAULT_PRIORITY;

/// Title similarity a candidate needs when a source sets no threshold.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

/// What the aggregator asks every source for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// A page the caller already knows about; sources may fetch it directly.
    pub hint_url: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            hint_url: None,
        }
    }

    pub fn with_hint_url(mut self, hint_url: impl Into<String>) -> Self {
        self.hint_url = Some(hint_url.into());
        self
    }
}

/// Failure categories reported in aggregation telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NetworkError,
    TimeoutError,
    RateLimited,
    AccessBlocked,
    ParseError,
    DuplicateRejected,
    NoCandidatesFound,
    QuotaExhausted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NetworkError => "network error",
            Self::TimeoutError => "timeout",
            Self::RateLimited => "rate limited",
            Self::AccessBlocked => "access blocked",
            Self::ParseError => "parse error",
            Self::DuplicateRejected => "duplicate rejected",
            Self::NoCandidatesFound => "no candidates found",
            Self::QuotaExhausted => "quota exhausted",
        };
        f.write_str(s)
    }
}

/// Errors a source may return from [`Source::search`].
///
/// None of these abort an aggregation; the source is skipped for this query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Rate limited (HTTP {status})")]
    RateLimited { status: u16 },
    #[error("Access blocked: {0}")]
    AccessBlocked(String),
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),
}

impl SourceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network(_) => FailureKind::NetworkError,
            Self::Timeout(_) => FailureKind::TimeoutError,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::AccessBlocked(_) => FailureKind::AccessBlocked,
            Self::Parse(_) => FailureKind::ParseError,
            Self::QuotaExhausted(_) => FailureKind::QuotaExhausted,
        }
    }

    /// Status code to report to the rate limiter, if a request was made.
    ///
    /// Transport failures report 0 and timeouts 408; both count as failed
    /// requests without being throttle signals. Parse failures and local
    /// quota exhaustion report nothing.
    pub fn outcome_status(&self) -> Option<u16> {
        match self {
            Self::Network(_) => Some(0),
            Self::Timeout(_) => Some(408),
            Self::RateLimited { status } => Some(*status),
            Self::AccessBlocked(_) => Some(403),
            Self::Parse(_) | Self::QuotaExhausted(_) => None,
        }
    }

    /// Whether this failure should count against the domain's block record.
    pub fn counts_toward_block(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::AccessBlocked(_)
        )
    }
}

impl From<FetchError> for SourceError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout(after) => SourceError::Timeout(after),
            FetchError::Body(msg) => SourceError::Parse(msg),
            other => SourceError::Network(other.to_string()),
        }
    }
}

/// A provider of recipe candidates.
///
/// `search` must return an empty list, not an error, when nothing matches.
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable identifier used in provenance and telemetry.
    fn id(&self) -> &str;

    /// URL whose domain is rate limited and block-checked for this source.
    fn endpoint(&self) -> &str;

    /// Trust in this source's data, 0 to 100.
    fn confidence(&self) -> f64;

    /// Minimum title similarity for a candidate to be considered a match.
    /// Noisier sources should require tighter matches.
    fn match_threshold(&self) -> f64 {
        DEFAULT_MATCH_THRESHOLD
    }

    /// Rate limiter priority for this source's requests.
    fn priority(&self) -> u8 {
        DEFAULT_PRIORITY
    }

    /// Whether the source is out of budget and should be skipped.
    async fn is_exhausted(&self) -> bool {
        false
    }

    /// Whether the source reports each of its requests to the rate limiter
    /// itself. Otherwise the aggregator reports one outcome per search,
    /// timed from after the slot wait.
    fn reports_outcomes(&self) -> bool {
        false
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Recipe>, SourceError>;
}
