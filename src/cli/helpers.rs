//! Shared helper functions for CLI commands.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::aggregate::SourceAggregator;
use crate::config::Config;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::rate_limit::AdaptiveRateLimiter;
use crate::sources::JsonApiSource;

/// Truncate to `max` characters, marking the cut with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Human-readable relative time, e.g. "in 42m" or "3h ago".
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = at - now;
    let (amount, future) = if delta.num_seconds() >= 0 {
        (delta, true)
    } else {
        (-delta, false)
    };

    let text = if amount.num_days() > 0 {
        format!("{}d", amount.num_days())
    } else if amount.num_hours() > 0 {
        format!("{}h", amount.num_hours())
    } else if amount.num_minutes() > 0 {
        format!("{}m", amount.num_minutes())
    } else {
        format!("{}s", amount.num_seconds())
    };

    if future {
        format!("in {}", text)
    } else {
        format!("{} ago", text)
    }
}

/// Build the limiter, registry and configured sources into an aggregator.
pub fn build_aggregator(config: &Config) -> anyhow::Result<SourceAggregator> {
    let limiter = AdaptiveRateLimiter::with_config(config.rate_limit_config());
    let blocks = config.block_registry();

    let fetcher: Arc<dyn Fetcher> = Arc::new(
        HttpFetcher::new(config.http.user_agent.as_deref(), config.http.timeout())
            .context("Failed to create HTTP client")?,
    );

    let mut aggregator = SourceAggregator::new(limiter.clone(), blocks)
        .with_config(config.aggregator.to_aggregator_config());
    for source in &config.sources {
        aggregator = aggregator.with_source(Arc::new(JsonApiSource::new(
            source.clone(),
            fetcher.clone(),
            limiter.clone(),
            config.http.timeout(),
        )));
    }

    Ok(aggregator)
}
