//! Generic source for JSON recipe search APIs.
//!
//! The search endpoint is a URL template with a `{query}` placeholder. The
//! response is either an array of recipe objects or an object holding one
//! (at `results_path`, or under `results`/`recipes` by default). Hits that
//! carry only a summary and a detail link are completed by fetching the
//! detail documents through a bounded fan-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::aggregate::{
    fan_out, DailyQuota, FanOutConfig, Recipe, SearchRequest, Source, SourceError,
    DEFAULT_MATCH_THRESHOLD,
};
use crate::fetch::{FetchError, FetchResponse, Fetcher};
use crate::rate_limit::{AdaptiveRateLimiter, DEFAULT_PRIORITY};
use crate::utils::url::extract_domain;

/// Configuration for one JSON API source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonApiSourceConfig {
    /// Identifier used in provenance and telemetry.
    pub id: String,
    /// Search URL with a `{query}` placeholder.
    pub search_url: String,
    /// Trust in this source's data, 0 to 100.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Minimum title similarity for a match.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    /// Rate limiter priority (higher waits less).
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Dot path to the result array, e.g. `data.hits`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_path: Option<String>,
    /// Field on each hit that links to its full record.
    #[serde(default = "default_detail_field")]
    pub detail_field: String,
    /// Requests allowed per UTC day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_quota: Option<u32>,
    /// Base request rate for this API's domain (requests per second).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    /// Concurrent detail fetches per batch.
    #[serde(default = "default_detail_workers")]
    pub detail_workers: usize,
    /// Pause between detail batches in milliseconds.
    #[serde(default = "default_detail_batch_delay_ms")]
    pub detail_batch_delay_ms: u64,
    /// Maximum hits completed with a detail fetch.
    #[serde(default = "default_max_details")]
    pub max_details: usize,
}

fn default_confidence() -> f64 {
    70.0
}

fn default_match_threshold() -> f64 {
    DEFAULT_MATCH_THRESHOLD
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn default_detail_field() -> String {
    "detailUrl".to_string()
}

fn default_detail_workers() -> usize {
    3
}

fn default_detail_batch_delay_ms() -> u64 {
    500
}

fn default_max_details() -> usize {
    5
}

impl JsonApiSourceConfig {
    pub fn new(id: impl Into<String>, search_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            search_url: search_url.into(),
            confidence: default_confidence(),
            match_threshold: default_match_threshold(),
            priority: default_priority(),
            results_path: None,
            detail_field: default_detail_field(),
            daily_quota: None,
            rate: None,
            detail_workers: default_detail_workers(),
            detail_batch_delay_ms: default_detail_batch_delay_ms(),
            max_details: default_max_details(),
        }
    }

    /// Search URL for `query`.
    pub fn search_url_for(&self, query: &str) -> String {
        self.search_url
            .replace("{query}", &urlencoding::encode(query))
    }

    fn fan_out_config(&self) -> FanOutConfig {
        FanOutConfig {
            workers: self.detail_workers,
            batch_delay: Duration::from_millis(self.detail_batch_delay_ms),
        }
    }
}

/// Extract a value from nested JSON using a dot-notation path.
fn extract_path<'a>(data: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return data;
    }

    let mut current = data;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key).unwrap_or(&Value::Null),
            Value::Array(arr) => key
                .parse::<usize>()
                .ok()
                .and_then(|idx| arr.get(idx))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    current
}

/// Map a non-success HTTP status to the matching source error.
fn status_error(status: u16) -> SourceError {
    match status {
        429 | 502 | 503 => SourceError::RateLimited { status },
        401 | 403 => SourceError::AccessBlocked(format!("HTTP {}", status)),
        402 => SourceError::QuotaExhausted(format!("HTTP {}", status)),
        _ => SourceError::Network(format!("HTTP {}", status)),
    }
}

/// A search result, possibly still missing its full record.
#[derive(Debug, Clone)]
struct Hit {
    recipe: Recipe,
    detail_url: Option<String>,
}

impl Hit {
    fn needs_detail(&self) -> bool {
        self.detail_url.is_some() && self.recipe.ingredients.is_empty()
    }
}

pub struct JsonApiSource {
    config: JsonApiSourceConfig,
    fetcher: Arc<dyn Fetcher>,
    limiter: AdaptiveRateLimiter,
    quota: Option<DailyQuota>,
    request_timeout: Duration,
}

impl JsonApiSource {
    pub fn new(
        config: JsonApiSourceConfig,
        fetcher: Arc<dyn Fetcher>,
        limiter: AdaptiveRateLimiter,
        request_timeout: Duration,
    ) -> Self {
        let quota = config.daily_quota.map(DailyQuota::new);
        Self {
            config,
            fetcher,
            limiter,
            quota,
            request_timeout,
        }
    }

    pub fn config(&self) -> &JsonApiSourceConfig {
        &self.config
    }

    /// Parse a search response body into hits.
    fn parse_hits(&self, body: &str) -> Result<Vec<Hit>, SourceError> {
        let json: Value =
            serde_json::from_str(body).map_err(|e| SourceError::Parse(e.to_string()))?;

        let items = match &self.config.results_path {
            Some(path) => extract_path(&json, path),
            None if json.is_array() => &json,
            None => ["results", "recipes"]
                .iter()
                .map(|key| &json[*key])
                .find(|v| v.is_array())
                .unwrap_or(&Value::Null),
        };
        let Some(items) = items.as_array() else {
            return Err(SourceError::Parse("response contains no result list".into()));
        };

        let mut hits = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<Recipe>(item.clone()) {
                Ok(recipe) => hits.push(Hit {
                    recipe,
                    detail_url: item
                        .get(&self.config.detail_field)
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }),
                Err(e) => debug!("{}: skipping malformed hit: {}", self.config.id, e),
            }
        }
        Ok(hits)
    }

    /// Fetch one document and report its outcome to the rate limiter.
    ///
    /// The caller is responsible for waiting for a slot.
    async fn fetch_reported(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let result = self.fetcher.fetch(url, self.request_timeout).await;
        match &result {
            Ok(response) => {
                self.limiter
                    .report_outcome(url, response.status, response.latency)
                    .await
            }
            Err(FetchError::Timeout(after)) => self.limiter.report_outcome(url, 408, *after).await,
            Err(_) => self.limiter.report_outcome(url, 0, Duration::ZERO).await,
        }
        result
    }

    /// Fetch one document through the rate limiter, reporting the outcome.
    async fn fetch_gated(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.limiter.wait_for_slot(url, self.config.priority).await;
        self.fetch_reported(url).await
    }

    /// Complete a hit from its detail document; keeps the summary on failure.
    async fn complete_hit(&self, hit: Hit) -> Recipe {
        let Some(url) = hit.detail_url.clone() else {
            return hit.recipe;
        };

        let response = match self.fetch_gated(&url).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                debug!("{}: detail {} returned {}", self.config.id, url, response.status);
                return hit.recipe;
            }
            Err(e) => {
                debug!("{}: detail {} failed: {}", self.config.id, url, e);
                return hit.recipe;
            }
        };

        match serde_json::from_str::<Recipe>(&response.body) {
            Ok(mut detail) => {
                if !detail.has_title() {
                    detail.title = hit.recipe.title;
                }
                if detail.source_url.is_none() {
                    detail.source_url = hit.recipe.source_url.or(Some(url));
                }
                detail
            }
            Err(e) => {
                debug!("{}: unreadable detail {}: {}", self.config.id, url, e);
                hit.recipe
            }
        }
    }

    /// Whether `url` is served by this source's API host.
    fn owns(&self, url: &str) -> bool {
        match (extract_domain(url), extract_domain(&self.config.search_url)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

#[async_trait]
impl Source for JsonApiSource {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn endpoint(&self) -> &str {
        &self.config.search_url
    }

    fn confidence(&self) -> f64 {
        self.config.confidence
    }

    fn match_threshold(&self) -> f64 {
        self.config.match_threshold
    }

    fn priority(&self) -> u8 {
        self.config.priority
    }

    async fn is_exhausted(&self) -> bool {
        self.quota.as_ref().is_some_and(|q| q.is_exhausted())
    }

    fn reports_outcomes(&self) -> bool {
        true
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Recipe>, SourceError> {
        if let Some(quota) = &self.quota {
            if !quota.try_consume() {
                return Err(SourceError::QuotaExhausted(format!(
                    "daily limit of {} requests reached",
                    quota.limit()
                )));
            }
        }

        // The aggregator has already waited for this request's slot
        let url = self.config.search_url_for(&request.query);
        let response = self.fetch_reported(&url).await?;
        if !response.is_success() {
            if response.status == 402 {
                if let Some(quota) = &self.quota {
                    quota.exhaust_at(Utc::now());
                }
            }
            return Err(status_error(response.status));
        }

        let mut hits = self.parse_hits(&response.body)?;

        // A hinted page on this API's host is worth one detail fetch
        if let Some(hint) = &request.hint_url {
            let already_listed = hits
                .iter()
                .any(|h| h.recipe.source_url.as_deref() == Some(hint.as_str()));
            if !already_listed && self.owns(hint) {
                hits.insert(
                    0,
                    Hit {
                        recipe: Recipe {
                            source_url: Some(hint.clone()),
                            ..Recipe::default()
                        },
                        detail_url: Some(hint.clone()),
                    },
                );
            }
        }

        let mut slots: Vec<Option<Recipe>> = Vec::with_capacity(hits.len());
        let mut pending = Vec::new();
        for (index, hit) in hits.into_iter().enumerate() {
            if hit.needs_detail() && pending.len() < self.config.max_details {
                pending.push((index, hit));
                slots.push(None);
            } else {
                slots.push(Some(hit.recipe));
            }
        }

        if !pending.is_empty() {
            debug!(
                "{}: completing {} hits from detail pages",
                self.config.id,
                pending.len()
            );
            let completed = fan_out(pending, &self.config.fan_out_config(), |(index, hit)| {
                async move { (index, self.complete_hit(hit).await) }
            })
            .await;
            for (index, recipe) in completed {
                slots[index] = Some(recipe);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

impl std::fmt::Debug for JsonApiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonApiSource")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CannedFetcher {
        responses: HashMap<String, (u16, String)>,
        calls: Mutex<Vec<String>>,
    }

    impl CannedFetcher {
        fn with(mut self, url: &str, status: u16, body: &str) -> Self {
            self.responses
                .insert(url.to_string(), (status, body.to_string()));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for CannedFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchResponse, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.responses.get(url) {
                Some((status, body)) => Ok(FetchResponse {
                    status: *status,
                    body: body.clone(),
                    latency: Duration::from_millis(20),
                }),
                None => Err(FetchError::Network(format!("no route to {}", url))),
            }
        }
    }

    const SEARCH: &str = "https://api.recipes.test/search?q={query}";
    const BANANA_SEARCH: &str = "https://api.recipes.test/search?q=banana%20bread";

    fn source(fetcher: Arc<CannedFetcher>, config: JsonApiSourceConfig) -> JsonApiSource {
        JsonApiSource::new(
            config,
            fetcher,
            AdaptiveRateLimiter::new(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_search_url_encodes_query() {
        let config = JsonApiSourceConfig::new("api", SEARCH);
        assert_eq!(config.search_url_for("banana bread"), BANANA_SEARCH);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(429), SourceError::RateLimited { status: 429 }));
        assert!(matches!(status_error(503), SourceError::RateLimited { status: 503 }));
        assert!(matches!(status_error(403), SourceError::AccessBlocked(_)));
        assert!(matches!(status_error(402), SourceError::QuotaExhausted(_)));
        assert!(matches!(status_error(500), SourceError::Network(_)));
    }

    #[test]
    fn test_extract_path() {
        let json: Value = serde_json::json!({"data": {"hits": [{"title": "a"}]}});
        assert!(extract_path(&json, "data.hits").is_array());
        assert_eq!(extract_path(&json, "data.hits.0.title"), "a");
        assert!(extract_path(&json, "data.missing").is_null());
    }

    #[tokio::test]
    async fn test_parses_results_object() {
        let body = r#"{"results": [
            {"title": "Banana Bread", "ingredients": ["3 bananas", "flour"], "servings": 8},
            {"title": 42},
            {"title": "Banana Muffins", "ingredients": ["2 bananas"]}
        ]}"#;
        let fetcher = Arc::new(CannedFetcher::default().with(BANANA_SEARCH, 200, body));
        let source = source(fetcher, JsonApiSourceConfig::new("api", SEARCH));

        let recipes = source
            .search(&SearchRequest::new("banana bread"))
            .await
            .unwrap();

        assert_eq!(recipes.len(), 2);
        assert_eq!(recipes[0].title, "Banana Bread");
        assert_eq!(recipes[0].servings.as_deref(), Some("8"));
        assert_eq!(recipes[1].title, "Banana Muffins");
    }

    #[tokio::test]
    async fn test_results_path() {
        let body = r#"{"data": {"hits": [{"title": "Banana Bread"}]}}"#;
        let fetcher = Arc::new(CannedFetcher::default().with(BANANA_SEARCH, 200, body));
        let mut config = JsonApiSourceConfig::new("api", SEARCH);
        config.results_path = Some("data.hits".to_string());
        let source = source(fetcher, config);

        let recipes = source
            .search(&SearchRequest::new("banana bread"))
            .await
            .unwrap();
        assert_eq!(recipes.len(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_body_is_parse_error() {
        let fetcher = Arc::new(CannedFetcher::default().with(BANANA_SEARCH, 200, "<html>"));
        let source = source(fetcher, JsonApiSourceConfig::new("api", SEARCH));

        let err = source
            .search(&SearchRequest::new("banana bread"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[tokio::test]
    async fn test_rate_limited_status() {
        let fetcher = Arc::new(CannedFetcher::default().with(BANANA_SEARCH, 429, ""));
        let source = source(fetcher, JsonApiSourceConfig::new("api", SEARCH));

        let err = source
            .search(&SearchRequest::new("banana bread"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::RateLimited { status: 429 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detail_fetch_completes_hits_in_order() {
        let body = r#"[
            {"title": "Banana Bread", "detailUrl": "https://api.recipes.test/r/1"},
            {"title": "Banana Loaf", "ingredients": ["bananas"]},
            {"title": "Banana Cake", "detailUrl": "https://api.recipes.test/r/3"}
        ]"#;
        let detail = r#"{"ingredients": ["3 bananas", "2 cups flour"], "instructions": ["Bake."]}"#;
        let fetcher = Arc::new(
            CannedFetcher::default()
                .with(BANANA_SEARCH, 200, body)
                .with("https://api.recipes.test/r/1", 200, detail),
        );
        let source = source(fetcher.clone(), JsonApiSourceConfig::new("api", SEARCH));

        let recipes = source
            .search(&SearchRequest::new("banana bread"))
            .await
            .unwrap();

        assert_eq!(recipes.len(), 3);
        assert_eq!(recipes[0].title, "Banana Bread");
        assert_eq!(recipes[0].ingredients.len(), 2);
        assert_eq!(
            recipes[0].source_url.as_deref(),
            Some("https://api.recipes.test/r/1")
        );
        assert_eq!(recipes[1].title, "Banana Loaf");
        // Failed detail fetch keeps the summary
        assert_eq!(recipes[2].title, "Banana Cake");
        assert!(recipes[2].ingredients.is_empty());
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hint_url_on_same_host_is_fetched() {
        let hint = "https://api.recipes.test/r/99";
        let fetcher = Arc::new(
            CannedFetcher::default()
                .with(BANANA_SEARCH, 200, "[]")
                .with(hint, 200, r#"{"title": "Grandma's Banana Bread", "ingredients": ["bananas"]}"#),
        );
        let source = source(fetcher, JsonApiSourceConfig::new("api", SEARCH));

        let recipes = source
            .search(&SearchRequest::new("banana bread").with_hint_url(hint))
            .await
            .unwrap();

        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].source_url.as_deref(), Some(hint));
    }

    #[tokio::test]
    async fn test_hint_url_on_other_host_is_ignored() {
        let fetcher = Arc::new(CannedFetcher::default().with(BANANA_SEARCH, 200, "[]"));
        let source = source(fetcher.clone(), JsonApiSourceConfig::new("api", SEARCH));

        let recipes = source
            .search(&SearchRequest::new("banana bread").with_hint_url("https://blog.test/bread"))
            .await
            .unwrap();

        assert!(recipes.is_empty());
        assert_eq!(fetcher.calls(), vec![BANANA_SEARCH.to_string()]);
    }

    #[tokio::test]
    async fn test_daily_quota() {
        let fetcher = Arc::new(CannedFetcher::default().with(BANANA_SEARCH, 200, "[]"));
        let mut config = JsonApiSourceConfig::new("api", SEARCH);
        config.daily_quota = Some(1);
        let source = source(fetcher.clone(), config);
        let request = SearchRequest::new("banana bread");

        assert!(!source.is_exhausted().await);
        assert!(source.search(&request).await.is_ok());
        assert!(source.is_exhausted().await);

        let err = source.search(&request).await.unwrap_err();
        assert!(matches!(err, SourceError::QuotaExhausted(_)));
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_payment_required_exhausts_quota() {
        let fetcher = Arc::new(CannedFetcher::default().with(BANANA_SEARCH, 402, ""));
        let mut config = JsonApiSourceConfig::new("api", SEARCH);
        config.daily_quota = Some(500);
        let source = source(fetcher, config);

        let err = source
            .search(&SearchRequest::new("banana bread"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::QuotaExhausted(_)));
        assert!(source.is_exhausted().await);
    }

    #[test]
    fn test_config_defaults_from_toml() {
        let config: JsonApiSourceConfig = toml::from_str(
            r#"
            id = "api"
            search_url = "https://api.recipes.test/search?q={query}"
            daily_quota = 150
            "#,
        )
        .unwrap();
        assert_eq!(config.confidence, 70.0);
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(config.detail_field, "detailUrl");
        assert_eq!(config.daily_quota, Some(150));
    }
}
