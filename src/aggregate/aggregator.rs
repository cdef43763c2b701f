//! Multi-source cascade with fuzzy matching, deduplication and merge.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dedup::{DedupIndex, DedupThresholds};
use super::merge::merge_candidates;
use super::recipe::{Recipe, SourceCandidate};
use super::similarity::similarity;
use super::source::{FailureKind, SearchRequest, Source, SourceError};
use crate::blocklist::BlockRegistry;
use crate::rate_limit::AdaptiveRateLimiter;

/// Tuning for the cascade.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Upper bound for one source's search, including its sub-requests.
    pub source_timeout: Duration,
    /// Completeness that counts as "complete" for the consecutive-source rule.
    pub complete_threshold: u8,
    /// Merged completeness of accepted candidates that ends the cascade.
    pub coverage_threshold: u8,
    pub dedup: DedupThresholds,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(30),
            complete_threshold: 80,
            coverage_threshold: 75,
            dedup: DedupThresholds::default(),
        }
    }
}

/// What happened when the cascade reached one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Best match was accepted into the working set.
    Accepted { completeness: u8, match_score: f64 },
    /// Best match duplicated an accepted candidate.
    Duplicate { similarity: f64 },
    /// The source answered but nothing cleared its match threshold.
    NoMatch { results: usize },
    /// Not called: quota exhausted or domain blocked.
    Skipped { reason: FailureKind },
    /// Called and failed.
    Failed { reason: FailureKind, detail: String },
}

/// Telemetry for one source in one aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAttempt {
    pub source_id: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// A candidate discarded as a near-duplicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub source_id: String,
    pub title: String,
    pub similarity: f64,
    pub title_similarity: f64,
    pub ingredient_similarity: f64,
}

/// Merged record plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub query: String,
    pub recipe: Recipe,
    /// Contributing source ids, in cascade order.
    pub sources: Vec<String>,
    pub combined_confidence: f64,
    pub combined_completeness: u8,
    pub attempts: Vec<SourceAttempt>,
    pub rejections: Vec<Rejection>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AggregateError {
    #[error("No candidates found for \"{query}\" ({} sources tried)", .attempts.len())]
    NoCandidatesFound {
        query: String,
        attempts: Vec<SourceAttempt>,
        rejections: Vec<Rejection>,
    },
}

impl AggregateError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoCandidatesFound { .. } => FailureKind::NoCandidatesFound,
        }
    }
}

/// Pick the result whose title best matches the query.
///
/// A result whose `source_url` is the caller's hint URL matches exactly.
/// Returns the winner and its score if it clears `threshold`; ties keep
/// the earlier result.
pub fn best_match(
    query: &str,
    hint_url: Option<&str>,
    results: Vec<Recipe>,
    threshold: f64,
) -> Option<(Recipe, f64)> {
    let mut best: Option<(Recipe, f64)> = None;
    for recipe in results {
        let is_hint = hint_url.is_some_and(|hint| recipe.source_url.as_deref() == Some(hint));
        let score = if is_hint {
            1.0
        } else {
            similarity(query, &recipe.title)
        };
        if score < threshold {
            continue;
        }
        if best.as_ref().map_or(true, |(_, top)| score > *top) {
            best = Some((recipe, score));
        }
    }
    best
}

/// Runs the source cascade for a query.
///
/// The limiter and registry are shared with everything else that talks to
/// the same domains, so concurrent aggregations pace and block together.
#[derive(Clone)]
pub struct SourceAggregator {
    sources: Vec<Arc<dyn Source>>,
    limiter: AdaptiveRateLimiter,
    blocks: BlockRegistry,
    config: AggregatorConfig,
}

impl SourceAggregator {
    pub fn new(limiter: AdaptiveRateLimiter, blocks: BlockRegistry) -> Self {
        Self {
            sources: Vec::new(),
            limiter,
            blocks,
            config: AggregatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a source; sources are consulted in the order added.
    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(&self) -> impl Iterator<Item = &dyn Source> {
        self.sources.iter().map(|s| s.as_ref())
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Query sources in priority order and merge what they return.
    pub async fn aggregate(
        &self,
        query: &str,
        hint_url: Option<&str>,
    ) -> Result<AggregatedResult, AggregateError> {
        let mut request = SearchRequest::new(query);
        if let Some(hint) = hint_url {
            request = request.with_hint_url(hint);
        }

        let mut index = DedupIndex::with_thresholds(self.config.dedup);
        let mut accepted: Vec<SourceCandidate> = Vec::new();
        let mut attempts = Vec::with_capacity(self.sources.len());
        let mut rejections = Vec::new();
        let mut complete_streak = 0u32;

        for (rank, source) in self.sources.iter().enumerate() {
            let source_id = source.id().to_string();
            let endpoint = source.endpoint();

            if source.is_exhausted().await {
                debug!("Skipping {}: quota exhausted", source_id);
                attempts.push(skipped(&source_id, FailureKind::QuotaExhausted));
                continue;
            }
            if self.blocks.is_blocked(endpoint).await {
                debug!("Skipping {}: domain blocked", source_id);
                attempts.push(skipped(&source_id, FailureKind::AccessBlocked));
                continue;
            }

            // The slot wait counts against the source timeout
            let began = Instant::now();
            let mut dispatched: Option<Instant> = None;
            let timed = tokio::time::timeout(self.config.source_timeout, async {
                self.limiter.wait_for_slot(endpoint, source.priority()).await;
                let sent = Instant::now();
                dispatched = Some(sent);
                let result = source.search(&request).await;
                (result, sent.elapsed())
            })
            .await;
            let (outcome, latency, report) = match timed {
                Ok((result, latency)) => (result, latency, !source.reports_outcomes()),
                Err(_) => (
                    Err(SourceError::Timeout(self.config.source_timeout)),
                    dispatched.map_or(Duration::ZERO, |sent| sent.elapsed()),
                    dispatched.is_some(),
                ),
            };
            let latency_ms = Some(began.elapsed().as_millis() as u64);

            let results = match outcome {
                Ok(results) => {
                    if report {
                        self.limiter.report_outcome(endpoint, 200, latency).await;
                    }
                    self.blocks.record_success(endpoint).await;
                    results
                }
                Err(e) => {
                    self.handle_failure(&source_id, endpoint, &e, report.then_some(latency))
                        .await;
                    complete_streak = 0;
                    attempts.push(SourceAttempt {
                        source_id,
                        outcome: AttemptOutcome::Failed {
                            reason: e.kind(),
                            detail: e.to_string(),
                        },
                        latency_ms,
                    });
                    continue;
                }
            };

            let result_count = results.len();
            let Some((recipe, match_score)) =
                best_match(query, hint_url, results, source.match_threshold())
            else {
                debug!(
                    "{}: none of {} results matched \"{}\"",
                    source_id, result_count, query
                );
                complete_streak = 0;
                attempts.push(SourceAttempt {
                    source_id,
                    outcome: AttemptOutcome::NoMatch {
                        results: result_count,
                    },
                    latency_ms,
                });
                continue;
            };

            let candidate =
                SourceCandidate::new(recipe, &source_id, source.confidence(), match_score, rank);
            if candidate.completeness >= self.config.complete_threshold {
                complete_streak += 1;
            } else {
                complete_streak = 0;
            }

            match index.check_and_insert(&candidate.recipe) {
                Ok(_) => {
                    debug!(
                        "{}: accepted \"{}\" (match {:.2}, completeness {})",
                        source_id, candidate.recipe.title, match_score, candidate.completeness
                    );
                    attempts.push(SourceAttempt {
                        source_id,
                        outcome: AttemptOutcome::Accepted {
                            completeness: candidate.completeness,
                            match_score,
                        },
                        latency_ms,
                    });
                    accepted.push(candidate);
                }
                Err(duplicate) => {
                    debug!(
                        "{}: rejected \"{}\" as duplicate of \"{}\" ({:.2})",
                        source_id,
                        candidate.recipe.title,
                        duplicate.existing_title,
                        duplicate.similarity()
                    );
                    attempts.push(SourceAttempt {
                        source_id: source_id.clone(),
                        outcome: AttemptOutcome::Duplicate {
                            similarity: duplicate.similarity(),
                        },
                        latency_ms,
                    });
                    rejections.push(Rejection {
                        source_id,
                        title: candidate.recipe.title,
                        similarity: duplicate.similarity(),
                        title_similarity: duplicate.title_similarity,
                        ingredient_similarity: duplicate.ingredient_similarity,
                    });
                }
            }

            if complete_streak >= 2 {
                info!(
                    "Stopping cascade for \"{}\": two consecutive complete results",
                    query
                );
                break;
            }
            if accepted.len() >= 2 {
                let coverage = merge_candidates(&accepted)
                    .map(|m| m.combined_completeness)
                    .unwrap_or(0);
                if coverage >= self.config.coverage_threshold {
                    info!(
                        "Stopping cascade for \"{}\": {} candidates cover {}%",
                        query,
                        accepted.len(),
                        coverage
                    );
                    break;
                }
            }
        }

        let Some(merged) = merge_candidates(&accepted) else {
            warn!(
                "No candidates found for \"{}\" across {} sources",
                query,
                self.sources.len()
            );
            return Err(AggregateError::NoCandidatesFound {
                query: query.to_string(),
                attempts,
                rejections,
            });
        };

        Ok(AggregatedResult {
            query: query.to_string(),
            recipe: merged.recipe,
            sources: merged.sources,
            combined_confidence: merged.combined_confidence,
            combined_completeness: merged.combined_completeness,
            attempts,
            rejections,
        })
    }

    async fn handle_failure(
        &self,
        source_id: &str,
        endpoint: &str,
        error: &SourceError,
        latency: Option<Duration>,
    ) {
        if let (Some(status), Some(latency)) = (error.outcome_status(), latency) {
            self.limiter.report_outcome(endpoint, status, latency).await;
        }
        if error.counts_toward_block() {
            self.blocks.record_failure(endpoint, &error.to_string()).await;
        }

        match error {
            SourceError::QuotaExhausted(_) => debug!("{}: {}", source_id, error),
            _ => warn!("Source {} failed: {}", source_id, error),
        }
    }
}

fn skipped(source_id: &str, reason: FailureKind) -> SourceAttempt {
    SourceAttempt {
        source_id: source_id.to_string(),
        outcome: AttemptOutcome::Skipped { reason },
        latency_ms: None,
    }
}

impl std::fmt::Debug for SourceAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAggregator")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.id()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        id: &'static str,
        endpoint: &'static str,
        confidence: f64,
        response: Result<Vec<Recipe>, SourceError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(id: &'static str, response: Result<Vec<Recipe>, SourceError>) -> Self {
            Self {
                id,
                endpoint: "https://stub.example/search",
                confidence: 80.0,
                response,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Source for StubSource {
        fn id(&self) -> &str {
            self.id
        }

        fn endpoint(&self) -> &str {
            self.endpoint
        }

        fn confidence(&self) -> f64 {
            self.confidence
        }

        async fn search(&self, _request: &SearchRequest) -> Result<Vec<Recipe>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.clone()
        }
    }

    fn aggregator() -> SourceAggregator {
        SourceAggregator::new(AdaptiveRateLimiter::new(), BlockRegistry::in_memory())
    }

    #[test]
    fn test_best_match_picks_highest_above_threshold() {
        let results = vec![
            Recipe::new("Beef Stew"),
            Recipe::new("Banana Bread Muffins"),
            Recipe::new("Banana Bread"),
        ];
        let (recipe, score) = best_match("banana bread", None, results, 0.6).unwrap();
        assert_eq!(recipe.title, "Banana Bread");
        assert_eq!(score, 1.0);

        assert!(best_match("banana bread", None, vec![Recipe::new("Beef Stew")], 0.6).is_none());
    }

    #[test]
    fn test_best_match_hint_url_is_exact() {
        let mut hinted = Recipe::new("Grandma's Loaf");
        hinted.source_url = Some("https://site.example/loaf".into());
        let (recipe, score) = best_match(
            "banana bread",
            Some("https://site.example/loaf"),
            vec![Recipe::new("Banana Bread Bars"), hinted],
            0.6,
        )
        .unwrap();
        assert_eq!(recipe.title, "Grandma's Loaf");
        assert_eq!(score, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_skips_to_next_source() {
        let mut slow = StubSource::new("slow", Ok(vec![Recipe::new("Pho")]));
        slow.delay = Duration::from_secs(60);
        slow.endpoint = "https://slow.example/api";
        let fast = Arc::new(StubSource::new("fast", Ok(vec![Recipe::new("Pho")])));

        let aggregator = aggregator()
            .with_config(AggregatorConfig {
                source_timeout: Duration::from_secs(10),
                ..Default::default()
            })
            .with_source(Arc::new(slow))
            .with_source(fast.clone());

        let result = aggregator.aggregate("Pho", None).await.unwrap();
        assert_eq!(result.sources, vec!["fast"]);
        assert!(matches!(
            result.attempts[0].outcome,
            AttemptOutcome::Failed {
                reason: FailureKind::TimeoutError,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_wait_is_bounded_by_source_timeout() {
        let limiter = AdaptiveRateLimiter::new();
        for _ in 0..10 {
            limiter
                .report_outcome("https://busy.example/api", 429, Duration::from_millis(50))
                .await;
        }
        let mut busy = StubSource::new("busy", Ok(vec![Recipe::new("Pho")]));
        busy.endpoint = "https://busy.example/api";
        let busy = Arc::new(busy);
        let fallback = Arc::new(StubSource::new("fallback", Ok(vec![Recipe::new("Pho")])));

        let aggregator = SourceAggregator::new(limiter.clone(), BlockRegistry::in_memory())
            .with_config(AggregatorConfig {
                source_timeout: Duration::from_secs(10),
                ..Default::default()
            })
            .with_source(busy.clone())
            .with_source(fallback.clone());

        let started = Instant::now();
        let result = aggregator.aggregate("Pho", None).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(busy.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.sources, vec!["fallback"]);
        assert!(matches!(
            result.attempts[0].outcome,
            AttemptOutcome::Failed {
                reason: FailureKind::TimeoutError,
                ..
            }
        ));
        // Nothing was sent, so nothing is reported
        let stats = limiter.domain_stats("busy.example").await.unwrap();
        assert_eq!(stats.throttle_hits, 10);
        assert_eq!(stats.consecutive_errors, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_latency_excludes_slot_wait() {
        let limiter = AdaptiveRateLimiter::new();
        limiter.set_domain_limit("stub.example", 0.1).await;
        let aggregator = SourceAggregator::new(limiter.clone(), BlockRegistry::in_memory())
            .with_source(Arc::new(StubSource::new("stub", Ok(vec![Recipe::new("Pho")]))));

        // Drain the burst so later searches wait about 10s for a slot
        for _ in 0..4 {
            aggregator.aggregate("Pho", None).await.unwrap();
        }

        let stats = limiter.domain_stats("stub.example").await.unwrap();
        assert!((stats.adaptive_multiplier - 1.2).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_feed_registry_and_limiter() {
        let limiter = AdaptiveRateLimiter::new();
        let blocks = BlockRegistry::in_memory();
        let failing = Arc::new(StubSource::new(
            "failing",
            Err(SourceError::RateLimited { status: 429 }),
        ));
        let aggregator = SourceAggregator::new(limiter.clone(), blocks.clone())
            .with_source(failing.clone());

        let err = aggregator.aggregate("Pho", None).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NoCandidatesFound);

        let record = blocks.get("stub.example").await.unwrap().unwrap();
        assert_eq!(record.attempt_count, 1);
        let stats = limiter.domain_stats("stub.example").await.unwrap();
        assert_eq!(stats.throttle_hits, 1);
        assert!(stats.backoff_until.is_some());
    }

    #[tokio::test]
    async fn test_parse_errors_do_not_count_as_blocks() {
        let blocks = BlockRegistry::in_memory();
        let aggregator = SourceAggregator::new(AdaptiveRateLimiter::new(), blocks.clone())
            .with_source(Arc::new(StubSource::new(
                "broken",
                Err(SourceError::Parse("unexpected token".into())),
            )));

        assert!(aggregator.aggregate("Pho", None).await.is_err());
        assert!(blocks.get("stub.example").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_match_is_reported() {
        let aggregator = aggregator().with_source(Arc::new(StubSource::new(
            "unrelated",
            Ok(vec![Recipe::new("Beef Stew")]),
        )));

        match aggregator.aggregate("Banana Bread", None).await {
            Err(AggregateError::NoCandidatesFound { attempts, .. }) => {
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts[0].outcome, AttemptOutcome::NoMatch { results: 1 });
            }
            other => panic!("expected NoCandidatesFound, got {:?}", other),
        }
    }

    #[test]
    fn test_attempt_serializes_flat() {
        let attempt = SourceAttempt {
            source_id: "api".into(),
            outcome: AttemptOutcome::Skipped {
                reason: FailureKind::AccessBlocked,
            },
            latency_ms: None,
        };
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["sourceId"], "api");
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "access_blocked");
    }
}
