//! Adaptive per-domain rate limiter.
//!
//! Each domain owns its own lock, so a caller waiting on one domain never
//! holds up requests to another. The outer map lock is only held long
//! enough to look up or insert a domain entry.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::{DomainStats, RateLimitConfig, DEFAULT_PRIORITY, JITTER_FRACTION};
use super::domain_state::{jittered_wait, DomainRateState, OutcomeChange};
use crate::utils::url::extract_domain;

type DomainMap = HashMap<String, Arc<Mutex<DomainRateState>>>;

/// Adaptive rate limiter that tracks per-domain request timing.
///
/// - Token bucket per domain: `base_rate * adaptive_multiplier` requests per
///   second with a small burst allowance
/// - Multiplicative backoff on 429/502/503/403, exponential cooldown on
///   repeated throttling
/// - Gradual recovery on 2xx, nudged by response latency
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct AdaptiveRateLimiter {
    config: Arc<RateLimitConfig>,
    domains: Arc<RwLock<DomainMap>>,
}

impl AdaptiveRateLimiter {
    /// Create a new rate limiter with default config.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a new rate limiter with custom config.
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            domains: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Get or lazily create the state entry for a domain.
    async fn entry(&self, domain: &str) -> Arc<Mutex<DomainRateState>> {
        {
            let domains = self.domains.read().await;
            if let Some(entry) = domains.get(domain) {
                return entry.clone();
            }
        }

        let mut domains = self.domains.write().await;
        domains
            .entry(domain.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DomainRateState::new(
                    domain.to_string(),
                    self.config.rate_for(domain),
                    self.config.default_burst,
                    Instant::now(),
                )))
            })
            .clone()
    }

    /// Wait until a request to `url` is permitted at default priority.
    pub async fn acquire(&self, url: &str) -> Option<String> {
        self.wait_for_slot(url, DEFAULT_PRIORITY).await
    }

    /// Wait until a request to `url` is permitted, then mark it as started.
    ///
    /// Higher `priority` (default 5) shortens the required spacing.
    /// Returns the domain, or `None` (without waiting) if the URL has no host.
    pub async fn wait_for_slot(&self, url: &str, priority: u8) -> Option<String> {
        let domain = extract_domain(url)?;
        let entry = self.entry(&domain).await;

        let wait = {
            let mut state = entry.lock().await;
            let now = Instant::now();
            let required = state.required_wait(now, priority);
            let wait = if self.config.human_jitter {
                let offset = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
                jittered_wait(required, offset)
            } else {
                required
            };
            state.commit(now, wait);
            wait
        };

        if wait > Duration::ZERO {
            debug!("Rate limiting {}: waiting {:?}", domain, wait);
            tokio::time::sleep(wait).await;
        }

        Some(domain)
    }

    /// Report the outcome of a request so the domain's pace can adapt.
    ///
    /// `status_code` 0 means the request never got a response.
    pub async fn report_outcome(&self, url: &str, status_code: u16, latency: Duration) {
        let Some(domain) = extract_domain(url) else {
            return;
        };
        let entry = self.entry(&domain).await;
        let mut state = entry.lock().await;

        match state.record_outcome(status_code, latency, Instant::now(), &self.config) {
            OutcomeChange::EnteredBackoff { until, multiplier } => {
                warn!(
                    "Rate limited by {} (HTTP {}), backing off for {:?} at {:.2}x",
                    domain,
                    status_code,
                    until.saturating_duration_since(Instant::now()),
                    multiplier
                );
            }
            OutcomeChange::Throttled { multiplier } => {
                warn!(
                    "Throttle signal from {} (HTTP {}), pace reduced to {:.2}x",
                    domain, status_code, multiplier
                );
            }
            OutcomeChange::Recovered { multiplier } => {
                info!(
                    "Domain {} recovered from backoff at {:.2}x",
                    domain, multiplier
                );
            }
            OutcomeChange::Adjusted { multiplier } => {
                debug!(
                    "Domain {} pace adjusted to {:.2}x after HTTP {}",
                    domain, multiplier, status_code
                );
            }
            OutcomeChange::Unchanged => {}
        }
    }

    /// Manually set a domain's base rate (requests per second).
    pub async fn set_domain_limit(&self, domain: &str, rate: f64) {
        let domain = extract_domain(domain).unwrap_or_else(|| domain.to_lowercase());
        let entry = self.entry(&domain).await;
        let mut state = entry.lock().await;
        state.set_base_rate(rate);
        info!("Domain {} limit set to {} req/s", domain, state.base_rate);
    }

    /// Statistics for one domain, if it has been seen.
    pub async fn domain_stats(&self, domain: &str) -> Option<DomainStats> {
        let domain = extract_domain(domain)?;
        let entry = {
            let domains = self.domains.read().await;
            domains.get(&domain).cloned()
        }?;
        let state = entry.lock().await;
        Some(state.stats())
    }

    /// Get statistics for all domains.
    pub async fn get_stats(&self) -> HashMap<String, DomainStats> {
        let entries: Vec<(String, Arc<Mutex<DomainRateState>>)> = {
            let domains = self.domains.read().await;
            domains
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let mut stats = HashMap::with_capacity(entries.len());
        for (domain, entry) in entries {
            let state = entry.lock().await;
            stats.insert(domain, state.stats());
        }
        stats
    }

    /// Number of domains currently tracked.
    pub async fn tracked_domains(&self) -> usize {
        self.domains.read().await.len()
    }

    /// Drop state for domains idle longer than the configured window.
    pub async fn evict_idle(&self) -> usize {
        evict_idle_in(&self.domains, Instant::now(), self.config.idle_eviction).await
    }

    /// Start the periodic eviction sweep.
    ///
    /// The task holds only a weak reference and exits once every limiter
    /// clone has been dropped.
    pub fn spawn_eviction_sweep(&self) -> JoinHandle<()> {
        let domains: Weak<RwLock<DomainMap>> = Arc::downgrade(&self.domains);
        let period = self.config.sweep_interval;
        let max_idle = self.config.idle_eviction;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(domains) = domains.upgrade() else {
                    debug!("Rate limiter dropped, stopping eviction sweep");
                    break;
                };
                evict_idle_in(&domains, Instant::now(), max_idle).await;
            }
        })
    }
}

async fn evict_idle_in(domains: &RwLock<DomainMap>, now: Instant, max_idle: Duration) -> usize {
    let mut domains = domains.write().await;
    let before = domains.len();
    domains.retain(|_, entry| match entry.try_lock() {
        Ok(state) => !state.is_idle(now, max_idle),
        // Locked means someone is using it right now
        Err(_) => true,
    });
    let removed = before - domains.len();
    if removed > 0 {
        debug!("Evicted rate limit state for {} idle domains", removed);
    }
    removed
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AdaptiveRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
