//! Rate limiter configuration and types.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Priority used when the caller has no opinion.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Status codes that mean the remote side wants us to slow down.
pub const THROTTLE_STATUS_CODES: [u16; 4] = [429, 502, 503, 403];

/// Consecutive throttle responses that force backoff (429 forces it at once).
pub const BACKOFF_ERROR_THRESHOLD: u32 = 3;

/// Consecutive other failures before the multiplier is reduced.
pub const CLIENT_ERROR_THRESHOLD: u32 = 2;

/// Floor for the adaptive multiplier.
pub const MIN_MULTIPLIER: f64 = 0.1;

/// Ceiling for the adaptive multiplier (reachable only via fast responses).
pub const MAX_MULTIPLIER: f64 = 1.2;

/// Slow responses never push the multiplier below this.
pub const SLOW_RESPONSE_FLOOR: f64 = 0.5;

/// Maximum relative perturbation applied in human-like mode.
pub const JITTER_FRACTION: f64 = 0.2;

/// Configuration for rate limiting behavior.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for domains without an override.
    pub default_rate: f64,
    /// Requests that may be issued back-to-back before spacing applies.
    pub default_burst: u32,
    /// Perturb waits by up to ±20% to look less mechanical.
    pub human_jitter: bool,
    /// Ceiling for exponential backoff.
    pub max_backoff: Duration,
    /// Domain state untouched for longer than this is evicted.
    pub idle_eviction: Duration,
    /// How often the background sweep runs.
    pub sweep_interval: Duration,
    /// Responses at or below this latency nudge the multiplier up.
    pub fast_response: Duration,
    /// Responses above this latency nudge the multiplier down.
    pub slow_response: Duration,
    /// Per-domain base rate overrides (requests per second).
    pub domain_rates: HashMap<String, f64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_rate: 1.0,
            default_burst: 3,
            human_jitter: false,
            max_backoff: Duration::from_secs(300),
            idle_eviction: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            fast_response: Duration::from_millis(1000),
            slow_response: Duration::from_millis(5000),
            domain_rates: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Base rate for a domain, honoring overrides.
    pub fn rate_for(&self, domain: &str) -> f64 {
        self.domain_rates
            .get(domain)
            .copied()
            .unwrap_or(self.default_rate)
    }
}

/// Statistics for a domain.
#[derive(Debug, Clone)]
pub struct DomainStats {
    pub domain: String,
    pub base_rate: f64,
    pub burst_capacity: u32,
    pub current_burst: f64,
    pub adaptive_multiplier: f64,
    pub consecutive_errors: u32,
    pub backoff_until: Option<Instant>,
    pub total_requests: u64,
    pub throttle_hits: u64,
}

impl DomainStats {
    /// Requests per second currently allowed.
    pub fn effective_rate(&self) -> f64 {
        self.base_rate * self.adaptive_multiplier
    }

    /// Whether the domain is backing off at `now`.
    pub fn in_backoff(&self, now: Instant) -> bool {
        self.backoff_until.is_some_and(|until| until > now)
    }
}
