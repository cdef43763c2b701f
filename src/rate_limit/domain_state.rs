//! Per-domain rate limiting state.

use std::time::Duration;

use tokio::time::Instant;

use super::config::{
    DomainStats, RateLimitConfig, BACKOFF_ERROR_THRESHOLD, CLIENT_ERROR_THRESHOLD, JITTER_FRACTION,
    MAX_MULTIPLIER, MIN_MULTIPLIER, SLOW_RESPONSE_FLOOR, THROTTLE_STATUS_CODES,
};

/// Lowest base rate accepted; keeps interval math finite.
const MIN_RATE: f64 = 0.001;

/// What an outcome report did to a domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutcomeChange {
    /// Throttled and now backing off until the given instant.
    EnteredBackoff { until: Instant, multiplier: f64 },
    /// Throttled; multiplier halved but no backoff yet.
    Throttled { multiplier: f64 },
    /// A success ended an active backoff.
    Recovered { multiplier: f64 },
    /// Multiplier moved without a state transition.
    Adjusted { multiplier: f64 },
    /// Nothing changed.
    Unchanged,
}

/// State for a single domain.
#[derive(Debug, Clone)]
pub struct DomainRateState {
    pub domain: String,
    /// Requests per second before adaptation.
    pub base_rate: f64,
    /// Maximum stored burst tokens.
    pub burst_capacity: u32,
    /// Burst tokens currently available.
    pub current_burst: f64,
    /// Start time of the most recently scheduled request.
    pub last_request: Option<Instant>,
    /// Point up to which tokens have been regenerated.
    last_refill: Instant,
    /// Scales the base rate; 0.1 to 1.2.
    pub adaptive_multiplier: f64,
    pub consecutive_errors: u32,
    pub backoff_until: Option<Instant>,
    /// Last time this state was read or written, for eviction.
    pub last_touched: Instant,
    pub total_requests: u64,
    pub throttle_hits: u64,
}

impl DomainRateState {
    pub fn new(domain: String, base_rate: f64, burst_capacity: u32, now: Instant) -> Self {
        let burst_capacity = burst_capacity.max(1);
        Self {
            domain,
            base_rate: base_rate.max(MIN_RATE),
            burst_capacity,
            current_burst: burst_capacity as f64,
            last_request: None,
            last_refill: now,
            adaptive_multiplier: 1.0,
            consecutive_errors: 0,
            backoff_until: None,
            last_touched: now,
            total_requests: 0,
            throttle_hits: 0,
        }
    }

    /// Requests per second currently allowed.
    pub fn effective_rate(&self) -> f64 {
        (self.base_rate * self.adaptive_multiplier).max(MIN_RATE)
    }

    /// Replace the base rate (manual override).
    pub fn set_base_rate(&mut self, rate: f64) {
        self.base_rate = rate.max(MIN_RATE);
    }

    /// Minimum spacing between requests at the given priority.
    pub fn min_interval(&self, priority: u8) -> Duration {
        let millis = 1000.0 / self.effective_rate() * priority_multiplier(priority);
        Duration::from_secs_f64(millis / 1000.0)
    }

    /// Regenerate burst tokens up to `now`.
    fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.current_burst =
            (self.current_burst + elapsed * self.effective_rate()).min(self.burst_capacity as f64);
        self.last_refill = now;
    }

    /// Compute how long a request arriving at `now` must wait.
    ///
    /// Does not mutate scheduling state; call [`Self::commit`] with the
    /// (possibly jittered) wait to claim the slot.
    pub fn required_wait(&mut self, now: Instant, priority: u8) -> Duration {
        self.refill(now);

        let mut start = now;
        if self.current_burst < 1.0 {
            if let Some(last) = self.last_request {
                start = start.max(last + self.min_interval(priority));
            }
        }
        if let Some(until) = self.backoff_until {
            start = start.max(until);
        }

        start.saturating_duration_since(now)
    }

    /// Claim the slot starting `wait` after `now`, consuming one burst token.
    pub fn commit(&mut self, now: Instant, wait: Duration) {
        let start = now + wait;
        self.refill(start);
        self.current_burst = (self.current_burst - 1.0).max(0.0);
        self.last_request = Some(self.last_request.map_or(start, |last| last.max(start)));
        self.last_touched = now;
        self.total_requests += 1;
    }

    /// Whether the domain is backing off at `now`.
    pub fn in_backoff(&self, now: Instant) -> bool {
        self.backoff_until.is_some_and(|until| until > now)
    }

    /// Whether this state has been idle for longer than `max_idle`.
    pub fn is_idle(&self, now: Instant, max_idle: Duration) -> bool {
        now.saturating_duration_since(self.last_touched) > max_idle
    }

    /// Adapt to the outcome of a request.
    pub fn record_outcome(
        &mut self,
        status_code: u16,
        latency: Duration,
        now: Instant,
        config: &RateLimitConfig,
    ) -> OutcomeChange {
        self.last_touched = now;

        if THROTTLE_STATUS_CODES.contains(&status_code) {
            self.adaptive_multiplier = (self.adaptive_multiplier * 0.5).max(MIN_MULTIPLIER);
            self.consecutive_errors += 1;
            self.throttle_hits += 1;

            if status_code == 429 || self.consecutive_errors >= BACKOFF_ERROR_THRESHOLD {
                let until = now + backoff_delay(self.consecutive_errors, config.max_backoff);
                self.backoff_until = Some(until);
                return OutcomeChange::EnteredBackoff {
                    until,
                    multiplier: self.adaptive_multiplier,
                };
            }
            return OutcomeChange::Throttled {
                multiplier: self.adaptive_multiplier,
            };
        }

        if (200..300).contains(&status_code) {
            let was_backing_off = self.backoff_until.take().is_some();
            self.consecutive_errors = 0;
            let before = self.adaptive_multiplier;

            if self.adaptive_multiplier < 1.0 {
                self.adaptive_multiplier = (self.adaptive_multiplier * 1.1).min(1.0);
            }
            if latency <= config.fast_response {
                self.adaptive_multiplier = (self.adaptive_multiplier * 1.05).min(MAX_MULTIPLIER);
            } else if latency > config.slow_response && self.adaptive_multiplier > SLOW_RESPONSE_FLOOR
            {
                self.adaptive_multiplier = (self.adaptive_multiplier * 0.9).max(SLOW_RESPONSE_FLOOR);
            }

            if was_backing_off {
                return OutcomeChange::Recovered {
                    multiplier: self.adaptive_multiplier,
                };
            }
            if (self.adaptive_multiplier - before).abs() > f64::EPSILON {
                return OutcomeChange::Adjusted {
                    multiplier: self.adaptive_multiplier,
                };
            }
            return OutcomeChange::Unchanged;
        }

        if (300..400).contains(&status_code) {
            return OutcomeChange::Unchanged;
        }

        // Other client errors, non-throttle server errors, transport failures (0)
        self.consecutive_errors += 1;
        if self.consecutive_errors >= CLIENT_ERROR_THRESHOLD {
            self.adaptive_multiplier = (self.adaptive_multiplier * 0.8).max(MIN_MULTIPLIER);
            return OutcomeChange::Adjusted {
                multiplier: self.adaptive_multiplier,
            };
        }
        OutcomeChange::Unchanged
    }

    pub fn stats(&self) -> DomainStats {
        DomainStats {
            domain: self.domain.clone(),
            base_rate: self.base_rate,
            burst_capacity: self.burst_capacity,
            current_burst: self.current_burst,
            adaptive_multiplier: self.adaptive_multiplier,
            consecutive_errors: self.consecutive_errors,
            backoff_until: self.backoff_until,
            total_requests: self.total_requests,
            throttle_hits: self.throttle_hits,
        }
    }
}

/// Scale factor applied to the minimum interval; higher priority waits less.
pub fn priority_multiplier(priority: u8) -> f64 {
    (1.0 - (priority as f64 - 5.0) * 0.1).max(0.1)
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at `max`.
pub fn backoff_delay(consecutive_errors: u32, max: Duration) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(31);
    let millis = 1000u64.saturating_mul(1u64 << exponent);
    Duration::from_millis(millis).min(max)
}

/// Perturb a wait by `offset` (a fraction, clamped to ±20%).
///
/// The result is never negative and never more than 20% away from `wait`.
pub fn jittered_wait(wait: Duration, offset: f64) -> Duration {
    if wait.is_zero() || !offset.is_finite() {
        return wait;
    }
    let offset = offset.clamp(-JITTER_FRACTION, JITTER_FRACTION);
    let secs = (wait.as_secs_f64() * (1.0 + offset)).max(0.0);
    Duration::from_secs_f64(secs)
}
