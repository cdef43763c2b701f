//! Adaptive per-domain rate limiting.
//!
//! Every outbound request to a recipe source goes through
//! [`AdaptiveRateLimiter::wait_for_slot`], and every response is reported
//! back through [`AdaptiveRateLimiter::report_outcome`] so the pace can
//! tighten on throttling and relax again on healthy responses.

mod config;
mod domain_state;
mod limiter;

pub use config::{DomainStats, RateLimitConfig, DEFAULT_PRIORITY, THROTTLE_STATUS_CODES};
pub use domain_state::{backoff_delay, priority_multiplier, DomainRateState, OutcomeChange};
pub use limiter::AdaptiveRateLimiter;
