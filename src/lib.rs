//! larder - polite, resilient multi-source recipe aggregation.
//!
//! The orchestration layer decides when a source may be called
//! ([`rate_limit`]), whether it is currently unsafe to call ([`blocklist`]),
//! and how competing results for one recipe are combined ([`aggregate`]).

pub mod aggregate;
pub mod blocklist;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod rate_limit;
pub mod sources;
pub mod utils;
