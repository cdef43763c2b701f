//! Multi-source recipe aggregation.
//!
//! [`SourceAggregator`] walks a ranked list of [`Source`]s, gating each call
//! through the rate limiter and block registry, keeps the best fuzzy title
//! match from each, rejects near-duplicates via [`DedupIndex`], and merges
//! the survivors into one record.

mod aggregator;
mod dedup;
mod fanout;
mod merge;
mod quota;
mod recipe;
mod similarity;
mod source;

pub use aggregator::{
    best_match, AggregateError, AggregatedResult, AggregatorConfig, AttemptOutcome, Rejection,
    SourceAggregator, SourceAttempt,
};
pub use dedup::{DedupFingerprint, DedupIndex, DedupThresholds, DuplicateMatch};
pub use fanout::{fan_out, FanOutConfig};
pub use merge::{merge_candidates, MergedRecipe};
pub use quota::DailyQuota;
pub use recipe::{Recipe, SourceCandidate};
pub use similarity::{ingredient_name, normalize, similarity};
pub use source::{
    FailureKind, SearchRequest, Source, SourceError, DEFAULT_MATCH_THRESHOLD,
};
