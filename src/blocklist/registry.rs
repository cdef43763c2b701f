//! Failure-driven domain block registry.
//!
//! Domains move through three states:
//! - active: no record, or a record below the block threshold
//! - temporary: `block_threshold` failures, skipped until the cooldown ends
//! - permanent: `permanent_threshold` failures, skipped until unblocked
//!
//! Successes decay the failure count; cooldown expiry is applied lazily on
//! the next [`BlockRegistry::is_blocked`] check.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::memory::InMemoryBlockStore;
use super::record::{classify_error, BlockRecord};
use super::store::{BlockStore, BlockStoreResult};
use crate::utils::url::extract_domain;

/// Thresholds governing block transitions.
#[derive(Debug, Clone)]
pub struct BlockPolicy {
    /// Failures before a domain enters cooldown.
    pub block_threshold: u32,
    /// Failures before a domain is blocked for good.
    pub permanent_threshold: u32,
    /// Length of a temporary block, refreshed by each further failure.
    pub cooldown: Duration,
    /// Failure count removed by each success.
    pub success_decrement: u32,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self {
            block_threshold: 5,
            permanent_threshold: 20,
            cooldown: Duration::hours(1),
            success_decrement: 2,
        }
    }
}

/// Shared, persistent record of which domains are unsafe to call.
///
/// Cloning is cheap and clones share the underlying store. Store failures
/// are logged and treated as "not blocked" so a broken store never stops
/// scraping; the listing APIs return them to the caller.
#[derive(Clone)]
pub struct BlockRegistry {
    store: Arc<dyn BlockStore>,
    policy: BlockPolicy,
}

impl BlockRegistry {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self::with_policy(store, BlockPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn BlockStore>, policy: BlockPolicy) -> Self {
        Self { store, policy }
    }

    /// Registry backed by an ephemeral in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBlockStore::new()))
    }

    pub fn policy(&self) -> &BlockPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Whether requests to `url`'s domain should be skipped right now.
    pub async fn is_blocked(&self, url: &str) -> bool {
        self.is_blocked_at(url, Utc::now()).await
    }

    pub async fn is_blocked_at(&self, url: &str, now: DateTime<Utc>) -> bool {
        let Some(domain) = extract_domain(url) else {
            return false;
        };

        let record = match self.store.get(&domain).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!("Block store lookup for {} failed: {}", domain, e);
                return false;
            }
        };

        if record.blocks_at(now) {
            return true;
        }

        if record.cooldown_until.is_some() {
            self.expire_cooldown(&domain, now).await;
        }
        false
    }

    /// Clear a lapsed cooldown. The failure count is kept.
    ///
    /// Returns false when a concurrent failure renewed the cooldown first.
    async fn expire_cooldown(&self, domain: &str, now: DateTime<Utc>) -> bool {
        let result = self
            .store
            .update(
                domain,
                Box::new(move |current| {
                    current.map(|mut record| {
                        if record.cooldown_until.is_some_and(|until| until <= now) {
                            record.cooldown_until = None;
                        }
                        record
                    })
                }),
            )
            .await;

        match result {
            Ok(Some(record)) if record.cooldown_until.is_none() => {
                info!(
                    "Cooldown for {} expired, unblocking ({} failures on record)",
                    domain, record.attempt_count
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Failed to clear cooldown for {}: {}", domain, e);
                false
            }
        }
    }

    /// Record a failed request and re-evaluate the domain's block state.
    ///
    /// Returns the updated record, or `None` if the URL has no domain or the
    /// store could not be updated.
    pub async fn record_failure(&self, url: &str, message: &str) -> Option<BlockRecord> {
        self.record_failure_at(url, message, Utc::now()).await
    }

    pub async fn record_failure_at(
        &self,
        url: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Option<BlockRecord> {
        let domain = extract_domain(url)?;
        let policy = self.policy.clone();
        let reason = message.to_string();
        let key = domain.clone();

        let result = self
            .store
            .update(
                &domain,
                Box::new(move |current| {
                    let mut record =
                        current.unwrap_or_else(|| BlockRecord::new(&key, &reason, now));
                    apply_failure(&mut record, &reason, now, &policy);
                    Some(record)
                }),
            )
            .await;

        let record = match result {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to record failure for {}: {}", domain, e);
                return None;
            }
        };

        if record.attempt_count == self.policy.permanent_threshold {
            warn!(
                "Permanently blocking {} after {} failures ({}): {}",
                domain, record.attempt_count, record.error_type, record.reason
            );
        } else if record.attempt_count == self.policy.block_threshold {
            warn!(
                "Temporarily blocking {} for {} min after {} failures ({}): {}",
                domain,
                self.policy.cooldown.num_minutes(),
                record.attempt_count,
                record.error_type,
                record.reason
            );
        } else {
            debug!(
                "Failure {} for {} ({})",
                record.attempt_count, domain, record.error_type
            );
        }

        Some(record)
    }

    /// Record a successful request, decaying the failure count.
    ///
    /// Returns the remaining record, or `None` once it has been cleared.
    /// Permanent blocks are not affected.
    pub async fn record_success(&self, url: &str) -> Option<BlockRecord> {
        let domain = extract_domain(url)?;

        // Fast path: most domains have no record at all
        match self.store.get(&domain).await {
            Ok(None) => return None,
            Ok(Some(_)) => {}
            Err(e) => {
                warn!("Block store lookup for {} failed: {}", domain, e);
                return None;
            }
        }

        let policy = self.policy.clone();
        let result = self
            .store
            .update(
                &domain,
                Box::new(move |current| {
                    let mut record = current?;
                    if record.is_permanent() {
                        return Some(record);
                    }
                    record.attempt_count =
                        record.attempt_count.saturating_sub(policy.success_decrement);
                    if record.attempt_count == 0 {
                        return None;
                    }
                    if record.attempt_count < policy.block_threshold {
                        record.cooldown_until = None;
                    }
                    Some(record)
                }),
            )
            .await;

        match result {
            Ok(Some(record)) => {
                debug!(
                    "Success for {}, {} failures remain",
                    domain, record.attempt_count
                );
                Some(record)
            }
            Ok(None) => {
                info!("Cleared failure record for {}", domain);
                None
            }
            Err(e) => {
                warn!("Failed to record success for {}: {}", domain, e);
                None
            }
        }
    }

    /// Manually unblock a domain, deleting its record.
    pub async fn unblock(&self, domain: &str) -> BlockStoreResult<bool> {
        let domain = extract_domain(domain).unwrap_or_else(|| domain.to_lowercase());
        let removed = self.store.remove(&domain).await?;
        if removed {
            info!("Manually unblocked {}", domain);
        }
        Ok(removed)
    }

    /// Fetch one domain's record.
    pub async fn get(&self, domain: &str) -> BlockStoreResult<Option<BlockRecord>> {
        let Some(domain) = extract_domain(domain) else {
            return Ok(None);
        };
        self.store.get(&domain).await
    }

    /// All records, sorted by domain.
    pub async fn list(&self) -> BlockStoreResult<Vec<BlockRecord>> {
        let mut records: Vec<BlockRecord> = self.store.load_all().await?.into_values().collect();
        records.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(records)
    }
}

/// Count one failure against `record` and move it through the state machine.
fn apply_failure(record: &mut BlockRecord, reason: &str, now: DateTime<Utc>, policy: &BlockPolicy) {
    record.attempt_count = record.attempt_count.saturating_add(1);
    record.reason = reason.to_string();
    record.error_type = classify_error(reason);
    record.last_attempt_at = now;

    if record.attempt_count >= policy.permanent_threshold {
        record.is_temporary = false;
        record.cooldown_until = None;
    } else if record.is_temporary && record.attempt_count >= policy.block_threshold {
        record.cooldown_until = Some(now + policy.cooldown);
    }
}

impl std::fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRegistry")
            .field("backend", &self.store.backend_name())
            .field("policy", &self.policy)
            .finish()
    }
}
