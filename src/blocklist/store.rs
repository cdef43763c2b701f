//! Pluggable persistence for block records.
//!
//! Allows swapping between in-memory (tests, ephemeral), a JSON snapshot
//! file (single process), or SQLite (safe across processes).

use std::collections::HashMap;

use async_trait::async_trait;

use super::record::BlockRecord;

/// Result type for block store operations.
pub type BlockStoreResult<T> = Result<T, BlockStoreError>;

/// Errors from block store backends.
#[derive(Debug, thiserror::Error)]
pub enum BlockStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for BlockStoreError {
    fn from(e: rusqlite::Error) -> Self {
        BlockStoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for BlockStoreError {
    fn from(e: serde_json::Error) -> Self {
        BlockStoreError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for BlockStoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        BlockStoreError::Task(e.to_string())
    }
}

/// Snapshot of every record, keyed by domain.
pub type BlockSnapshot = HashMap<String, BlockRecord>;

/// Read-modify-write step applied atomically by [`BlockStore::update`].
///
/// Receives the current record (if any) and returns the record to store,
/// or `None` to delete it.
pub type RecordUpdate = Box<dyn FnOnce(Option<BlockRecord>) -> Option<BlockRecord> + Send>;

/// Trait for block record storage backends.
///
/// Implementations must be thread-safe; `update` must not lose writes when
/// several callers touch the same domain concurrently.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Load every stored record.
    async fn load_all(&self) -> BlockStoreResult<BlockSnapshot>;

    /// Replace the stored state with `records`.
    async fn save_all(&self, records: &BlockSnapshot) -> BlockStoreResult<()>;

    /// Fetch one domain's record.
    async fn get(&self, domain: &str) -> BlockStoreResult<Option<BlockRecord>>;

    /// Atomically transform one domain's record, returning the stored result.
    async fn update(
        &self,
        domain: &str,
        apply: RecordUpdate,
    ) -> BlockStoreResult<Option<BlockRecord>>;

    /// Delete a domain's record. Returns whether one existed.
    async fn remove(&self, domain: &str) -> BlockStoreResult<bool>;

    /// Backend name for logs and diagnostics.
    fn backend_name(&self) -> &'static str;
}
