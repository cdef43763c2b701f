//! Failure-driven block registry with pluggable persistence.
//!
//! Scrapers and the aggregator report failures and successes per domain;
//! the registry decides which domains are currently unsafe to call.
//! Backends:
//! - In-memory (ephemeral)
//! - JSON snapshot file (single process)
//! - SQLite (default; persistent, safe across processes)

mod json_file;
mod memory;
mod record;
mod registry;
mod sqlite;
mod store;

pub use json_file::JsonFileBlockStore;
pub use memory::InMemoryBlockStore;
pub use record::{classify_error, BlockErrorType, BlockRecord};
pub use registry::{BlockPolicy, BlockRegistry};
pub use sqlite::SqliteBlockStore;
pub use store::{
    BlockSnapshot, BlockStore, BlockStoreError, BlockStoreResult, RecordUpdate,
};
