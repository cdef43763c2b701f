//! SQLite block store.
//!
//! Each operation opens its own connection on a blocking thread. Updates run
//! inside `BEGIN IMMEDIATE` transactions, so concurrent writers in this or
//! other processes serialize on the database write lock instead of
//! overwriting each other.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::record::{BlockErrorType, BlockRecord};
use super::store::{BlockSnapshot, BlockStore, BlockStoreError, BlockStoreResult, RecordUpdate};

const SELECT_COLUMNS: &str = "domain, reason, error_type, first_failed_at, last_attempt_at, \
     attempt_count, is_temporary, cooldown_until";

#[derive(Debug, Clone)]
pub struct SqliteBlockStore {
    db_path: PathBuf,
}

impl SqliteBlockStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` against a fresh connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> BlockStoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> BlockStoreResult<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_db(&path)?;
            f(&mut conn)
        })
        .await?
    }
}

/// Open a database connection with proper concurrency settings.
fn open_db(db_path: &Path) -> BlockStoreResult<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA busy_timeout = 30000;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS block_records (
            domain TEXT PRIMARY KEY,
            reason TEXT NOT NULL,
            error_type TEXT NOT NULL,
            first_failed_at TEXT NOT NULL,
            last_attempt_at TEXT NOT NULL,
            attempt_count INTEGER NOT NULL,
            is_temporary INTEGER NOT NULL DEFAULT 1,
            cooldown_until TEXT
        );
    "#,
    )?;
    Ok(conn)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<BlockRecord> {
    let error_type: String = row.get(2)?;
    Ok(BlockRecord {
        domain: row.get(0)?,
        reason: row.get(1)?,
        error_type: error_type.parse().unwrap_or(BlockErrorType::Other),
        first_failed_at: row.get(3)?,
        last_attempt_at: row.get(4)?,
        attempt_count: row.get::<_, i64>(5)?.max(0) as u32,
        is_temporary: row.get::<_, i64>(6)? != 0,
        cooldown_until: row.get(7)?,
    })
}

fn select_one(conn: &Connection, domain: &str) -> rusqlite::Result<Option<BlockRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM block_records WHERE domain = ?1", SELECT_COLUMNS),
        params![domain],
        record_from_row,
    )
    .optional()
}

fn upsert(conn: &Connection, record: &BlockRecord) -> rusqlite::Result<()> {
    conn.execute(
        r#"INSERT OR REPLACE INTO block_records
           (domain, reason, error_type, first_failed_at, last_attempt_at,
            attempt_count, is_temporary, cooldown_until)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        params![
            record.domain,
            record.reason,
            record.error_type.as_str(),
            record.first_failed_at,
            record.last_attempt_at,
            record.attempt_count as i64,
            record.is_temporary as i64,
            record.cooldown_until,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl BlockStore for SqliteBlockStore {
    async fn load_all(&self) -> BlockStoreResult<BlockSnapshot> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM block_records ORDER BY domain",
                SELECT_COLUMNS
            ))?;
            let rows = stmt.query_map([], record_from_row)?;

            let mut records = BlockSnapshot::new();
            for row in rows {
                let record = row?;
                records.insert(record.domain.clone(), record);
            }
            Ok(records)
        })
        .await
    }

    async fn save_all(&self, records: &BlockSnapshot) -> BlockStoreResult<()> {
        let records: Vec<BlockRecord> = records.values().cloned().collect();
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM block_records", [])?;
            for record in &records {
                upsert(&tx, record)?;
            }
            tx.commit()?;
            debug!("Saved {} block records to database", records.len());
            Ok(())
        })
        .await
    }

    async fn get(&self, domain: &str) -> BlockStoreResult<Option<BlockRecord>> {
        let domain = domain.to_string();
        self.with_connection(move |conn| Ok(select_one(conn, &domain)?))
            .await
    }

    async fn update(
        &self,
        domain: &str,
        apply: RecordUpdate,
    ) -> BlockStoreResult<Option<BlockRecord>> {
        let domain = domain.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = select_one(&tx, &domain)?;
            let next = apply(current);

            match &next {
                Some(record) => {
                    if record.domain != domain {
                        return Err(BlockStoreError::Database(format!(
                            "update for {} returned record for {}",
                            domain, record.domain
                        )));
                    }
                    upsert(&tx, record)?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM block_records WHERE domain = ?1",
                        params![domain],
                    )?;
                }
            }
            tx.commit()?;
            Ok(next)
        })
        .await
    }

    async fn remove(&self, domain: &str) -> BlockStoreResult<bool> {
        let domain = domain.to_string();
        self.with_connection(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM block_records WHERE domain = ?1",
                params![domain],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
