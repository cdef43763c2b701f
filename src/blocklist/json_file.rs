//! JSON snapshot file block store.
//!
//! The whole map is stored as `{ "<domain>": BlockRecord }`. Every operation
//! runs under an in-process lock and writes go to a temporary file that is
//! renamed over the snapshot, so a crash never leaves a half-written file.
//! Not safe for several processes sharing one file; use SQLite for that.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::record::BlockRecord;
use super::store::{BlockSnapshot, BlockStore, BlockStoreResult, RecordUpdate};

#[derive(Debug)]
pub struct JsonFileBlockStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileBlockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_snapshot(&self) -> BlockStoreResult<BlockSnapshot> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BlockSnapshot::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BlockSnapshot::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_snapshot(&self, records: &BlockSnapshot) -> BlockStoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            "Wrote {} block records to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl BlockStore for JsonFileBlockStore {
    async fn load_all(&self) -> BlockStoreResult<BlockSnapshot> {
        let _guard = self.lock.lock().await;
        self.read_snapshot().await
    }

    async fn save_all(&self, records: &BlockSnapshot) -> BlockStoreResult<()> {
        let _guard = self.lock.lock().await;
        self.write_snapshot(records).await
    }

    async fn get(&self, domain: &str) -> BlockStoreResult<Option<BlockRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_snapshot().await?.remove(domain))
    }

    async fn update(
        &self,
        domain: &str,
        apply: RecordUpdate,
    ) -> BlockStoreResult<Option<BlockRecord>> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_snapshot().await?;
        let current = records.remove(domain);
        let had_record = current.is_some();
        let next = apply(current);

        match &next {
            Some(record) => {
                records.insert(domain.to_string(), record.clone());
            }
            None if !had_record => return Ok(None),
            None => {}
        }
        self.write_snapshot(&records).await?;
        Ok(next)
    }

    async fn remove(&self, domain: &str) -> BlockStoreResult<bool> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_snapshot().await?;
        if records.remove(domain).is_none() {
            return Ok(false);
        }
        self.write_snapshot(&records).await?;
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(domain: &str, attempts: u32) -> BlockRecord {
        let mut record = BlockRecord::new(domain, "403 Forbidden", Utc::now());
        record.attempt_count = attempts;
        record
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileBlockStore::new(dir.path().join("blocks.json"));
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(!store.remove("site.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("blocks.json");

        {
            let store = JsonFileBlockStore::new(&path);
            store
                .update("site.com", Box::new(|_| Some(record("site.com", 3))))
                .await
                .unwrap();
        }

        let reopened = JsonFileBlockStore::new(&path);
        let stored = reopened.get("site.com").await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 3);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["site.com"]["errorType"], "authentication");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_all_replaces_contents() {
        let dir = tempdir().unwrap();
        let store = JsonFileBlockStore::new(dir.path().join("blocks.json"));
        store
            .update("old.com", Box::new(|_| Some(record("old.com", 1))))
            .await
            .unwrap();

        let mut snapshot = BlockSnapshot::new();
        snapshot.insert("new.com".to_string(), record("new.com", 2));
        store.save_all(&snapshot).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("new.com"));
    }
}
