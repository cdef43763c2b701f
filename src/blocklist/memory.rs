//! In-memory block store.
//!
//! State is not persisted across restarts.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::record::BlockRecord;
use super::store::{BlockSnapshot, BlockStore, BlockStoreResult, RecordUpdate};

#[derive(Debug, Default)]
pub struct InMemoryBlockStore {
    records: RwLock<BlockSnapshot>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn load_all(&self) -> BlockStoreResult<BlockSnapshot> {
        Ok(self.records.read().await.clone())
    }

    async fn save_all(&self, records: &BlockSnapshot) -> BlockStoreResult<()> {
        *self.records.write().await = records.clone();
        Ok(())
    }

    async fn get(&self, domain: &str) -> BlockStoreResult<Option<BlockRecord>> {
        Ok(self.records.read().await.get(domain).cloned())
    }

    async fn update(
        &self,
        domain: &str,
        apply: RecordUpdate,
    ) -> BlockStoreResult<Option<BlockRecord>> {
        let mut records = self.records.write().await;
        let current = records.remove(domain);
        let next = apply(current);
        if let Some(record) = &next {
            records.insert(domain.to_string(), record.clone());
        }
        Ok(next)
    }

    async fn remove(&self, domain: &str) -> BlockStoreResult<bool> {
        Ok(self.records.write().await.remove(domain).is_some())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_update_inserts_and_deletes() {
        let store = InMemoryBlockStore::new();

        let stored = store
            .update(
                "site.com",
                Box::new(|current| {
                    assert!(current.is_none());
                    let mut record = BlockRecord::new("site.com", "timeout", Utc::now());
                    record.attempt_count = 1;
                    Some(record)
                }),
            )
            .await
            .unwrap();
        assert_eq!(stored.unwrap().attempt_count, 1);
        assert!(store.get("site.com").await.unwrap().is_some());

        store.update("site.com", Box::new(|_| None)).await.unwrap();
        assert!(store.get("site.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let store = std::sync::Arc::new(InMemoryBlockStore::new());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(
                        "site.com",
                        Box::new(|current| {
                            let mut record = current.unwrap_or_else(|| {
                                BlockRecord::new("site.com", "timeout", Utc::now())
                            });
                            record.attempt_count += 1;
                            Some(record)
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get("site.com").await.unwrap().unwrap();
        assert_eq!(record.attempt_count, 20);
    }
}
