//! In-memory document store (for testing and single-instance deployments).

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

use super::{DocumentStore, StoreError, StoreResult, VersionedDoc};

/// DashMap-backed store. Compare-and-swap writes are atomic per key
/// because the entry API holds the shard lock across the version check
/// and the insert.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: DashMap<String, VersionedDoc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents across all collections.
    pub fn count(&self) -> usize {
        self.docs.len()
    }

    /// Drop all documents.
    pub fn clear(&self) {
        self.docs.clear();
    }

    fn full_key(collection: &str, key: &str) -> String {
        format!("{}/{}", collection, key)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, collection: &str, key: &str) -> StoreResult<Option<VersionedDoc>> {
        Ok(self
            .docs
            .get(&Self::full_key(collection, key))
            .map(|doc| doc.value().clone()))
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        data: Value,
        expected: Option<u64>,
    ) -> StoreResult<u64> {
        let full_key = Self::full_key(collection, key);
        match self.docs.entry(full_key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                match expected {
                    Some(version) if version == current => {
                        let next = current + 1;
                        occupied.insert(VersionedDoc {
                            version: next,
                            data,
                        });
                        Ok(next)
                    }
                    _ => Err(StoreError::Conflict { key: full_key }),
                }
            }
            Entry::Vacant(vacant) => match expected {
                None => {
                    vacant.insert(VersionedDoc { version: 1, data });
                    Ok(1)
                }
                Some(_) => Err(StoreError::Conflict { key: full_key }),
            },
        }
    }

    async fn delete(&self, collection: &str, key: &str) -> StoreResult<bool> {
        Ok(self.docs.remove(&Self::full_key(collection, key)).is_some())
    }

    async fn list_keys(&self, collection: &str) -> StoreResult<Vec<String>> {
        let prefix = format!("{}/", collection);
        Ok(self
            .docs
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();

        let version = store
            .put("tenants", "acme", json!({ "subscriptionTier": "standard" }), None)
            .await
            .unwrap();
        assert_eq!(version, 1);

        let doc = store.get("tenants", "acme").await.unwrap().unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.data["subscriptionTier"], "standard");
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let store = MemoryStore::new();
        store.put("c", "k", json!(1), None).await.unwrap();
        store.put("c", "k", json!(2), Some(1)).await.unwrap();

        // Writer still holding version 1 must conflict.
        let err = store.put("c", "k", json!(3), Some(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let doc = store.get("c", "k").await.unwrap().unwrap();
        assert_eq!(doc.data, json!(2));
    }

    #[tokio::test]
    async fn test_create_conflicts_when_present() {
        let store = MemoryStore::new();
        store.put("c", "k", json!(1), None).await.unwrap();

        let err = store.put("c", "k", json!(2), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = MemoryStore::new();
        store.put("rate_limits", "a:billAnalysis:60s", json!(1), None).await.unwrap();
        store.put("rate_limits", "a:reportGeneration:60s", json!(1), None).await.unwrap();
        store.put("tenants", "a", json!(1), None).await.unwrap();

        let mut keys = store.list_keys("rate_limits").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a:billAnalysis:60s", "a:reportGeneration:60s"]);

        assert!(store.delete("rate_limits", "a:billAnalysis:60s").await.unwrap());
        assert!(!store.delete("rate_limits", "a:billAnalysis:60s").await.unwrap());
        assert_eq!(store.list_keys("rate_limits").await.unwrap().len(), 1);
    }
}
