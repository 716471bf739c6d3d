//! In-memory storage handler

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use umbra_core::effects::{StorageEffects, StorageError, StorageStats};

/// In-memory storage handler for tests and ephemeral profiles
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageHandler {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorageHandler {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with data
    pub fn with_data(data: HashMap<String, Vec<u8>>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Copy of everything stored, for inspection in tests
    pub async fn snapshot(&self) -> HashMap<String, Vec<u8>> {
        self.data.read().await.clone()
    }
}

#[async_trait]
impl StorageEffects for MemoryStorageHandler {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = match prefix {
            Some(prefix) => data
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            None => data.keys().cloned().collect(),
        };
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }

    async fn store_batch(&self, pairs: HashMap<String, Vec<u8>>) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.extend(pairs);
        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let data = self.data.read().await;
        let total_size = data.values().map(|v| v.len() as u64).sum();
        Ok(StorageStats {
            key_count: data.len() as u64,
            total_size,
            backend_type: "memory".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let storage = MemoryStorageHandler::new();
        storage.store("ad_events", b"[]".to_vec()).await.unwrap();
        storage.store("transactions", b"[1]".to_vec()).await.unwrap();

        assert_eq!(
            storage.retrieve("ad_events").await.unwrap(),
            Some(b"[]".to_vec())
        );
        assert!(storage.exists("transactions").await.unwrap());
        assert_eq!(
            storage.list_keys(Some("ad_")).await.unwrap(),
            vec!["ad_events".to_string()]
        );

        assert!(storage.remove("ad_events").await.unwrap());
        assert!(!storage.remove("ad_events").await.unwrap());

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.key_count, 1);
        assert_eq!(stats.total_size, 3);
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let storage = MemoryStorageHandler::new();
        let clone = storage.clone();
        storage.store("k", vec![1]).await.unwrap();
        assert_eq!(clone.retrieve("k").await.unwrap(), Some(vec![1]));
    }
}
