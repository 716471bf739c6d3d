//! Storage with scripted write failures

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use umbra_core::effects::{StorageEffects, StorageError, StorageStats};
use umbra_effects::MemoryStorageHandler;

/// In-memory storage whose writes to chosen keys can be made to fail
#[derive(Debug, Default)]
pub struct FaultyStorage {
    inner: MemoryStorageHandler,
    failing_writes: Mutex<HashMap<String, usize>>,
}

impl FaultyStorage {
    /// Empty store with no failures scripted
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes to `key`
    pub fn fail_writes(&self, key: &str, count: usize) {
        self.failing_writes.lock().insert(key.to_string(), count);
    }

    /// Copy of everything stored
    pub async fn snapshot(&self) -> HashMap<String, Vec<u8>> {
        self.inner.snapshot().await
    }

    fn take_failure(&self, key: &str) -> bool {
        let mut failing = self.failing_writes.lock();
        match failing.get_mut(key) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl StorageEffects for FaultyStorage {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        if self.take_failure(key) {
            return Err(StorageError::WriteFailed(format!("scripted failure for {key}")));
        }
        self.inner.store(key, value).await
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.retrieve(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.remove(key).await
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        self.inner.list_keys(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        self.inner.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures_run_out() {
        let storage = FaultyStorage::new();
        storage.fail_writes("k", 1);

        assert!(storage.store("k", vec![1]).await.is_err());
        assert!(storage.store("other", vec![1]).await.is_ok());
        storage.store("k", vec![2]).await.unwrap();
        assert_eq!(storage.retrieve("k").await.unwrap(), Some(vec![2]));
    }
}
