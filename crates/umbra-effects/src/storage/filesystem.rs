//! Filesystem storage handler
//!
//! One file per key under a root directory. Key names are hex-encoded into
//! file names so any key is a safe path component. Writes go to a temporary
//! sibling first and are renamed into place, so a crash mid-write leaves
//! either the old or the new value on disk.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use umbra_core::effects::{StorageEffects, StorageError, StorageStats};

const VALUE_EXTENSION: &str = "bin";
const TEMP_EXTENSION: &str = "tmp";

/// Filesystem-backed storage
#[derive(Debug, Clone)]
pub struct FilesystemStorageHandler {
    root: PathBuf,
}

impl FilesystemStorageHandler {
    /// Use `root` as the storage directory, creating it if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{}: {e}", root.display())))?;
        debug!(root = %root.display(), "opened filesystem storage");
        Ok(Self { root })
    }

    /// Storage directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{VALUE_EXTENSION}", hex::encode(key.as_bytes())))
    }

    fn key_for(path: &Path) -> Option<String> {
        if path.extension()? != VALUE_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        String::from_utf8(hex::decode(stem).ok()?).ok()
    }
}

#[async_trait]
impl StorageEffects for FilesystemStorageHandler {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let temp = path.with_extension(TEMP_EXTENSION);

        let mut file = fs::File::create(&temp)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{key}: {e}")))?;
        file.write_all(&value)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{key}: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{key}: {e}")))?;
        drop(file);

        fs::rename(&temp, &path)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{key}: {e}")))
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed(format!("{key}: {e}"))),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed(format!("{key}: {e}"))),
        }
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::ListFailed(e.to_string()))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::ListFailed(e.to_string()))?
        {
            if let Some(key) = Self::key_for(&entry.path()) {
                if prefix.map_or(true, |p| key.starts_with(p)) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        fs::try_exists(self.path_for(key))
            .await
            .map_err(|e| StorageError::ReadFailed(format!("{key}: {e}")))
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let mut key_count = 0;
        let mut total_size = 0;
        for key in self.list_keys(None).await? {
            let metadata = fs::metadata(self.path_for(&key))
                .await
                .map_err(|e| StorageError::ReadFailed(format!("{key}: {e}")))?;
            key_count += 1;
            total_size += metadata.len();
        }
        Ok(StorageStats {
            key_count,
            total_size,
            backend_type: "filesystem".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FilesystemStorageHandler::open(dir.path()).await.unwrap();
            storage
                .store("confirmation_queue", b"{\"items\":[]}".to_vec())
                .await
                .unwrap();
        }

        let storage = FilesystemStorageHandler::open(dir.path()).await.unwrap();
        assert_eq!(
            storage.retrieve("confirmation_queue").await.unwrap(),
            Some(b"{\"items\":[]}".to_vec())
        );
        assert_eq!(
            storage.list_keys(None).await.unwrap(),
            vec!["confirmation_queue".to_string()]
        );
    }

    #[tokio::test]
    async fn test_awkward_keys_and_missing_values() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorageHandler::open(dir.path()).await.unwrap();

        storage.store("../escape/attempt", vec![1, 2]).await.unwrap();
        assert!(storage.exists("../escape/attempt").await.unwrap());
        assert_eq!(storage.retrieve("absent").await.unwrap(), None);
        assert!(!storage.remove("absent").await.unwrap());

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.key_count, 1);
        assert_eq!(stats.total_size, 2);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorageHandler::open(dir.path()).await.unwrap();
        storage.store("k", vec![1; 100]).await.unwrap();
        storage.store("k", vec![2]).await.unwrap();
        assert_eq!(storage.retrieve("k").await.unwrap(), Some(vec![2]));
    }
}
