//! Key/value persistence effect
//!
//! Persistent tables are key spaces under a shared store. Every owner of
//! mutable state serializes its whole table under one key after each
//! committed mutation.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::UmbraError;

/// Storage keys for the persisted tables
pub mod keys {
    /// Ad event history
    pub const AD_EVENTS: &str = "ad_events";
    /// Redemption queue
    pub const CONFIRMATION_QUEUE: &str = "confirmation_queue";
    /// Unspent confirmation tokens
    pub const UNBLINDED_TOKENS: &str = "unblinded_tokens";
    /// Redeemed payment tokens awaiting payout
    pub const UNBLINDED_PAYMENT_TOKENS: &str = "unblinded_payment_tokens";
    /// Transaction history
    pub const TRANSACTIONS: &str = "transactions";
    /// Epsilon-greedy bandit arms
    pub const BANDIT_ARMS: &str = "bandit_arms";
}

/// Storage operation errors
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum StorageError {
    /// Reading failed
    #[error("Read failed: {0}")]
    ReadFailed(String),
    /// Writing failed
    #[error("Write failed: {0}")]
    WriteFailed(String),
    /// Deleting failed
    #[error("Delete failed: {0}")]
    DeleteFailed(String),
    /// Listing keys failed
    #[error("List failed: {0}")]
    ListFailed(String),
}

impl From<StorageError> for UmbraError {
    fn from(err: StorageError) -> Self {
        UmbraError::storage(err.to_string())
    }
}

/// Storage statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Number of keys
    pub key_count: u64,
    /// Total stored bytes
    pub total_size: u64,
    /// Backend name
    pub backend_type: String,
}

/// Key/value storage
#[async_trait]
pub trait StorageEffects: Send + Sync {
    /// Store a value under a key, replacing any previous value
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    /// Read a value
    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    /// Delete a value, returning whether it existed
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;
    /// List keys, optionally filtered by prefix
    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError>;
    /// Whether a key exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
    /// Store several values
    async fn store_batch(&self, pairs: HashMap<String, Vec<u8>>) -> Result<(), StorageError> {
        for (key, value) in pairs {
            self.store(&key, value).await?;
        }
        Ok(())
    }
    /// Storage statistics
    async fn stats(&self) -> Result<StorageStats, StorageError>;
}

#[async_trait]
impl<T: StorageEffects + ?Sized> StorageEffects for Arc<T> {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        (**self).store(key, value).await
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).retrieve(key).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        (**self).remove(key).await
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        (**self).list_keys(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        (**self).exists(key).await
    }

    async fn store_batch(&self, pairs: HashMap<String, Vec<u8>>) -> Result<(), StorageError> {
        (**self).store_batch(pairs).await
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        (**self).stats().await
    }
}

/// Serialize `value` as JSON under `key`
pub async fn store_json<T: Serialize + Sync>(
    storage: &dyn StorageEffects,
    key: &str,
    value: &T,
) -> Result<(), UmbraError> {
    let bytes = serde_json::to_vec(value)?;
    storage.store(key, bytes).await?;
    Ok(())
}

/// Load a JSON value from `key`, `None` if absent
pub async fn load_json<T: DeserializeOwned>(
    storage: &dyn StorageEffects,
    key: &str,
) -> Result<Option<T>, UmbraError> {
    match storage.retrieve(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}
