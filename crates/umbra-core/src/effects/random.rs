//! Randomness effect
//!
//! Every random draw in the engine (token pre-images, blinding factors,
//! pacing draws, bandit exploration, backoff jitter) goes through this trait
//! so tests can pin outcomes with a seeded handler.

use async_trait::async_trait;
use std::sync::Arc;

/// Source of randomness
#[async_trait]
pub trait RandomEffects: Send + Sync {
    /// `len` random bytes
    async fn random_bytes(&self, len: usize) -> Vec<u8>;

    /// 32 random bytes
    async fn random_bytes_32(&self) -> [u8; 32];

    /// A random u64
    async fn random_u64(&self) -> u64;

    /// A uniform draw in `[0, 1)`
    async fn random_unit(&self) -> f64 {
        // 53 significant bits fill an f64 mantissa exactly
        (self.random_u64().await >> 11) as f64 / (1u64 << 53) as f64
    }

    /// 64 random bytes, used for wide scalar reduction
    async fn random_bytes_64(&self) -> [u8; 64] {
        let bytes = self.random_bytes(64).await;
        let mut out = [0u8; 64];
        let n = bytes.len().min(64);
        out[..n].copy_from_slice(&bytes[..n]);
        out
    }
}

#[async_trait]
impl<T: RandomEffects + ?Sized> RandomEffects for Arc<T> {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        (**self).random_bytes(len).await
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        (**self).random_bytes_32().await
    }

    async fn random_u64(&self) -> u64 {
        (**self).random_u64().await
    }

    async fn random_unit(&self) -> f64 {
        (**self).random_unit().await
    }

    async fn random_bytes_64(&self) -> [u8; 64] {
        (**self).random_bytes_64().await
    }
}
