//! Random effect handler
//!
//! This is the effect handler layer where actual system randomness is
//! provided, so it legitimately uses `rand::thread_rng()`.

use async_trait::async_trait;
use rand::{Rng, RngCore};
use umbra_core::effects::RandomEffects;

/// Real random handler using the thread-local CSPRNG
#[derive(Debug, Clone, Default)]
pub struct RealRandomHandler;

impl RealRandomHandler {
    /// Create a new real random handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RandomEffects for RealRandomHandler {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    async fn random_u64(&self) -> u64 {
        rand::thread_rng().gen()
    }

    async fn random_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}
