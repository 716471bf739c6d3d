//! Seeded randomness

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::VecDeque;
use umbra_core::effects::RandomEffects;

/// Reproducible randomness. Scripted unit draws are consumed first by
/// [`RandomEffects::random_unit`]; everything else comes from the seeded
/// ChaCha stream.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<ChaCha20Rng>,
    units: Mutex<VecDeque<f64>>,
}

impl SeededRandom {
    /// Stream for `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
            units: Mutex::new(VecDeque::new()),
        }
    }

    /// Stream for `seed` whose first unit draws are `units`
    pub fn with_units(seed: u64, units: impl IntoIterator<Item = f64>) -> Self {
        let random = Self::new(seed);
        random.push_units(units);
        random
    }

    /// Queue more scripted unit draws
    pub fn push_units(&self, units: impl IntoIterator<Item = f64>) {
        self.units.lock().extend(units);
    }
}

#[async_trait]
impl RandomEffects for SeededRandom {
    async fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.rng.lock().fill_bytes(&mut bytes);
        bytes
    }

    async fn random_bytes_32(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.rng.lock().fill_bytes(&mut bytes);
        bytes
    }

    async fn random_u64(&self) -> u64 {
        self.rng.lock().next_u64()
    }

    async fn random_unit(&self) -> f64 {
        let scripted = self.units.lock().pop_front();
        if let Some(unit) = scripted {
            return unit;
        }
        (self.random_u64().await >> 11) as f64 / (1u64 << 53) as f64
    }
}
