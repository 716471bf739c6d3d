//! Deterministic effect bundle

use std::sync::Arc;
use umbra_core::UmbraEffects;

use crate::fixtures::FIXTURE_NOW_MS;
use crate::{ControllableTime, FaultyStorage, MockLedger, MockPlatform, SeededRandom};

/// Every deterministic handler, kept concrete so tests can drive them
#[derive(Debug, Clone)]
pub struct TestEffects {
    /// Clock, starting at [`FIXTURE_NOW_MS`]
    pub time: Arc<ControllableTime>,
    /// Seeded randomness
    pub random: Arc<SeededRandom>,
    /// In-memory storage with scriptable write failures
    pub storage: Arc<FaultyStorage>,
    /// Mock ledger as the network
    pub ledger: Arc<MockLedger>,
    /// Settable platform
    pub platform: Arc<MockPlatform>,
}

impl TestEffects {
    /// Handlers seeded from `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            time: Arc::new(ControllableTime::new(FIXTURE_NOW_MS)),
            random: Arc::new(SeededRandom::new(seed)),
            storage: Arc::new(FaultyStorage::new()),
            ledger: Arc::new(MockLedger::new(seed)),
            platform: Arc::new(MockPlatform::new()),
        }
    }

    /// Same handlers with a different randomness source
    pub fn with_random(mut self, random: SeededRandom) -> Self {
        self.random = Arc::new(random);
        self
    }

    /// Bundle for code under test
    pub fn effects(&self) -> UmbraEffects {
        UmbraEffects::new(
            self.time.clone(),
            self.random.clone(),
            self.storage.clone(),
            self.ledger.clone(),
            self.platform.clone(),
        )
    }
}
