//! Controllable clock

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use umbra_core::effects::{PhysicalTimeEffects, TimeError};
use umbra_core::PhysicalTime;

/// Wall clock under test control. Clones share the same clock.
#[derive(Debug, Clone)]
pub struct ControllableTime {
    current_ms: Arc<Mutex<u64>>,
}

impl ControllableTime {
    /// Clock starting at `initial_ms`
    pub fn new(initial_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(Mutex::new(initial_ms)),
        }
    }

    /// Set absolute time
    pub fn set_ms(&self, ms: u64) {
        *self.current_ms.lock() = ms;
    }

    /// Advance by `ms`
    pub fn advance_ms(&self, ms: u64) {
        let mut current = self.current_ms.lock();
        *current = current.saturating_add(ms);
    }

    /// Current time
    pub fn now(&self) -> PhysicalTime {
        PhysicalTime::from_ms(*self.current_ms.lock())
    }
}

#[async_trait]
impl PhysicalTimeEffects for ControllableTime {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        Ok(self.now())
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        // Don't actually sleep in tests; let other tasks run instead
        self.advance_ms(ms);
        tokio::task::yield_now().await;
        Ok(())
    }
}
