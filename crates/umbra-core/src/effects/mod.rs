//! Effect traits
//!
//! Every side effect the engine performs (clock, randomness, persistence,
//! network, platform queries) goes through one of these traits. Handlers
//! live in `umbra-effects` (production) and `umbra-testkit` (deterministic).
//! A concrete set is chosen once at startup and bundled in [`UmbraEffects`],
//! which is passed explicitly to every component that needs it.

pub mod network;
pub mod platform;
pub mod random;
pub mod storage;
pub mod time;

pub use network::{NetworkEffects, NetworkError, UrlMethod, UrlRequest, UrlResponse};
pub use platform::PlatformEffects;
pub use random::RandomEffects;
pub use storage::{keys as storage_keys, StorageEffects, StorageError, StorageStats};
pub use time::{PhysicalTimeEffects, TimeError};

use std::sync::Arc;

/// The capability bundle injected at startup
#[derive(Clone)]
pub struct UmbraEffects {
    /// Wall clock
    pub time: Arc<dyn PhysicalTimeEffects>,
    /// Randomness
    pub random: Arc<dyn RandomEffects>,
    /// Persistence
    pub storage: Arc<dyn StorageEffects>,
    /// Transport
    pub network: Arc<dyn NetworkEffects>,
    /// Platform queries
    pub platform: Arc<dyn PlatformEffects>,
}

impl UmbraEffects {
    /// Bundle a set of handlers
    pub fn new(
        time: Arc<dyn PhysicalTimeEffects>,
        random: Arc<dyn RandomEffects>,
        storage: Arc<dyn StorageEffects>,
        network: Arc<dyn NetworkEffects>,
        platform: Arc<dyn PlatformEffects>,
    ) -> Self {
        Self {
            time,
            random,
            storage,
            network,
            platform,
        }
    }

    /// Current time, mapped into the unified error type
    pub async fn now(&self) -> crate::Result<crate::time::PhysicalTime> {
        Ok(self.time.physical_time().await?)
    }
}

impl std::fmt::Debug for UmbraEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UmbraEffects").finish_non_exhaustive()
    }
}
