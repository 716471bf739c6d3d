//! Umbra Testing Infrastructure
//!
//! Deterministic stand-ins for every effect plus fixtures:
//!
//! - [`ControllableTime`]: a clock tests set and advance; `sleep_ms`
//!   advances it instead of waiting
//! - [`SeededRandom`]: ChaCha-seeded randomness with optional scripted
//!   unit draws
//! - [`MockPlatform`]: settable locale, history and preferences
//! - [`FaultyStorage`]: in-memory storage with scripted write failures
//! - [`MockLedger`]: an in-process confirmation ledger that really signs
//!   tokens and proves its batches, with scripted failures
//! - [`fixtures`]: creatives and catalog feeds
//! - [`TestEffects`]: all of the above bundled into [`UmbraEffects`]
//!
//! [`UmbraEffects`]: umbra_core::UmbraEffects

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod harness;
pub mod ledger;
pub mod platform;
pub mod random;
pub mod storage;
pub mod time;

pub use fixtures::*;
pub use harness::TestEffects;
pub use ledger::{LedgerRoute, MockLedger};
pub use platform::MockPlatform;
pub use random::SeededRandom;
pub use storage::FaultyStorage;
pub use time::ControllableTime;
