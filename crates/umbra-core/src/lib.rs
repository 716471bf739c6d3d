//! # Umbra Core
//!
//! Foundation crate for the Umbra on-device ads engine. Everything here is
//! either pure (types, crypto, retry arithmetic) or an interface (effect
//! traits) so that higher crates can be tested with deterministic handlers.
//!
//! ## Layout
//!
//! - [`errors`]: the unified [`UmbraError`] and its retry classification
//! - [`types`]: identifiers and ad/confirmation vocabularies
//! - [`time`]: [`PhysicalTime`] and calendar helpers
//! - [`effects`]: time, randomness, storage, network and platform traits,
//!   bundled as [`UmbraEffects`]
//! - [`crypto`]: hashing, blind tokens, batch DLEQ proofs
//! - [`owner`]: task-owned mutable state ([`StateOwner`])
//! - [`snapshot`]: immutable versioned snapshots ([`SnapshotCell`])
//! - [`reliability`]: backoff and retry ([`RetryPolicy`])
//! - [`config`]: [`UmbraConfig`]

pub mod config;
pub mod crypto;
pub mod effects;
pub mod errors;
pub mod owner;
pub mod reliability;
pub mod snapshot;
pub mod time;
pub mod types;

pub use config::UmbraConfig;
pub use effects::UmbraEffects;
pub use errors::{Result, UmbraError};
pub use owner::{OwnedState, StateOwner};
pub use reliability::{BackoffStrategy, RetryPolicy};
pub use snapshot::{SnapshotCell, Versioned};
pub use time::PhysicalTime;
pub use types::*;
