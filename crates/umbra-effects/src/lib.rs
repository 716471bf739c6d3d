//! # Umbra Effects
//!
//! Production handlers for the effect traits defined in `umbra-core`:
//!
//! - [`RealTimeHandler`]: system clock and tokio timers
//! - [`RealRandomHandler`]: thread-local CSPRNG
//! - [`MemoryStorageHandler`] and [`FilesystemStorageHandler`]
//! - [`logging`]: tracing subscriber setup
//!
//! Network and platform handlers are supplied by the embedding host.

pub mod logging;
pub mod random;
pub mod storage;
pub mod time;

pub use logging::init_tracing;
pub use random::RealRandomHandler;
pub use storage::{FilesystemStorageHandler, MemoryStorageHandler};
pub use time::RealTimeHandler;
