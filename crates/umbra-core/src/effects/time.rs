//! Physical time effect
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `umbra-effects` (real clock), `umbra-testkit` (controllable clock)
//! - **Usage**: exclusion windows, event timestamps, backoff sleeps

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::UmbraError;
use crate::time::PhysicalTime;

/// Error type for time operations.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum TimeError {
    /// The clock could not be read
    #[error("Time service unavailable")]
    ServiceUnavailable,
    /// Any other failure
    #[error("Operation failed: {reason}")]
    OperationFailed {
        /// Reason for the failure
        reason: String,
    },
}

impl From<TimeError> for UmbraError {
    fn from(err: TimeError) -> Self {
        UmbraError::internal(err.to_string())
    }
}

/// Wall-clock access
#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Current time
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError>;
    /// Suspend the caller for `ms` milliseconds
    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError>;
}

#[async_trait]
impl<T: PhysicalTimeEffects + ?Sized> PhysicalTimeEffects for Arc<T> {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        (**self).physical_time().await
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        (**self).sleep_ms(ms).await
    }
}
