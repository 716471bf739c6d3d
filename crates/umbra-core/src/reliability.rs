//! Retry and backoff policy
//!
//! One policy type shared by token refill and the redemption queue. Jitter
//! draws come from [`RandomEffects`] and sleeps from [`PhysicalTimeEffects`],
//! so a simulated clock and seeded randomness make retry schedules fully
//! deterministic in tests.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::effects::{PhysicalTimeEffects, RandomEffects};
use crate::errors::UmbraError;

/// Fraction of the base delay added as jitter at most
const JITTER_FRACTION: f64 = 0.1;

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear increase: delay * attempt
    Linear,
    /// Exponential increase: delay * 2^attempt
    Exponential,
}

impl BackoffStrategy {
    /// Base delay for a zero-based retry number, before jitter and capping
    pub fn base_delay_ms(&self, retry: u32, initial_delay_ms: u64) -> u64 {
        match self {
            BackoffStrategy::Fixed => initial_delay_ms,
            BackoffStrategy::Linear => initial_delay_ms.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Exponential => {
                initial_delay_ms.saturating_mul(2u64.saturating_pow(retry))
            }
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts in total, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Whether to add up to 10% random jitter
    pub jitter: bool,
    /// Deadline for one attempt
    pub attempt_timeout_ms: Option<u64>,
}

impl RetryPolicy {
    /// Exponential backoff with jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
            attempt_timeout_ms: None,
        }
    }

    /// Fixed delay without jitter
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            strategy: BackoffStrategy::Fixed,
            jitter: false,
            attempt_timeout_ms: None,
        }
    }

    /// Set maximum attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, enable: bool) -> Self {
        self.jitter = enable;
        self
    }

    /// Set the per-attempt deadline
    pub fn with_attempt_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.attempt_timeout_ms = Some(timeout_ms);
        self
    }

    /// Delay before retry number `retry` (zero-based). `unit_draw` in
    /// `[0, 1)` scales the jitter and is ignored when jitter is off.
    pub fn delay_ms(&self, retry: u32, unit_draw: f64) -> u64 {
        let base = self.strategy.base_delay_ms(retry, self.initial_delay_ms);
        let jitter = if self.jitter {
            (base as f64 * JITTER_FRACTION * unit_draw.clamp(0.0, 1.0)) as u64
        } else {
            0
        };
        base.saturating_add(jitter).min(self.max_delay_ms)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Execute an operation, retrying failures that [`UmbraError::is_retryable`]
    /// classifies as transient
    pub async fn execute<F, Fut, T>(
        &self,
        time: &dyn PhysicalTimeEffects,
        random: &dyn RandomEffects,
        mut operation: F,
    ) -> Result<T, UmbraError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UmbraError>>,
    {
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    attempt += 1;
                    if !err.is_retryable() || !self.allows_another(attempt) {
                        return Err(err);
                    }

                    let delay = self.delay_ms(attempt - 1, random.random_unit().await);
                    tracing::debug!(attempt, delay_ms = delay, error = %err, "retrying");
                    time.sleep_ms(delay).await?;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}
