//! Real time effect handler for production use

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use umbra_core::effects::{PhysicalTimeEffects, TimeError};
use umbra_core::PhysicalTime;

/// Wall clock backed by `SystemTime` and tokio timers
#[derive(Debug, Clone, Default)]
pub struct RealTimeHandler;

impl RealTimeHandler {
    /// Create a new real time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhysicalTimeEffects for RealTimeHandler {
    async fn physical_time(&self) -> Result<PhysicalTime, TimeError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TimeError::OperationFailed {
                reason: format!("clock before epoch: {e}"),
            })?;
        Ok(PhysicalTime::from_ms(elapsed.as_millis() as u64))
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clock_advances() {
        let handler = RealTimeHandler::new();
        let before = handler.physical_time().await.unwrap();
        handler.sleep_ms(2).await.unwrap();
        let after = handler.physical_time().await.unwrap();
        assert!(after >= before);
        // 2020-01-01
        assert!(before.ts_ms > 1_577_836_800_000);
    }
}
