//! Read-only platform collaborators
//!
//! Locale, browsing history, idle state and rewards preferences are owned by
//! the host. The engine reads them through this capability and never caches
//! them beyond one serving decision.

use async_trait::async_trait;
use std::sync::Arc;

/// Host platform queries
#[async_trait]
pub trait PlatformEffects: Send + Sync {
    /// ISO 3166-1 alpha-2 country code of the device locale
    async fn country_code(&self) -> String;

    /// ISO 3166-2 subdivision code (`"US-CA"`), if known
    async fn subdivision_code(&self) -> Option<String>;

    /// Hosts of recently visited pages, most recent first
    async fn browsing_history(&self, max_entries: usize) -> Vec<String>;

    /// Whether the user is idle
    async fn is_idle(&self) -> bool;

    /// Whether the browser is in the foreground
    async fn is_foreground(&self) -> bool;

    /// Local time offset from UTC in minutes
    async fn utc_offset_minutes(&self) -> i32;

    /// Whether the user has opted into rewards
    async fn is_rewards_enabled(&self) -> bool;

    /// Platform name (`"windows"`, `"android"`, ...)
    async fn platform_name(&self) -> String;

    /// Build channel (`"release"`, `"beta"`, ...)
    async fn build_channel(&self) -> String;
}

#[async_trait]
impl<T: PlatformEffects + ?Sized> PlatformEffects for Arc<T> {
    async fn country_code(&self) -> String {
        (**self).country_code().await
    }

    async fn subdivision_code(&self) -> Option<String> {
        (**self).subdivision_code().await
    }

    async fn browsing_history(&self, max_entries: usize) -> Vec<String> {
        (**self).browsing_history(max_entries).await
    }

    async fn is_idle(&self) -> bool {
        (**self).is_idle().await
    }

    async fn is_foreground(&self) -> bool {
        (**self).is_foreground().await
    }

    async fn utc_offset_minutes(&self) -> i32 {
        (**self).utc_offset_minutes().await
    }

    async fn is_rewards_enabled(&self) -> bool {
        (**self).is_rewards_enabled().await
    }

    async fn platform_name(&self) -> String {
        (**self).platform_name().await
    }

    async fn build_channel(&self) -> String {
        (**self).build_channel().await
    }
}
