//! Settable platform collaborator

use async_trait::async_trait;
use parking_lot::Mutex;
use umbra_core::effects::PlatformEffects;

#[derive(Debug, Clone)]
struct PlatformState {
    country_code: String,
    subdivision_code: Option<String>,
    browsing_history: Vec<String>,
    idle: bool,
    foreground: bool,
    utc_offset_minutes: i32,
    rewards_enabled: bool,
    platform_name: String,
    build_channel: String,
}

/// Platform answers set by the test. Defaults: US locale, UTC, foreground,
/// rewards enabled, empty history.
#[derive(Debug)]
pub struct MockPlatform {
    state: Mutex<PlatformState>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            state: Mutex::new(PlatformState {
                country_code: "US".to_string(),
                subdivision_code: None,
                browsing_history: Vec::new(),
                idle: false,
                foreground: true,
                utc_offset_minutes: 0,
                rewards_enabled: true,
                platform_name: "linux".to_string(),
                build_channel: "release".to_string(),
            }),
        }
    }
}

impl MockPlatform {
    /// Default answers
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the country code
    pub fn set_country_code(&self, code: &str) {
        self.state.lock().country_code = code.to_string();
    }

    /// Set the subdivision code
    pub fn set_subdivision_code(&self, code: Option<&str>) {
        self.state.lock().subdivision_code = code.map(str::to_string);
    }

    /// Set browsing history, most recent first
    pub fn set_browsing_history(&self, history: Vec<String>) {
        self.state.lock().browsing_history = history;
    }

    /// Set idle state
    pub fn set_idle(&self, idle: bool) {
        self.state.lock().idle = idle;
    }

    /// Set the UTC offset
    pub fn set_utc_offset_minutes(&self, minutes: i32) {
        self.state.lock().utc_offset_minutes = minutes;
    }

    /// Opt in or out of rewards
    pub fn set_rewards_enabled(&self, enabled: bool) {
        self.state.lock().rewards_enabled = enabled;
    }
}

#[async_trait]
impl PlatformEffects for MockPlatform {
    async fn country_code(&self) -> String {
        self.state.lock().country_code.clone()
    }

    async fn subdivision_code(&self) -> Option<String> {
        self.state.lock().subdivision_code.clone()
    }

    async fn browsing_history(&self, max_entries: usize) -> Vec<String> {
        self.state
            .lock()
            .browsing_history
            .iter()
            .take(max_entries)
            .cloned()
            .collect()
    }

    async fn is_idle(&self) -> bool {
        self.state.lock().idle
    }

    async fn is_foreground(&self) -> bool {
        self.state.lock().foreground
    }

    async fn utc_offset_minutes(&self) -> i32 {
        self.state.lock().utc_offset_minutes
    }

    async fn is_rewards_enabled(&self) -> bool {
        self.state.lock().rewards_enabled
    }

    async fn platform_name(&self) -> String {
        self.state.lock().platform_name.clone()
    }

    async fn build_channel(&self) -> String {
        self.state.lock().build_channel.clone()
    }
}
