//! Tracing subscriber setup
//!
//! Umbra code logs through `tracing` macros only. Hosts that do not install
//! their own subscriber call [`init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;
use umbra_core::config::LoggingConfig;

/// Build the filter: `RUST_LOG` when set, the configured level otherwise
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install a global fmt subscriber. Returns `false` if a subscriber was
/// already installed, which is not an error.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
