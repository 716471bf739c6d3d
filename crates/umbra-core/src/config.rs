//! Engine configuration
//!
//! [`UmbraConfig`] is loaded from TOML, then overridden from `UMBRA_`
//! environment variables (`UMBRA_TOKENS__MIN_UNBLINDED_TOKENS=10` sets
//! `tokens.min_unblinded_tokens`), then validated. Every section has
//! defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{Result, UmbraError};
use crate::reliability::RetryPolicy;
use crate::types::AdType;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "UMBRA_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UmbraConfig {
    /// Confirmation token ledger
    pub tokens: TokenConfig,
    /// Redemption queue
    pub redemption: RedemptionConfig,
    /// Issuer key bounds
    pub issuers: IssuerConfig,
    /// Ranking and selection
    pub serving: ServingConfig,
    /// Local history retention
    pub history: HistoryConfig,
    /// User data privacy
    pub privacy: PrivacyConfig,
    /// Catalog verification
    pub catalog: CatalogConfig,
    /// Remote endpoints
    pub endpoints: EndpointConfig,
    /// Logging
    pub logging: LoggingConfig,
}

/// Token ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Refill when the ledger holds fewer than this many tokens
    pub min_unblinded_tokens: usize,
    /// Refill up to this many tokens
    pub max_unblinded_tokens: usize,
    /// Retry policy for refill requests
    pub refill_retry: RetryPolicy,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            min_unblinded_tokens: 20,
            max_unblinded_tokens: 50,
            refill_retry: RetryPolicy::exponential()
                .with_initial_delay_ms(15_000)
                .with_max_delay_ms(3_600_000),
        }
    }
}

/// Redemption queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedemptionConfig {
    /// Retry policy for redemption attempts
    pub retry: RetryPolicy,
    /// Interval of the background maintenance tick
    pub poll_interval_ms: u64,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::exponential()
                .with_max_attempts(10)
                .with_initial_delay_ms(15_000)
                .with_max_delay_ms(3_600_000)
                .with_attempt_timeout_ms(30_000),
            poll_interval_ms: 60_000,
        }
    }
}

/// Issuer key bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Distinct public keys allowed for the confirmations issuer
    pub max_confirmation_keys: usize,
    /// Distinct public keys allowed per value bucket of the payments issuer
    pub max_payment_keys_per_bucket: usize,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            max_confirmation_keys: 2,
            max_payment_keys_per_bucket: 3,
        }
    }
}

/// How candidates are ranked for an ad unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    /// Weighted feature model over the user model
    Model,
    /// Page-embedding similarity voting
    Embedding,
    /// Epsilon-greedy bandit over segments
    Bandit,
}

/// Feature weights for the model-based ranker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelWeights {
    /// Intent segment exact match
    pub intent_child: f64,
    /// Intent segment parent match
    pub intent_parent: f64,
    /// Latent interest exact match
    pub latent_interest_child: f64,
    /// Latent interest parent match
    pub latent_interest_parent: f64,
    /// Interest exact match
    pub interest_child: f64,
    /// Interest parent match
    pub interest_parent: f64,
    /// Recency of the same creative
    pub last_seen_ad: f64,
    /// Recency of the same advertiser
    pub last_seen_advertiser: f64,
    /// Campaign priority
    pub priority: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            intent_child: 1.0,
            intent_parent: 1.0,
            latent_interest_child: 1.0,
            latent_interest_parent: 1.0,
            interest_child: 1.0,
            interest_parent: 1.0,
            last_seen_ad: 1.0,
            last_seen_advertiser: 1.0,
            priority: 1.0,
        }
    }
}

/// Ranking and selection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Ranking strategy per ad unit; unlisted units rank by model
    pub ranking: BTreeMap<AdType, RankingStrategy>,
    /// Model feature weights
    pub model_weights: ModelWeights,
    /// Exploration probability for the bandit
    pub bandit_epsilon: f64,
}

impl ServingConfig {
    /// Strategy for an ad unit
    pub fn strategy_for(&self, ad_type: AdType) -> RankingStrategy {
        self.ranking
            .get(&ad_type)
            .copied()
            .unwrap_or(RankingStrategy::Model)
    }
}

impl Default for ServingConfig {
    fn default() -> Self {
        let mut ranking = BTreeMap::new();
        ranking.insert(AdType::Notification, RankingStrategy::Model);
        ranking.insert(AdType::InlineContent, RankingStrategy::Embedding);
        Self {
            ranking,
            model_weights: ModelWeights::default(),
            bandit_epsilon: 0.25,
        }
    }
}

/// Local history configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Ad events older than this are purged
    pub ad_event_retention_days: u64,
    /// Browsing history entries consulted for anti-targeting
    pub browsing_history_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            ad_event_retention_days: 90,
            browsing_history_entries: 5_000,
        }
    }
}

/// User data privacy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Countries large enough to report; others report `"??"`
    pub anonymity_countries: Vec<String>,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        let codes = [
            "AE", "AR", "AT", "AU", "BE", "BR", "CA", "CH", "CL", "CO", "CZ", "DE", "DK", "ES",
            "FI", "FR", "GB", "GR", "HU", "IE", "IL", "IN", "IT", "JP", "KR", "MX", "MY", "NL",
            "NO", "NZ", "PH", "PL", "PT", "RO", "SE", "SG", "TR", "TW", "UA", "US", "VN", "ZA",
        ];
        Self {
            anonymity_countries: codes.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// Catalog verification configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Hex Ed25519 public key; when set, unsigned or mis-signed catalogs are rejected
    pub signing_key_hex: Option<String>,
}

/// Remote endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL of the anonymous confirmation ledger
    pub ledger_base_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            ledger_base_url: "https://anonymous.ads.umbra.invalid".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl UmbraConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| UmbraError::invalid(format!("Invalid TOML: {e}")))
    }

    /// Load a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| UmbraError::internal(format!("Failed to read config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Apply `UMBRA_` variables from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `UMBRA_SECTION__FIELD=value` overrides. Values parse as JSON
    /// literals when possible and as strings otherwise.
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut tree = serde_json::to_value(&*self)?;
        let mut changed = false;

        for (key, raw) in vars {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let parts: Vec<String> = path.split("__").map(str::to_lowercase).collect();
            let value = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
            set_nested(&mut tree, &parts, value)?;
            changed = true;
        }

        if changed {
            *self = serde_json::from_value(tree)
                .map_err(|e| UmbraError::invalid(format!("Invalid environment override: {e}")))?;
        }
        Ok(())
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.tokens.max_unblinded_tokens == 0 {
            return Err(UmbraError::invalid("tokens.max_unblinded_tokens must be > 0"));
        }
        if self.tokens.min_unblinded_tokens >= self.tokens.max_unblinded_tokens {
            return Err(UmbraError::invalid(
                "tokens.min_unblinded_tokens must be below tokens.max_unblinded_tokens",
            ));
        }
        for (name, policy) in [
            ("tokens.refill_retry", &self.tokens.refill_retry),
            ("redemption.retry", &self.redemption.retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(UmbraError::invalid(format!("{name}.max_attempts must be > 0")));
            }
            if policy.initial_delay_ms > policy.max_delay_ms {
                return Err(UmbraError::invalid(format!(
                    "{name}.initial_delay_ms exceeds max_delay_ms"
                )));
            }
        }
        if !matches!(self.redemption.retry.attempt_timeout_ms, Some(ms) if ms > 0) {
            return Err(UmbraError::invalid(
                "redemption.retry.attempt_timeout_ms must be set and > 0",
            ));
        }
        if self.redemption.poll_interval_ms == 0 {
            return Err(UmbraError::invalid("redemption.poll_interval_ms must be > 0"));
        }
        if self.issuers.max_confirmation_keys == 0 || self.issuers.max_payment_keys_per_bucket == 0
        {
            return Err(UmbraError::invalid("issuer key bounds must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.serving.bandit_epsilon) {
            return Err(UmbraError::invalid("serving.bandit_epsilon must be in [0, 1]"));
        }
        if let Some(key) = &self.catalog.signing_key_hex {
            let bytes = hex::decode(key)
                .map_err(|e| UmbraError::invalid(format!("catalog.signing_key_hex: {e}")))?;
            if bytes.len() != 32 {
                return Err(UmbraError::invalid(
                    "catalog.signing_key_hex must encode 32 bytes",
                ));
            }
        }
        let url = &self.endpoints.ledger_base_url;
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(UmbraError::invalid(format!(
                "endpoints.ledger_base_url is not an http(s) url: {url}"
            )));
        }
        Ok(())
    }
}

fn set_nested(
    tree: &mut serde_json::Value,
    parts: &[String],
    value: serde_json::Value,
) -> Result<()> {
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| UmbraError::invalid("Empty key"))?;

    let mut current = tree;
    for part in parents {
        current = current
            .as_object_mut()
            .ok_or_else(|| UmbraError::invalid("Expected object"))?
            .entry(part.clone())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }

    current
        .as_object_mut()
        .ok_or_else(|| UmbraError::invalid("Cannot set value on non-object"))?
        .insert(last.clone(), value);
    Ok(())
}
