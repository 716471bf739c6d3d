//! Issuer public keys
//!
//! The ledger publishes two issuers. `confirmations` signs the tokens spent
//! by confirmations; `payments` signs payment tokens and maps each of its
//! keys to the value a redemption under that key pays. A key outside the
//! published set is never trusted, and an issuers document that carries
//! more keys than the configured bounds is rejected whole.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use umbra_core::config::IssuerConfig;
use umbra_core::crypto::PublicKey;
use umbra_core::effects::{NetworkEffects, UrlRequest};
use umbra_core::{Result, SnapshotCell, UmbraError, Versioned};

use crate::http;

/// Which tokens an issuer signs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerType {
    /// Tokens spent by confirmations
    Confirmations,
    /// Payment tokens returned by redemption
    Payments,
}

/// One published key and the value bucket it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct IssuerPublicKey {
    /// The key
    pub public_key: PublicKey,
    /// Value paid per payment token under this key; 0 for confirmation keys
    pub associated_value: f64,
}

/// An issuer and its keys
#[derive(Debug, Clone, PartialEq)]
pub struct Issuer {
    /// Issuer type
    pub issuer_type: IssuerType,
    /// Published keys
    pub public_keys: Vec<IssuerPublicKey>,
}

impl Issuer {
    fn contains(&self, public_key: &PublicKey) -> bool {
        self.public_keys.iter().any(|k| &k.public_key == public_key)
    }
}

/// The issuers document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuersInfo {
    /// Suggested refresh interval
    pub ping_ms: u64,
    /// Published issuers
    pub issuers: Vec<Issuer>,
}

impl IssuersInfo {
    /// The issuer of a type, if published
    pub fn issuer(&self, issuer_type: IssuerType) -> Option<&Issuer> {
        self.issuers.iter().find(|i| i.issuer_type == issuer_type)
    }

    /// Whether `public_key` currently signs confirmation tokens
    pub fn is_confirmation_key(&self, public_key: &PublicKey) -> bool {
        self.issuer(IssuerType::Confirmations)
            .is_some_and(|issuer| issuer.contains(public_key))
    }

    /// Value bucket of a payments key, `None` if the key is not published
    pub fn payment_value(&self, public_key: &PublicKey) -> Option<f64> {
        self.issuer(IssuerType::Payments)?
            .public_keys
            .iter()
            .find(|k| &k.public_key == public_key)
            .map(|k| k.associated_value)
    }

    /// Published confirmation keys
    pub fn confirmation_keys(&self) -> HashSet<PublicKey> {
        self.issuer(IssuerType::Confirmations)
            .map(|issuer| issuer.public_keys.iter().map(|k| k.public_key).collect())
            .unwrap_or_default()
    }

    /// Check both issuers are present and within the key bounds
    pub fn validate(&self, config: &IssuerConfig) -> Result<()> {
        let confirmations = self
            .issuer(IssuerType::Confirmations)
            .ok_or_else(|| UmbraError::unknown_issuer("no confirmations issuer"))?;
        let payments = self
            .issuer(IssuerType::Payments)
            .ok_or_else(|| UmbraError::unknown_issuer("no payments issuer"))?;

        let distinct: HashSet<_> = confirmations.public_keys.iter().map(|k| k.public_key).collect();
        if distinct.len() > config.max_confirmation_keys {
            return Err(UmbraError::unknown_issuer(format!(
                "{} confirmation keys exceed bound {}",
                distinct.len(),
                config.max_confirmation_keys
            )));
        }

        let mut buckets: HashMap<u64, HashSet<PublicKey>> = HashMap::new();
        for key in &payments.public_keys {
            buckets
                .entry(key.associated_value.to_bits())
                .or_default()
                .insert(key.public_key);
        }
        if let Some((bits, keys)) = buckets
            .iter()
            .find(|(_, keys)| keys.len() > config.max_payment_keys_per_bucket)
        {
            return Err(UmbraError::unknown_issuer(format!(
                "{} payment keys in bucket {} exceed bound {}",
                keys.len(),
                f64::from_bits(*bits),
                config.max_payment_keys_per_bucket
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPublicKey {
    public_key: String,
    #[serde(default)]
    associated_value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIssuer {
    name: IssuerType,
    public_keys: Vec<RawPublicKey>,
}

#[derive(Deserialize)]
struct RawIssuers {
    ping: u64,
    issuers: Vec<RawIssuer>,
}

/// Parse the issuers document
pub fn parse_issuers(json: &str) -> Result<IssuersInfo> {
    let raw: RawIssuers = http::parse_body(json, "issuers")?;
    let issuers = raw
        .issuers
        .into_iter()
        .map(|issuer| {
            let public_keys = issuer
                .public_keys
                .into_iter()
                .map(|key| {
                    let associated_value = match (issuer.name, key.associated_value.trim()) {
                        (IssuerType::Confirmations, _) | (_, "") => 0.0,
                        (IssuerType::Payments, value) => value.parse::<f64>().map_err(|e| {
                            UmbraError::invalid(format!("issuers: bad value {value}: {e}"))
                        })?,
                    };
                    Ok(IssuerPublicKey {
                        public_key: PublicKey::decode_base64(&key.public_key)?,
                        associated_value,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Issuer {
                issuer_type: issuer.name,
                public_keys,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(IssuersInfo {
        ping_ms: raw.ping,
        issuers,
    })
}

/// The active issuers, replaced wholesale on each successful fetch
#[derive(Debug)]
pub struct IssuerStore {
    config: IssuerConfig,
    cell: SnapshotCell<IssuersInfo>,
}

impl IssuerStore {
    /// Empty store: no key is trusted until issuers are published
    pub fn new(config: IssuerConfig) -> Self {
        Self {
            config,
            cell: SnapshotCell::new(IssuersInfo::default()),
        }
    }

    /// Current issuers
    pub fn current(&self) -> Arc<Versioned<IssuersInfo>> {
        self.cell.current()
    }

    /// Validate and publish issuers, returning the new version. A rejected
    /// document leaves the previous issuers active.
    pub fn update(&self, info: IssuersInfo) -> Result<u64> {
        info.validate(&self.config)?;
        let confirmation_keys = info
            .issuer(IssuerType::Confirmations)
            .map_or(0, |i| i.public_keys.len());
        let version = self.cell.publish(info);
        info!(version, confirmation_keys, "issuers updated");
        Ok(version)
    }

    /// Fetch `GET {base}/v3/issuers/` and publish the result
    pub async fn fetch(&self, network: &dyn NetworkEffects, base_url: &str) -> Result<u64> {
        let url = http::endpoint(base_url, "/v3/issuers/");
        let response = http::send(network, UrlRequest::get(url)).await?;
        if !response.is_success() {
            return Err(http::status_error(&response, "issuers"));
        }
        let info = parse_issuers(&response.body)?;
        debug!(issuers = info.issuers.len(), ping_ms = info.ping_ms, "fetched issuers");
        self.update(info)
    }
}
