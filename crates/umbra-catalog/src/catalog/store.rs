//! Catalog store: validated feeds published as immutable snapshots

use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use std::sync::Arc;
use tracing::{info, warn};
use umbra_core::config::CatalogConfig;
use umbra_core::{Result, SnapshotCell, UmbraError, Versioned};

use super::feed::parse_catalog;
use super::model::Catalog;

/// Holds the active catalog
#[derive(Debug)]
pub struct CatalogStore {
    cell: SnapshotCell<Catalog>,
    verifying_key: Option<VerifyingKey>,
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CatalogStore {
    /// Empty store; feeds must carry a valid signature when a key is given
    pub fn new(verifying_key: Option<VerifyingKey>) -> Self {
        Self {
            cell: SnapshotCell::new(Catalog::default()),
            verifying_key,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        let key = match &config.signing_key_hex {
            Some(hex_key) => Some(parse_verifying_key(hex_key)?),
            None => None,
        };
        Ok(Self::new(key))
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<Versioned<Catalog>> {
        self.cell.current()
    }

    /// Receiver notified whenever a new catalog is published
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Arc<Versioned<Catalog>>> {
        self.cell.subscribe()
    }

    /// Verify, parse and publish a feed. On any failure the previous catalog
    /// stays active.
    pub fn update(&self, body: &str, signature: Option<&str>) -> Result<u64> {
        let parsed = self
            .verify(body, signature)
            .and_then(|()| parse_catalog(body));

        let catalog = match parsed {
            Ok(catalog) => catalog,
            Err(err) => {
                warn!(error = %err, "rejected catalog; keeping previous snapshot");
                return Err(err);
            }
        };

        let catalog_id = catalog.id.clone();
        let creatives = catalog.creatives.len();
        let version = self.cell.publish(catalog);
        info!(%catalog_id, creatives, version, "published catalog");
        Ok(version)
    }

    fn verify(&self, body: &str, signature: Option<&str>) -> Result<()> {
        let Some(key) = &self.verifying_key else {
            return Ok(());
        };
        let encoded =
            signature.ok_or_else(|| UmbraError::malformed_catalog("missing catalog signature"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| UmbraError::malformed_catalog(format!("catalog signature: {e}")))?;
        let signature = Signature::from_slice(&bytes)
            .map_err(|e| UmbraError::malformed_catalog(format!("catalog signature: {e}")))?;
        key.verify_strict(body.as_bytes(), &signature)
            .map_err(|_| UmbraError::malformed_catalog("catalog signature does not verify"))
    }
}

fn parse_verifying_key(hex_key: &str) -> Result<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(hex_key)
        .map_err(|e| UmbraError::invalid(format!("catalog signing key: {e}")))?
        .try_into()
        .map_err(|_| UmbraError::invalid("catalog signing key must be 32 bytes"))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| UmbraError::invalid(format!("catalog signing key: {e}")))
}
