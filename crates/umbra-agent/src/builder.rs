//! Service builder
//!
//! ```rust,ignore
//! let service = AdsServiceBuilder::new()
//!     .with_config(config)
//!     .with_production_effects(storage, network, platform)
//!     .with_payment_id(wallet_payment_id)
//!     .build()
//!     .await?;
//! let report = service.start().await?;
//! ```

use std::sync::Arc;
use tracing::info;
use umbra_account::{
    ConfirmationBuilder, IssuerStore, PaymentTokens, RedemptionQueue, TokenLedger, TokenRefill,
    Transactions,
};
use umbra_catalog::{AdEventLog, CatalogStore, ResourceStore};
use umbra_core::effects::{NetworkEffects, PlatformEffects, StorageEffects};
use umbra_core::{Result, UmbraConfig, UmbraEffects, UmbraError};
use umbra_effects::{RealRandomHandler, RealTimeHandler};
use umbra_serving::{BanditArms, EligibleAds};

use crate::service::{AdsService, Components};

/// Assembles an [`AdsService`]
#[derive(Debug, Default)]
pub struct AdsServiceBuilder {
    config: Option<UmbraConfig>,
    effects: Option<UmbraEffects>,
    payment_id: Option<String>,
    init_logging: bool,
}

impl AdsServiceBuilder {
    /// Builder with default configuration and no effects
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    pub fn with_config(mut self, config: UmbraConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an explicit effect bundle
    pub fn with_effects(mut self, effects: UmbraEffects) -> Self {
        self.effects = Some(effects);
        self
    }

    /// Real clock and OS randomness over host-supplied storage, transport and
    /// platform handlers
    pub fn with_production_effects(
        mut self,
        storage: Arc<dyn StorageEffects>,
        network: Arc<dyn NetworkEffects>,
        platform: Arc<dyn PlatformEffects>,
    ) -> Self {
        self.effects = Some(UmbraEffects::new(
            Arc::new(RealTimeHandler::new()),
            Arc::new(RealRandomHandler::new()),
            storage,
            network,
            platform,
        ));
        self
    }

    /// Wallet payment id used for token refills
    pub fn with_payment_id(mut self, payment_id: impl Into<String>) -> Self {
        self.payment_id = Some(payment_id.into());
        self
    }

    /// Install the tracing subscriber from the logging configuration
    pub fn with_logging(mut self) -> Self {
        self.init_logging = true;
        self
    }

    /// Validate configuration, load persisted state and wire the service.
    /// Nothing touches the network until [`AdsService::start`].
    pub async fn build(self) -> Result<Arc<AdsService>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let effects = self
            .effects
            .ok_or_else(|| UmbraError::invalid("effects are required"))?;
        let payment_id = self
            .payment_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| UmbraError::invalid("a wallet payment id is required"))?;
        if self.init_logging {
            umbra_effects::init_tracing(&config.logging);
        }

        let storage = effects.storage.clone();
        let catalog = Arc::new(CatalogStore::from_config(&config.catalog)?);
        let resources = Arc::new(ResourceStore::new());
        let ad_events = AdEventLog::load(storage.clone()).await?;
        let bandit_arms = BanditArms::load(storage.clone()).await?;
        let issuers = Arc::new(IssuerStore::new(config.issuers.clone()));
        let tokens = TokenLedger::load(storage.clone()).await?;
        let payment_tokens = PaymentTokens::load(storage.clone()).await?;
        let transactions = Transactions::load(storage).await?;

        let eligible = EligibleAds::new(
            &config,
            catalog.clone(),
            resources.clone(),
            ad_events.clone(),
            bandit_arms.clone(),
            effects.clone(),
        );
        let refill = Arc::new(TokenRefill::new(
            &config,
            tokens.clone(),
            issuers.clone(),
            effects.clone(),
            payment_id,
        ));
        let confirmations = ConfirmationBuilder::new(
            &config,
            tokens.clone(),
            payment_tokens.clone(),
            effects.clone(),
        );
        let queue = RedemptionQueue::load(
            &config,
            effects.clone(),
            issuers.clone(),
            payment_tokens.clone(),
            transactions.clone(),
        )
        .await?;

        info!(
            unblinded_tokens = tokens.count().await?,
            queued = queue.pending_count().await?,
            "ads service assembled"
        );

        Ok(Arc::new(AdsService::from_components(Components {
            config,
            effects,
            catalog,
            resources,
            ad_events,
            bandit_arms,
            eligible,
            issuers,
            tokens,
            refill,
            confirmations,
            queue,
            payment_tokens,
            transactions,
        })))
    }
}
