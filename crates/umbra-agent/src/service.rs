//! The composed ads service
//!
//! [`AdsService`] owns one instance of every store and drives the flows
//! that cross crates: serving an ad records a served event and confirms it,
//! lifecycle events are confirmed and queued for redemption, page loads are
//! checked for conversions, and a background tick keeps history, issuers
//! and tokens fresh.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use umbra_account::conversions::{seal, SealRandomness, VerifiableConversion};
use umbra_account::{
    detect_conversions, ConfirmationBuilder, ConfirmationRequest, IssuerStore, PaymentTokens,
    RedemptionQueue, RefillOutcome, TokenLedger, TokenRefill, Transactions,
    VerifiableConversionEnvelope,
};
use umbra_catalog::{AdEvent, AdEventLog, CatalogStore, CreativeAd, ResourceKind, ResourceStore};
use umbra_core::time::DAY_MS;
use umbra_core::{
    AdType, ConfirmationType, CreativeSetId, PhysicalTime, PlacementId, Result, TransactionId,
    UmbraConfig, UmbraEffects, UmbraError,
};
use umbra_serving::{BanditArms, EligibleAds, UserModel};

use crate::tasks::BackgroundTasks;

/// What happened to the confirmation of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Built and queued for redemption
    Queued(TransactionId),
    /// No confirmation token was available; a refill was scheduled
    NoTokens,
}

/// A recorded ad event and its confirmation
#[derive(Debug, Clone)]
pub struct EventOutcome {
    /// The event as stored in the log
    pub event: AdEvent,
    /// Its confirmation
    pub confirmation: ConfirmationOutcome,
}

/// One conversion produced by a page load
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    /// Converted creative set
    pub creative_set_id: CreativeSetId,
    /// Conversion event and its confirmation
    pub outcome: EventOutcome,
    /// Whether the confirmation carries a sealed conversion id
    pub verifiable: bool,
}

/// Result of [`AdsService::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    /// Issuers were fetched and published
    pub issuers_ready: bool,
    /// Queued confirmations put back on the schedule
    pub resumed: usize,
    /// Outcome of the startup refill, if one ran and succeeded
    pub refill: Option<RefillOutcome>,
}

/// Result of one maintenance tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Ad events past retention removed
    pub purged_events: usize,
    /// Redeemed or dropped confirmations past retention removed
    pub purged_confirmations: usize,
    /// Issuers were refetched this tick
    pub issuers_refreshed: bool,
    /// Outcome of the refill, if it succeeded
    pub refill: Option<RefillOutcome>,
}

pub(crate) struct Components {
    pub(crate) config: UmbraConfig,
    pub(crate) effects: UmbraEffects,
    pub(crate) catalog: Arc<CatalogStore>,
    pub(crate) resources: Arc<ResourceStore>,
    pub(crate) ad_events: AdEventLog,
    pub(crate) bandit_arms: BanditArms,
    pub(crate) eligible: EligibleAds,
    pub(crate) issuers: Arc<IssuerStore>,
    pub(crate) tokens: TokenLedger,
    pub(crate) refill: Arc<TokenRefill>,
    pub(crate) confirmations: ConfirmationBuilder,
    pub(crate) queue: RedemptionQueue,
    pub(crate) payment_tokens: PaymentTokens,
    pub(crate) transactions: Transactions,
}

/// The ads engine behind one API
pub struct AdsService {
    config: UmbraConfig,
    effects: UmbraEffects,
    catalog: Arc<CatalogStore>,
    resources: Arc<ResourceStore>,
    ad_events: AdEventLog,
    bandit_arms: BanditArms,
    eligible: EligibleAds,
    issuers: Arc<IssuerStore>,
    tokens: TokenLedger,
    refill: Arc<TokenRefill>,
    confirmations: ConfirmationBuilder,
    queue: RedemptionQueue,
    payment_tokens: PaymentTokens,
    transactions: Transactions,
    tasks: BackgroundTasks,
    issuers_fetched_at: Mutex<Option<PhysicalTime>>,
    /// Held from eligibility to the served event append, so caps see every
    /// earlier serve
    serving: AsyncMutex<()>,
}

impl std::fmt::Debug for AdsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsService")
            .field("ledger", &self.config.endpoints.ledger_base_url)
            .field("catalog_version", &self.catalog.current().version)
            .finish_non_exhaustive()
    }
}

impl AdsService {
    pub(crate) fn from_components(c: Components) -> Self {
        Self {
            config: c.config,
            effects: c.effects,
            catalog: c.catalog,
            resources: c.resources,
            ad_events: c.ad_events,
            bandit_arms: c.bandit_arms,
            eligible: c.eligible,
            issuers: c.issuers,
            tokens: c.tokens,
            refill: c.refill,
            confirmations: c.confirmations,
            queue: c.queue,
            payment_tokens: c.payment_tokens,
            transactions: c.transactions,
            tasks: BackgroundTasks::new(),
            issuers_fetched_at: Mutex::new(None),
            serving: AsyncMutex::new(()),
        }
    }

    /// Fetch issuers, resume queued redemptions, refill tokens and start the
    /// maintenance tick. Ledger failures here are not fatal; the tick
    /// retries them.
    pub async fn start(self: &Arc<Self>) -> Result<StartupReport> {
        let issuers_ready = match self.refresh_issuers().await {
            Ok(_) => true,
            Err(err) => {
                info!(error = %err, "issuers unavailable at startup");
                false
            }
        };
        let resumed = self.queue.resume().await?;
        let refill = if issuers_ready {
            self.try_refill().await
        } else {
            None
        };

        let weak = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.redemption.poll_interval_ms);
        self.tasks.spawn_interval_until(interval, move || maintenance(weak.clone()));

        info!(issuers_ready, resumed, ?refill, "ads service started");
        Ok(StartupReport {
            issuers_ready,
            resumed,
            refill,
        })
    }

    /// Stop the maintenance tick, wait for background refills and let
    /// in-flight redemptions finish
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
        self.queue.shutdown().await;
        info!("ads service stopped");
    }

    /// Verify and publish a catalog feed
    pub fn update_catalog(&self, body: &str, signature: Option<&str>) -> Result<u64> {
        self.catalog.update(body, signature)
    }

    /// Publish one resource
    pub fn update_resource(&self, kind: ResourceKind, json: &str) -> Result<u64> {
        self.resources.update(kind, json)
    }

    /// Choose a creative for an ad unit. A chosen creative is recorded as
    /// served and its served confirmation queued before it is returned.
    pub async fn serve_ad(
        &self,
        ad_type: AdType,
        user_model: &UserModel,
        placement_id: PlacementId,
    ) -> Result<Option<CreativeAd>> {
        let (ad, event) = {
            let _serving = self.serving.lock().await;
            let Some(ad) = self.eligible.get_eligible_ad(ad_type, user_model).await? else {
                debug!(%ad_type, "no eligible ad");
                return Ok(None);
            };
            let event = self
                .append_event(&ad, placement_id, ConfirmationType::Served)
                .await?;
            (ad, event)
        };
        self.confirm(&event, None).await?;
        Ok(Some(ad))
    }

    /// Record a lifecycle event for a creative and confirm it
    pub async fn record_event(
        &self,
        ad: &CreativeAd,
        placement_id: PlacementId,
        confirmation_type: ConfirmationType,
    ) -> Result<EventOutcome> {
        let event = self.append_event(ad, placement_id, confirmation_type).await?;

        match confirmation_type {
            ConfirmationType::Clicked => {
                self.bandit_arms.feedback(&ad.segment, true).await?;
            }
            ConfirmationType::Dismissed => {
                self.bandit_arms.feedback(&ad.segment, false).await?;
            }
            _ => {}
        }

        let confirmation = self.confirm(&event, None).await?;
        Ok(EventOutcome {
            event,
            confirmation,
        })
    }

    /// Check a finished page load for conversions. Each converted creative
    /// set gets a conversion event and confirmation; verifiable ones carry
    /// the conversion id sealed to the advertiser.
    pub async fn on_page_loaded(
        &self,
        redirect_chain: &[String],
        html: &str,
    ) -> Result<Vec<ConversionOutcome>> {
        let now = self.effects.now().await?;
        let catalog = self.catalog.current();
        let resources = self.resources.current();
        let history = self.ad_events.list().await?;
        let actions = detect_conversions(
            redirect_chain,
            html,
            &catalog.value,
            &history,
            &resources.value,
            now,
        )?;

        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let envelope = match &action.verifiable {
                Some(verifiable) => self.seal_conversion(verifiable).await,
                None => None,
            };

            let mut event = action.ad_event;
            event.confirmation_type = ConfirmationType::Conversion;
            event.created_at = now;
            let event = self.ad_events.append(event).await?;

            let verifiable = envelope.is_some();
            let confirmation = self.confirm(&event, envelope).await?;
            info!(
                creative_set_id = %action.creative_set_id,
                verifiable,
                "conversion recorded"
            );
            outcomes.push(ConversionOutcome {
                creative_set_id: action.creative_set_id,
                outcome: EventOutcome {
                    event,
                    confirmation,
                },
                verifiable,
            });
        }
        Ok(outcomes)
    }

    /// Refetch issuers and drop tokens signed under retired keys
    pub async fn refresh_issuers(&self) -> Result<u64> {
        let version = self
            .issuers
            .fetch(
                self.effects.network.as_ref(),
                &self.config.endpoints.ledger_base_url,
            )
            .await?;
        let keys = self.issuers.current().value.confirmation_keys();
        let removed = self.tokens.remove_tokens_not_in(keys).await?;
        if removed > 0 {
            info!(removed, "dropped tokens of retired issuer keys");
        }
        let now = self.effects.now().await?;
        *self.issuers_fetched_at.lock() = Some(now);
        Ok(version)
    }

    /// Top up confirmation tokens, optionally answering a captcha
    pub async fn refill_tokens(&self, captcha_solution: Option<&str>) -> Result<RefillOutcome> {
        self.refill.refill(captcha_solution).await
    }

    /// One maintenance pass: purge history past retention, refetch issuers
    /// when their ping interval has elapsed, refill tokens
    pub async fn tick(&self) -> Result<MaintenanceReport> {
        let now = self.effects.now().await?;
        let retention_ms = self
            .config
            .history
            .ad_event_retention_days
            .saturating_mul(DAY_MS);
        let cutoff = now.sub_ms(retention_ms);
        let purged_events = self.ad_events.purge_before(cutoff).await?;
        let purged_confirmations = self.queue.purge_terminal_before(cutoff).await?;

        let issuers_refreshed = if self.issuers_due(now) {
            match self.refresh_issuers().await {
                Ok(_) => true,
                Err(err) => {
                    debug!(error = %err, "issuers refresh failed");
                    false
                }
            }
        } else {
            false
        };
        let refill = if self.issuers.current().value.issuers.is_empty() {
            None
        } else {
            self.try_refill().await
        };

        debug!(purged_events, purged_confirmations, issuers_refreshed, "maintenance tick");
        Ok(MaintenanceReport {
            purged_events,
            purged_confirmations,
            issuers_refreshed,
            refill,
        })
    }

    /// Catalog store
    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    /// Resource store
    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    /// Ad event history
    pub fn ad_events(&self) -> &AdEventLog {
        &self.ad_events
    }

    /// Bandit arms
    pub fn bandit_arms(&self) -> &BanditArms {
        &self.bandit_arms
    }

    /// Active issuers
    pub fn issuers(&self) -> &IssuerStore {
        &self.issuers
    }

    /// Confirmation token ledger
    pub fn tokens(&self) -> &TokenLedger {
        &self.tokens
    }

    /// Redemption queue
    pub fn queue(&self) -> &RedemptionQueue {
        &self.queue
    }

    /// Earned payment tokens
    pub fn payment_tokens(&self) -> &PaymentTokens {
        &self.payment_tokens
    }

    /// Transaction history
    pub fn transactions(&self) -> &Transactions {
        &self.transactions
    }

    async fn append_event(
        &self,
        ad: &CreativeAd,
        placement_id: PlacementId,
        confirmation_type: ConfirmationType,
    ) -> Result<AdEvent> {
        let now = self.effects.now().await?;
        self.ad_events
            .append(AdEvent::for_creative(ad, placement_id, confirmation_type, now))
            .await
    }

    async fn confirm(
        &self,
        event: &AdEvent,
        conversion_envelope: Option<VerifiableConversionEnvelope>,
    ) -> Result<ConfirmationOutcome> {
        let request = ConfirmationRequest {
            creative_instance_id: event.creative_instance_id.clone(),
            confirmation_type: event.confirmation_type,
            ad_type: event.ad_type,
            segment: event.segment.clone(),
            conversion_envelope,
        };
        match self.confirmations.build(request).await {
            Ok(confirmation) => {
                let transaction_id = confirmation.transaction_id;
                self.queue.add(confirmation).await?;
                Ok(ConfirmationOutcome::Queued(transaction_id))
            }
            Err(UmbraError::InsufficientTokens { .. }) => {
                info!(
                    creative_instance_id = %event.creative_instance_id,
                    confirmation_type = %event.confirmation_type,
                    "no confirmation tokens, scheduling refill"
                );
                self.schedule_refill();
                Ok(ConfirmationOutcome::NoTokens)
            }
            Err(err) => Err(err),
        }
    }

    async fn seal_conversion(
        &self,
        verifiable: &VerifiableConversion,
    ) -> Option<VerifiableConversionEnvelope> {
        let random = &self.effects.random;
        let ephemeral_secret = random.random_bytes_32().await;
        let nonce: [u8; 24] = random.random_bytes(24).await.try_into().ok()?;
        match seal(
            &verifiable.id,
            &verifiable.advertiser_public_key,
            SealRandomness::new(ephemeral_secret, nonce),
        ) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                debug!(error = %err, "conversion not sealable, confirming without id");
                None
            }
        }
    }

    fn issuers_due(&self, now: PhysicalTime) -> bool {
        let ping_ms = self.issuers.current().value.ping_ms;
        match *self.issuers_fetched_at.lock() {
            Some(fetched_at) => now.since(fetched_at) >= ping_ms,
            None => true,
        }
    }

    async fn try_refill(&self) -> Option<RefillOutcome> {
        match self.refill.refill(None).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                debug!(error = %err, "token refill failed");
                None
            }
        }
    }

    fn schedule_refill(&self) {
        let refill = self.refill.clone();
        self.tasks.spawn(async move {
            if let Err(err) = refill.refill(None).await {
                debug!(error = %err, "background token refill failed");
            }
        });
    }
}

async fn maintenance(service: Weak<AdsService>) -> bool {
    let Some(service) = service.upgrade() else {
        return false;
    };
    if let Err(err) = service.tick().await {
        debug!(error = %err, "maintenance tick failed");
    }
    true
}
