//! Ad event history
//!
//! Every lifecycle event (served, viewed, clicked, ...) is appended to one
//! log owned by a [`StateOwner`] task and persisted under
//! [`storage_keys::AD_EVENTS`] after each mutation. Exclusion rules and
//! predictors read an [`AdEventList`] snapshot taken at evaluation time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use umbra_core::effects::storage::{load_json, store_json};
use umbra_core::effects::{storage_keys, StorageEffects};
use umbra_core::{
    AdType, AdvertiserId, CampaignId, ConfirmationType, CreativeInstanceId, CreativeSetId,
    OwnedState, PhysicalTime, PlacementId, Result, StateOwner,
};

use crate::catalog::CreativeAd;

/// One recorded ad lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdEvent {
    /// Ad unit
    pub ad_type: AdType,
    /// Lifecycle event
    pub confirmation_type: ConfirmationType,
    /// Placement the ad was shown in
    pub placement_id: PlacementId,
    /// Campaign
    pub campaign_id: CampaignId,
    /// Creative set
    pub creative_set_id: CreativeSetId,
    /// Creative instance
    pub creative_instance_id: CreativeInstanceId,
    /// Advertiser
    pub advertiser_id: AdvertiserId,
    /// Targeted segment
    pub segment: String,
    /// When the event happened
    pub created_at: PhysicalTime,
}

impl AdEvent {
    /// Event for `ad` at `created_at`
    pub fn for_creative(
        ad: &CreativeAd,
        placement_id: PlacementId,
        confirmation_type: ConfirmationType,
        created_at: PhysicalTime,
    ) -> Self {
        Self {
            ad_type: ad.ad_type(),
            confirmation_type,
            placement_id,
            campaign_id: ad.campaign_id.clone(),
            creative_set_id: ad.creative_set_id.clone(),
            creative_instance_id: ad.creative_instance_id.clone(),
            advertiser_id: ad.advertiser_id.clone(),
            segment: ad.segment.clone(),
            created_at,
        }
    }
}

fn within(event: &AdEvent, now: PhysicalTime, window_ms: u64) -> bool {
    event.created_at <= now && now.since(event.created_at) < window_ms
}

/// Read-only view of the history, oldest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdEventList {
    events: Arc<Vec<AdEvent>>,
}

impl AdEventList {
    /// Wrap events, oldest first
    pub fn new(events: Vec<AdEvent>) -> Self {
        Self {
            events: Arc::new(events),
        }
    }

    /// All events
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &AdEvent> {
        self.events.iter()
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether there are no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Served events for a campaign within `window_ms` before `now`
    pub fn served_for_campaign(
        &self,
        campaign_id: &CampaignId,
        now: PhysicalTime,
        window_ms: u64,
    ) -> usize {
        self.iter()
            .filter(|e| e.confirmation_type == ConfirmationType::Served)
            .filter(|e| &e.campaign_id == campaign_id && within(e, now, window_ms))
            .count()
    }

    /// Served events for a creative set within `window_ms` before `now`, or
    /// all time when `window_ms` is `None`
    pub fn served_for_creative_set(
        &self,
        creative_set_id: &CreativeSetId,
        now: PhysicalTime,
        window_ms: Option<u64>,
    ) -> usize {
        self.iter()
            .filter(|e| e.confirmation_type == ConfirmationType::Served)
            .filter(|e| &e.creative_set_id == creative_set_id)
            .filter(|e| window_ms.map_or(true, |window| within(e, now, window)))
            .count()
    }

    /// Whether the creative set already converted
    pub fn has_conversion(&self, creative_set_id: &CreativeSetId) -> bool {
        self.iter().any(|e| {
            e.confirmation_type == ConfirmationType::Conversion
                && &e.creative_set_id == creative_set_id
        })
    }

    /// Whether the user marked the creative set as inappropriate
    pub fn is_flagged(&self, creative_set_id: &CreativeSetId) -> bool {
        self.iter().any(|e| {
            e.confirmation_type == ConfirmationType::Flagged
                && &e.creative_set_id == creative_set_id
        })
    }

    /// Most recent like/dislike for an advertiser
    pub fn latest_reaction(&self, advertiser_id: &AdvertiserId) -> Option<ConfirmationType> {
        self.iter()
            .rev()
            .filter(|e| &e.advertiser_id == advertiser_id)
            .map(|e| e.confirmation_type)
            .find(|t| matches!(t, ConfirmationType::Upvoted | ConfirmationType::Downvoted))
    }

    /// When a creative instance was last viewed
    pub fn last_seen_creative(&self, id: &CreativeInstanceId) -> Option<PhysicalTime> {
        self.iter()
            .rev()
            .find(|e| {
                e.confirmation_type == ConfirmationType::Viewed && &e.creative_instance_id == id
            })
            .map(|e| e.created_at)
    }

    /// When any creative of an advertiser was last viewed
    pub fn last_seen_advertiser(&self, id: &AdvertiserId) -> Option<PhysicalTime> {
        self.iter()
            .rev()
            .find(|e| e.confirmation_type == ConfirmationType::Viewed && &e.advertiser_id == id)
            .map(|e| e.created_at)
    }

    /// The event a conversion for `creative_set_id` credits: the latest click
    /// within the window, else the latest view
    pub fn conversion_candidate(
        &self,
        creative_set_id: &CreativeSetId,
        now: PhysicalTime,
        window_ms: u64,
    ) -> Option<&AdEvent> {
        let latest = |kind: ConfirmationType| {
            self.iter().rev().find(|e| {
                e.confirmation_type == kind
                    && &e.creative_set_id == creative_set_id
                    && within(e, now, window_ms)
            })
        };
        latest(ConfirmationType::Clicked).or_else(|| latest(ConfirmationType::Viewed))
    }
}

/// Owner-task state: the events plus the storage they persist to
pub struct AdEventLogState {
    events: Vec<AdEvent>,
    storage: Arc<dyn StorageEffects>,
}

#[async_trait]
impl OwnedState for AdEventLogState {
    type Checkpoint = Vec<AdEvent>;

    fn name(&self) -> &'static str {
        "ad_events"
    }

    fn checkpoint(&self) -> Vec<AdEvent> {
        self.events.clone()
    }

    fn restore(&mut self, checkpoint: Vec<AdEvent>) {
        self.events = checkpoint;
    }

    async fn commit(&mut self) -> Result<()> {
        store_json(self.storage.as_ref(), storage_keys::AD_EVENTS, &self.events).await
    }
}

impl AdEventLogState {
    fn append(&mut self, mut event: AdEvent) -> AdEvent {
        let floor = self
            .events
            .iter()
            .rev()
            .find(|e| e.creative_instance_id == event.creative_instance_id)
            .map(|e| e.created_at);
        if let Some(floor) = floor {
            if event.created_at < floor {
                debug!(
                    creative_instance_id = %event.creative_instance_id,
                    "clamping out-of-order ad event timestamp"
                );
                event.created_at = floor;
            }
        }
        self.events.push(event.clone());
        event
    }
}

/// Handle to the ad event log
#[derive(Debug, Clone)]
pub struct AdEventLog {
    owner: StateOwner<AdEventLogState>,
}

impl AdEventLog {
    /// Load persisted history and start the owner task
    pub async fn load(storage: Arc<dyn StorageEffects>) -> Result<Self> {
        let events: Vec<AdEvent> = load_json(storage.as_ref(), storage_keys::AD_EVENTS)
            .await?
            .unwrap_or_default();
        debug!(events = events.len(), "loaded ad events");
        Ok(Self {
            owner: StateOwner::spawn(AdEventLogState { events, storage }),
        })
    }

    /// Append an event. A timestamp earlier than the creative's previous
    /// event is raised to it. Returns the event as stored.
    pub async fn append(&self, event: AdEvent) -> Result<AdEvent> {
        self.owner.mutate(move |state| state.append(event)).await
    }

    /// Snapshot of the history
    pub async fn list(&self) -> Result<AdEventList> {
        self.owner
            .read(|state| AdEventList::new(state.events.clone()))
            .await
    }

    /// Drop events older than `cutoff`, returning how many were removed
    pub async fn purge_before(&self, cutoff: PhysicalTime) -> Result<usize> {
        self.owner
            .mutate(move |state| {
                let before = state.events.len();
                state.events.retain(|e| e.created_at >= cutoff);
                before - state.events.len()
            })
            .await
    }
}
