//! Eligible ads orchestrator
//!
//! One serving decision walks `Idle → Filtering → Ranking → Pacing` and ends
//! `Selected` or `Exhausted`. Filtering runs the exclusion chain for the ad
//! unit, ranking applies the configured strategy, and pacing draws once per
//! ranked candidate until one passes its pass-through rate.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use umbra_catalog::resources::normalize_host;
use umbra_catalog::{AdEventLog, CatalogStore, CreativeAd, ResourceStore};
use umbra_core::config::{RankingStrategy, ServingConfig};
use umbra_core::{AdType, Result, UmbraConfig, UmbraEffects};

use crate::exclusion::{ExclusionChain, ExclusionContext};
use crate::pacing::should_serve;
use crate::predictor::{
    BanditArms, BanditRanker, EmbeddingRanker, ModelRanker, Ranker, RankingInput,
};
use crate::user_model::UserModel;

/// Stage of one serving decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    /// Not started
    Idle,
    /// Running exclusion rules
    Filtering,
    /// Ordering candidates
    Ranking,
    /// Drawing against pass-through rates
    Pacing,
    /// A creative was chosen
    Selected,
    /// Nothing to serve
    Exhausted,
}

struct Selection {
    ad_type: AdType,
    state: SelectionState,
}

impl Selection {
    fn new(ad_type: AdType) -> Self {
        Self {
            ad_type,
            state: SelectionState::Idle,
        }
    }

    fn advance(&mut self, next: SelectionState, candidates: usize) {
        debug!(
            ad_type = %self.ad_type,
            from = ?self.state,
            to = ?next,
            candidates,
            "serving transition"
        );
        self.state = next;
    }
}

/// Chooses the creative to serve for an ad unit
pub struct EligibleAds {
    serving: ServingConfig,
    browsing_history_entries: usize,
    catalog: Arc<CatalogStore>,
    resources: Arc<ResourceStore>,
    ad_events: AdEventLog,
    effects: UmbraEffects,
    chains: HashMap<AdType, ExclusionChain>,
    model: ModelRanker,
    embedding: EmbeddingRanker,
    bandit: BanditRanker,
}

impl std::fmt::Debug for EligibleAds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EligibleAds")
            .field("serving", &self.serving)
            .finish_non_exhaustive()
    }
}

impl EligibleAds {
    /// Wire the orchestrator to its stores
    pub fn new(
        config: &UmbraConfig,
        catalog: Arc<CatalogStore>,
        resources: Arc<ResourceStore>,
        ad_events: AdEventLog,
        bandit_arms: BanditArms,
        effects: UmbraEffects,
    ) -> Self {
        let chains = AdType::ALL
            .into_iter()
            .map(|ad_type| (ad_type, ExclusionChain::for_ad_type(ad_type)))
            .collect();
        Self {
            model: ModelRanker::new(config.serving.model_weights.clone()),
            embedding: EmbeddingRanker,
            bandit: BanditRanker::new(bandit_arms, config.serving.bandit_epsilon),
            serving: config.serving.clone(),
            browsing_history_entries: config.history.browsing_history_entries,
            catalog,
            resources,
            ad_events,
            effects,
            chains,
        }
    }

    fn ranker(&self, ad_type: AdType) -> &dyn Ranker {
        match self.serving.strategy_for(ad_type) {
            RankingStrategy::Model => &self.model,
            RankingStrategy::Embedding => &self.embedding,
            RankingStrategy::Bandit => &self.bandit,
        }
    }

    /// The creative to serve, or `None` when every candidate is excluded,
    /// unranked or paced
    pub async fn get_eligible_ad(
        &self,
        ad_type: AdType,
        user_model: &UserModel,
    ) -> Result<Option<CreativeAd>> {
        let mut selection = Selection::new(ad_type);

        let now = self.effects.now().await?;
        let catalog = self.catalog.current();
        let resources = self.resources.current();
        let ad_events = self.ad_events.list().await?;

        let platform = &self.effects.platform;
        let country_code = platform.country_code().await;
        let subdivision_code = platform.subdivision_code().await;
        let utc_offset_minutes = platform.utc_offset_minutes().await;
        let browsing_hosts: Vec<String> = platform
            .browsing_history(self.browsing_history_entries)
            .await
            .iter()
            .map(|entry| normalize_host(entry))
            .filter(|host| !host.is_empty())
            .collect();

        let ctx = ExclusionContext {
            now,
            ad_events: &ad_events,
            resources: &resources.value,
            browsing_hosts: &browsing_hosts,
            country_code: &country_code,
            subdivision_code: subdivision_code.as_deref(),
            utc_offset_minutes,
        };

        let all: Vec<&CreativeAd> = catalog.value.creatives_for(ad_type).collect();
        selection.advance(SelectionState::Filtering, all.len());
        let eligible = match self.chains.get(&ad_type) {
            Some(chain) => chain.filter(all, &ctx),
            None => ExclusionChain::for_ad_type(ad_type).filter(all, &ctx),
        };
        if eligible.is_empty() {
            selection.advance(SelectionState::Exhausted, 0);
            return Ok(None);
        }

        selection.advance(SelectionState::Ranking, eligible.len());
        let ranker = self.ranker(ad_type);
        let input = RankingInput {
            now,
            user_model,
            ad_events: &ad_events,
        };
        let ranked = ranker
            .rank(eligible, &input, self.effects.random.as_ref())
            .await?;

        selection.advance(SelectionState::Pacing, ranked.len());
        for ad in ranked {
            let draw = self.effects.random.random_unit().await;
            if should_serve(draw, ad.pass_through_rate) {
                selection.advance(SelectionState::Selected, 1);
                info!(
                    %ad_type,
                    ranker = ranker.name(),
                    creative_instance_id = %ad.creative_instance_id,
                    "selected ad"
                );
                return Ok(Some(ad.clone()));
            }
            debug!(
                creative_instance_id = %ad.creative_instance_id,
                draw,
                pass_through_rate = ad.pass_through_rate,
                "paced"
            );
        }

        selection.advance(SelectionState::Exhausted, 0);
        Ok(None)
    }
}
