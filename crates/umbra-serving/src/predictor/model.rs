//! Weighted linear model over user-model and history features

use async_trait::async_trait;
use umbra_catalog::{AdEventList, CreativeAd};
use umbra_core::config::ModelWeights;
use umbra_core::effects::RandomEffects;
use umbra_core::time::HOUR_MS;
use umbra_core::{parent_segment, PhysicalTime, Result};

use super::{Ranker, RankingInput};
use crate::user_model::UserModel;

/// Feature values for one candidate, each in `[0, 1]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Features {
    /// Ad segment is an intent segment
    pub intent_child: f64,
    /// Ad parent segment is an intent parent segment
    pub intent_parent: f64,
    /// Ad segment is a latent interest segment
    pub latent_interest_child: f64,
    /// Ad parent segment is a latent interest parent segment
    pub latent_interest_parent: f64,
    /// Ad segment is an interest segment
    pub interest_child: f64,
    /// Ad parent segment is an interest parent segment
    pub interest_parent: f64,
    /// Recency of the last view of this creative
    pub last_seen_ad: f64,
    /// Recency of the last view of this advertiser
    pub last_seen_advertiser: f64,
    /// Inverse campaign priority
    pub priority: f64,
}

fn flag(hit: bool) -> f64 {
    if hit {
        1.0
    } else {
        0.0
    }
}

fn child_match(segment: &str, segments: &[String]) -> f64 {
    flag(segments.iter().any(|s| s == segment))
}

fn parent_match(segment: &str, segments: &[String]) -> f64 {
    let parent = parent_segment(segment);
    flag(segments.iter().any(|s| parent_segment(s) == parent))
}

/// `min(hours since / 24, 1)`, 1 when never seen
fn recency(last_seen: Option<PhysicalTime>, now: PhysicalTime) -> f64 {
    match last_seen {
        Some(at) => (now.since(at) as f64 / HOUR_MS as f64 / 24.0).min(1.0),
        None => 1.0,
    }
}

impl Features {
    /// Extract features for `ad`
    pub fn extract(
        ad: &CreativeAd,
        user_model: &UserModel,
        ad_events: &AdEventList,
        now: PhysicalTime,
    ) -> Self {
        let segment = ad.segment.as_str();
        Self {
            intent_child: child_match(segment, &user_model.intent_segments),
            intent_parent: parent_match(segment, &user_model.intent_segments),
            latent_interest_child: child_match(segment, &user_model.latent_interest_segments),
            latent_interest_parent: parent_match(segment, &user_model.latent_interest_segments),
            interest_child: child_match(segment, &user_model.interest_segments),
            interest_parent: parent_match(segment, &user_model.interest_segments),
            last_seen_ad: recency(ad_events.last_seen_creative(&ad.creative_instance_id), now),
            last_seen_advertiser: recency(ad_events.last_seen_advertiser(&ad.advertiser_id), now),
            priority: if ad.priority == 0 {
                0.0
            } else {
                1.0 / f64::from(ad.priority)
            },
        }
    }

    /// Weighted sum
    pub fn score(&self, w: &ModelWeights) -> f64 {
        self.intent_child * w.intent_child
            + self.intent_parent * w.intent_parent
            + self.latent_interest_child * w.latent_interest_child
            + self.latent_interest_parent * w.latent_interest_parent
            + self.interest_child * w.interest_child
            + self.interest_parent * w.interest_parent
            + self.last_seen_ad * w.last_seen_ad
            + self.last_seen_advertiser * w.last_seen_advertiser
            + self.priority * w.priority
    }
}

/// Scores every candidate and sorts by descending score
#[derive(Debug, Clone, Default)]
pub struct ModelRanker {
    weights: ModelWeights,
}

impl ModelRanker {
    /// Ranker with the given weights
    pub fn new(weights: ModelWeights) -> Self {
        Self { weights }
    }

    /// Scores in candidate order
    pub fn scores(&self, candidates: &[&CreativeAd], input: &RankingInput<'_>) -> Vec<f64> {
        candidates
            .iter()
            .map(|ad| {
                Features::extract(ad, input.user_model, input.ad_events, input.now)
                    .score(&self.weights)
            })
            .collect()
    }
}

#[async_trait]
impl Ranker for ModelRanker {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn rank<'a>(
        &self,
        candidates: Vec<&'a CreativeAd>,
        input: &RankingInput<'_>,
        _random: &dyn RandomEffects,
    ) -> Result<Vec<&'a CreativeAd>> {
        let scores = self.scores(&candidates, input);
        let mut ranked: Vec<(f64, &'a CreativeAd)> = scores.into_iter().zip(candidates).collect();
        // sort_by is stable, so equal scores keep catalog order
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(ranked.into_iter().map(|(_, ad)| ad).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::test_support::ad;
    use umbra_catalog::AdEvent;
    use umbra_core::{ConfirmationType, PlacementId};

    #[test]
    fn test_segment_features() {
        let mut creative = ad("a");
        creative.segment = "technology & computing-software".to_string();
        let user_model = UserModel {
            intent_segments: vec!["technology & computing-software".to_string()],
            interest_segments: vec!["technology & computing-hardware".to_string()],
            ..UserModel::default()
        };

        let f = Features::extract(
            &creative,
            &user_model,
            &AdEventList::default(),
            PhysicalTime::from_ms(0),
        );
        assert_eq!(f.intent_child, 1.0);
        assert_eq!(f.intent_parent, 1.0);
        assert_eq!(f.interest_child, 0.0);
        assert_eq!(f.interest_parent, 1.0);
        assert_eq!(f.latent_interest_parent, 0.0);
        assert_eq!(f.last_seen_ad, 1.0);
        assert_eq!(f.priority, 1.0);
    }

    #[test]
    fn test_recency_and_priority() {
        let mut creative = ad("a");
        creative.priority = 4;
        let seen = AdEvent::for_creative(
            &creative,
            PlacementId::new("p"),
            ConfirmationType::Viewed,
            PhysicalTime::from_ms(0),
        );
        let events = AdEventList::new(vec![seen]);

        let at = PhysicalTime::from_ms(6 * HOUR_MS);
        let f = Features::extract(&creative, &UserModel::default(), &events, at);
        assert!((f.last_seen_ad - 0.25).abs() < 1e-9);
        assert!((f.priority - 0.25).abs() < 1e-9);

        creative.priority = 0;
        let at = PhysicalTime::from_ms(0);
        let f = Features::extract(&creative, &UserModel::default(), &events, at);
        assert_eq!(f.priority, 0.0);
    }

    #[tokio::test]
    async fn test_ties_keep_catalog_order() {
        let ads = vec![ad("a"), ad("b"), ad("c")];
        let mut better = ad("d");
        better.segment = "sports".to_string();
        let user_model = UserModel {
            interest_segments: vec!["sports".to_string()],
            ..UserModel::default()
        };
        let events = AdEventList::default();
        let input = RankingInput {
            now: PhysicalTime::from_ms(0),
            user_model: &user_model,
            ad_events: &events,
        };
        let random = umbra_testkit::SeededRandom::new(1);

        let mut candidates: Vec<&CreativeAd> = ads.iter().collect();
        candidates.push(&better);
        let ranked = ModelRanker::default()
            .rank(candidates, &input, &random)
            .await
            .unwrap();
        let ids: Vec<_> = ranked.iter().map(|a| a.creative_instance_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a", "b", "c"]);
    }
}
