//! Epsilon-greedy bandit over segments
//!
//! Arms are keyed by segment and persisted under
//! [`storage_keys::BANDIT_ARMS`]. With probability ε a random candidate
//! segment is explored; otherwise the highest-valued arm is exploited.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;
use umbra_catalog::CreativeAd;
use umbra_core::effects::storage::{load_json, store_json};
use umbra_core::effects::{storage_keys, RandomEffects, StorageEffects};
use umbra_core::{OwnedState, Result, StateOwner};

use super::{Ranker, RankingInput};

/// Running reward estimate for one segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    /// Mean reward
    pub value: f64,
    /// Times feedback was recorded
    pub pulls: u64,
}

impl BanditArm {
    /// Incremental mean update with a 0/1 reward
    pub fn record(&mut self, reward: bool) {
        self.pulls += 1;
        let reward = if reward { 1.0 } else { 0.0 };
        self.value += (reward - self.value) / self.pulls as f64;
    }
}

/// Pick a segment among `segments`. Unknown segments count as value 0.
pub fn choose_arm(
    arms: &BTreeMap<String, BanditArm>,
    segments: &BTreeSet<String>,
    epsilon: f64,
    explore_draw: f64,
    pick_draw: f64,
) -> Option<String> {
    if segments.is_empty() {
        return None;
    }
    if explore_draw < epsilon {
        let index = ((pick_draw * segments.len() as f64) as usize).min(segments.len() - 1);
        return segments.iter().nth(index).cloned();
    }

    let mut best: Option<(&String, f64)> = None;
    // BTreeSet iterates by name, and only a strictly better value replaces
    for segment in segments {
        let value = arms.get(segment).map_or(0.0, |arm| arm.value);
        if best.map_or(true, |(_, v)| value > v) {
            best = Some((segment, value));
        }
    }
    best.map(|(segment, _)| segment.clone())
}

/// Owner-task state for the arms
pub struct BanditArmsState {
    arms: BTreeMap<String, BanditArm>,
    storage: Arc<dyn StorageEffects>,
}

#[async_trait]
impl OwnedState for BanditArmsState {
    type Checkpoint = BTreeMap<String, BanditArm>;

    fn name(&self) -> &'static str {
        "bandit_arms"
    }

    fn checkpoint(&self) -> BTreeMap<String, BanditArm> {
        self.arms.clone()
    }

    fn restore(&mut self, checkpoint: BTreeMap<String, BanditArm>) {
        self.arms = checkpoint;
    }

    async fn commit(&mut self) -> Result<()> {
        store_json(self.storage.as_ref(), storage_keys::BANDIT_ARMS, &self.arms).await
    }
}

/// Handle to the persisted arms
#[derive(Debug, Clone)]
pub struct BanditArms {
    owner: StateOwner<BanditArmsState>,
}

impl BanditArms {
    /// Load persisted arms and start the owner task
    pub async fn load(storage: Arc<dyn StorageEffects>) -> Result<Self> {
        let arms = load_json(storage.as_ref(), storage_keys::BANDIT_ARMS)
            .await?
            .unwrap_or_default();
        Ok(Self {
            owner: StateOwner::spawn(BanditArmsState { arms, storage }),
        })
    }

    /// Copy of every arm
    pub async fn snapshot(&self) -> Result<BTreeMap<String, BanditArm>> {
        self.owner.read(|state| state.arms.clone()).await
    }

    /// Record a reward for `segment`, returning the updated arm
    pub async fn feedback(&self, segment: &str, reward: bool) -> Result<BanditArm> {
        let segment = segment.to_string();
        self.owner
            .mutate(move |state| {
                let arm = state.arms.entry(segment).or_default();
                arm.record(reward);
                *arm
            })
            .await
    }
}

/// Narrows candidates to the chosen segment, catalog order preserved
#[derive(Debug, Clone)]
pub struct BanditRanker {
    arms: BanditArms,
    epsilon: f64,
}

impl BanditRanker {
    /// Ranker over `arms` exploring with probability `epsilon`
    pub fn new(arms: BanditArms, epsilon: f64) -> Self {
        Self { arms, epsilon }
    }

    /// The arms this ranker reads
    pub fn arms(&self) -> &BanditArms {
        &self.arms
    }
}

#[async_trait]
impl Ranker for BanditRanker {
    fn name(&self) -> &'static str {
        "bandit"
    }

    async fn rank<'a>(
        &self,
        candidates: Vec<&'a CreativeAd>,
        _input: &RankingInput<'_>,
        random: &dyn RandomEffects,
    ) -> Result<Vec<&'a CreativeAd>> {
        let segments: BTreeSet<String> = candidates.iter().map(|ad| ad.segment.clone()).collect();
        let arms = self.arms.snapshot().await?;
        let explore_draw = random.random_unit().await;
        let pick_draw = random.random_unit().await;

        let Some(segment) = choose_arm(&arms, &segments, self.epsilon, explore_draw, pick_draw)
        else {
            return Ok(Vec::new());
        };
        debug!(%segment, explored = explore_draw < self.epsilon, "bandit chose segment");
        Ok(candidates
            .into_iter()
            .filter(|ad| ad.segment == segment)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_effects::MemoryStorageHandler;

    fn segments(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_arm_update_is_running_mean() {
        let mut arm = BanditArm::default();
        arm.record(true);
        assert_eq!(arm.value, 1.0);
        arm.record(false);
        assert_eq!(arm.value, 0.5);
        arm.record(false);
        assert!((arm.value - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(arm.pulls, 3);
    }

    #[test]
    fn test_exploit_picks_best_with_name_ties() {
        let mut arms = BTreeMap::new();
        arms.insert("b".to_string(), BanditArm { value: 0.5, pulls: 2 });
        arms.insert("c".to_string(), BanditArm { value: 0.5, pulls: 4 });
        arms.insert("a".to_string(), BanditArm { value: 0.1, pulls: 9 });

        let chosen = choose_arm(&arms, &segments(&["a", "b", "c"]), 0.25, 0.9, 0.0);
        assert_eq!(chosen.as_deref(), Some("b"));
    }

    #[test]
    fn test_explore_uses_pick_draw() {
        let arms = BTreeMap::new();
        let all = segments(&["a", "b", "c", "d"]);
        assert_eq!(choose_arm(&arms, &all, 0.25, 0.1, 0.0).as_deref(), Some("a"));
        assert_eq!(choose_arm(&arms, &all, 0.25, 0.1, 0.6).as_deref(), Some("c"));
        assert_eq!(choose_arm(&arms, &all, 0.25, 0.1, 0.999).as_deref(), Some("d"));
        assert_eq!(choose_arm(&arms, &BTreeSet::new(), 0.25, 0.1, 0.5), None);
    }

    #[tokio::test]
    async fn test_feedback_persists() {
        let storage = Arc::new(MemoryStorageHandler::new());
        let arms = BanditArms::load(storage.clone()).await.unwrap();
        arms.feedback("sports", true).await.unwrap();
        arms.feedback("sports", false).await.unwrap();

        let reloaded = BanditArms::load(storage).await.unwrap();
        let snapshot = reloaded.snapshot().await.unwrap();
        assert_eq!(snapshot["sports"].pulls, 2);
        assert_eq!(snapshot["sports"].value, 0.5);
    }
}
