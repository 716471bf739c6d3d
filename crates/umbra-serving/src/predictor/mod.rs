//! Candidate ranking
//!
//! Each [`Ranker`] turns the post-exclusion candidates into an ordered
//! list for pacing. Model ranking scores every candidate; embedding and
//! bandit ranking narrow the list by a random draw and may return nothing.

pub mod bandit;
pub mod embedding;
pub mod model;
pub mod text;

pub use bandit::{choose_arm, BanditArm, BanditArms, BanditRanker};
pub use embedding::{cosine_similarity, normalize_votes, select_by_draw, EmbeddingRanker};
pub use model::{Features, ModelRanker};
pub use text::{classify, hash_vectorize, tokenize};

use async_trait::async_trait;
use umbra_catalog::{AdEventList, CreativeAd};
use umbra_core::effects::RandomEffects;
use umbra_core::{PhysicalTime, Result};

use crate::user_model::UserModel;

/// Inputs shared by every ranker
#[derive(Debug, Clone, Copy)]
pub struct RankingInput<'a> {
    /// Evaluation time
    pub now: PhysicalTime,
    /// Current user model
    pub user_model: &'a UserModel,
    /// History snapshot
    pub ad_events: &'a AdEventList,
}

/// Orders candidates for pacing
#[async_trait]
pub trait Ranker: Send + Sync {
    /// Ranker name for logs
    fn name(&self) -> &'static str;

    /// Best first. Candidates arrive in catalog order and ties must keep it.
    async fn rank<'a>(
        &self,
        candidates: Vec<&'a CreativeAd>,
        input: &RankingInput<'_>,
        random: &dyn RandomEffects,
    ) -> Result<Vec<&'a CreativeAd>>;
}
