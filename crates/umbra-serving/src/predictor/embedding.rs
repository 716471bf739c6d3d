//! Page-embedding similarity voting
//!
//! Each stored page embedding votes for the candidate most similar to it.
//! Votes become a probability distribution and one draw picks the winner.

use async_trait::async_trait;
use tracing::debug;
use umbra_catalog::resources::TextEmbeddingTable;
use umbra_catalog::CreativeAd;
use umbra_core::effects::RandomEffects;
use umbra_core::Result;

use super::text::tokenize;
use super::{Ranker, RankingInput};

/// Cosine similarity, 0 for zero-length or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Mean of the vectors of every known token, `None` when no token is known
pub fn page_embedding(table: &TextEmbeddingTable, text: &str) -> Option<Vec<f32>> {
    let mut sum = vec![0.0f32; table.dimension];
    let mut count = 0usize;
    for token in tokenize(text) {
        if let Some(vector) = table.vectors.get(&token) {
            for (acc, x) in sum.iter_mut().zip(vector) {
                *acc += x;
            }
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let n = count as f32;
    Some(sum.into_iter().map(|x| x / n).collect())
}

/// Votes per candidate: each page embedding votes for its most similar
/// candidate, earliest candidate on ties
pub fn count_votes(candidates: &[&CreativeAd], page_embeddings: &[Vec<f32>]) -> Vec<u32> {
    let mut votes = vec![0u32; candidates.len()];
    for page in page_embeddings {
        let mut best: Option<(usize, f64)> = None;
        for (index, ad) in candidates.iter().enumerate() {
            if ad.embedding.len() != page.len() || page.is_empty() {
                continue;
            }
            let similarity = cosine_similarity(&ad.embedding, page);
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((index, similarity));
            }
        }
        if let Some((index, _)) = best {
            votes[index] += 1;
        }
    }
    votes
}

/// `votes_i / Σ votes`; empty when no votes were cast
pub fn normalize_votes(votes: &[u32]) -> Vec<f64> {
    let total: u64 = votes.iter().map(|v| u64::from(*v)).sum();
    if total == 0 {
        return Vec::new();
    }
    votes
        .iter()
        .map(|v| f64::from(*v) / total as f64)
        .collect()
}

/// Index whose cumulative probability first exceeds `draw`
pub fn select_by_draw(probabilities: &[f64], draw: f64) -> Option<usize> {
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (index, p) in probabilities.iter().enumerate() {
        if *p <= 0.0 {
            continue;
        }
        cumulative += p;
        last_positive = Some(index);
        if draw < cumulative {
            return Some(index);
        }
    }
    // rounding can leave the total a hair under 1
    last_positive
}

/// Picks one candidate by similarity votes
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingRanker;

#[async_trait]
impl Ranker for EmbeddingRanker {
    fn name(&self) -> &'static str {
        "embedding"
    }

    async fn rank<'a>(
        &self,
        candidates: Vec<&'a CreativeAd>,
        input: &RankingInput<'_>,
        random: &dyn RandomEffects,
    ) -> Result<Vec<&'a CreativeAd>> {
        let votes = count_votes(&candidates, &input.user_model.page_embeddings);
        let probabilities = normalize_votes(&votes);
        if probabilities.is_empty() {
            debug!(candidates = candidates.len(), "no embedding votes; no prediction");
            return Ok(Vec::new());
        }
        let draw = random.random_unit().await;
        Ok(select_by_draw(&probabilities, draw)
            .and_then(|index| candidates.get(index).copied())
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::test_support::ad;
    use crate::user_model::UserModel;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use umbra_catalog::AdEventList;
    use umbra_core::PhysicalTime;

    #[test]
    fn test_equal_votes_split_evenly() {
        assert_eq!(normalize_votes(&[2, 2]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_zero_votes_is_no_prediction() {
        assert!(normalize_votes(&[0, 0, 0]).is_empty());
        assert!(normalize_votes(&[]).is_empty());
        assert_eq!(select_by_draw(&[], 0.3), None);
    }

    #[test]
    fn test_select_by_draw() {
        let p = [0.25, 0.0, 0.75];
        assert_eq!(select_by_draw(&p, 0.0), Some(0));
        assert_eq!(select_by_draw(&p, 0.3), Some(2));
        assert_eq!(select_by_draw(&p, 0.999_999), Some(2));
    }

    #[test]
    fn test_page_embedding_mean() {
        let table = TextEmbeddingTable {
            version: 1,
            dimension: 2,
            vectors: HashMap::from([
                ("cat".to_string(), vec![1.0, 0.0]),
                ("dog".to_string(), vec![0.0, 1.0]),
            ]),
        };
        assert_eq!(page_embedding(&table, "cat and dog"), Some(vec![0.5, 0.5]));
        assert_eq!(page_embedding(&table, "nothing known"), None);
    }

    #[tokio::test]
    async fn test_votes_pick_most_similar() {
        let mut north = ad("north");
        north.embedding = vec![0.0, 1.0];
        let mut east = ad("east");
        east.embedding = vec![1.0, 0.0];
        let user_model = UserModel {
            page_embeddings: vec![vec![0.9, 0.1], vec![1.0, 0.2]],
            ..UserModel::default()
        };
        let events = AdEventList::default();
        let input = RankingInput {
            now: PhysicalTime::from_ms(0),
            user_model: &user_model,
            ad_events: &events,
        };

        assert_eq!(count_votes(&[&north, &east], &user_model.page_embeddings), vec![0, 2]);

        let random = umbra_testkit::SeededRandom::new(7);
        let ranked = EmbeddingRanker.rank(vec![&north, &east], &input, &random).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].creative_instance_id.as_str(), "east");

        let no_pages = UserModel::default();
        let input = RankingInput { user_model: &no_pages, ..input };
        let ranked = EmbeddingRanker.rank(vec![&north, &east], &input, &random).await.unwrap();
        assert!(ranked.is_empty());
    }

    proptest! {
        #[test]
        fn prop_normalized_votes_sum_to_one(votes in proptest::collection::vec(0u32..100, 1..16)) {
            let p = normalize_votes(&votes);
            if votes.iter().all(|v| *v == 0) {
                prop_assert!(p.is_empty());
            } else {
                prop_assert_eq!(p.len(), votes.len());
                let total: f64 = p.iter().sum();
                prop_assert!((total - 1.0).abs() < 1e-9);
            }
        }
    }
}
