//! What the engine believes the user is interested in

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use umbra_catalog::Resources;

use crate::predictor::embedding::page_embedding;
use crate::predictor::text::classify;

/// Segments and page embeddings consulted while ranking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserModel {
    /// Segments from purchase-intent signals
    pub intent_segments: Vec<String>,
    /// Segments inferred from long-term behaviour
    pub latent_interest_segments: Vec<String>,
    /// Segments from classified page text
    pub interest_segments: Vec<String>,
    /// Embeddings of recently read pages
    pub page_embeddings: Vec<Vec<f32>>,
}

impl UserModel {
    /// Derive interest segments and page embeddings from page texts using
    /// whichever text resources are loaded. Interest segments are the
    /// `top_segments` highest mean-probability segments across pages.
    pub fn from_page_texts(texts: &[String], resources: &Resources, top_segments: usize) -> Self {
        let mut model = Self::default();

        if let Some(classifier) = &resources.text_classification {
            let mut totals: HashMap<String, f64> = HashMap::new();
            let mut pages = 0usize;
            for text in texts {
                let ranked = classify(classifier, text);
                if ranked.is_empty() {
                    continue;
                }
                pages += 1;
                for (segment, p) in ranked {
                    *totals.entry(segment).or_default() += p;
                }
            }
            if pages > 0 {
                let mut ranked: Vec<(String, f64)> = totals.into_iter().collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                model.interest_segments = ranked
                    .into_iter()
                    .take(top_segments)
                    .map(|(segment, _)| segment)
                    .collect();
            }
        }

        if let Some(table) = &resources.text_embedding {
            model.page_embeddings = texts
                .iter()
                .filter_map(|text| page_embedding(table, text))
                .collect();
        }

        model
    }

    /// Add intent segments, keeping first-seen order without duplicates
    pub fn with_intent_segments(mut self, segments: impl IntoIterator<Item = String>) -> Self {
        for segment in segments {
            if !self.intent_segments.contains(&segment) {
                self.intent_segments.push(segment);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_catalog::{ResourceKind, ResourceStore};

    #[test]
    fn test_no_resources_yields_empty_model() {
        let model = UserModel::from_page_texts(&["football".to_string()], &Resources::default(), 3);
        assert_eq!(model, UserModel::default());
    }

    #[test]
    fn test_embeddings_from_resources() {
        let store = ResourceStore::new();
        store
            .update(
                ResourceKind::TextEmbedding,
                r#"{"version": 1, "dimension": 2, "embeddings": {"cat": [1.0, 0.0]}}"#,
            )
            .unwrap();
        let texts = vec!["a cat".to_string(), "nothing".to_string()];
        let model = UserModel::from_page_texts(&texts, &store.current().value, 3);
        assert_eq!(model.page_embeddings, vec![vec![1.0, 0.0]]);
    }

    #[test]
    fn test_intent_segments_dedupe() {
        let model = UserModel::default()
            .with_intent_segments(["autos".to_string(), "autos".to_string()]);
        assert_eq!(model.intent_segments, vec!["autos".to_string()]);
    }
}
