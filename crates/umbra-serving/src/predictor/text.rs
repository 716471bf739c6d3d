//! Page text classification
//!
//! Text is tokenized, hashed into a fixed number of buckets by character
//! n-grams (FNV-1a), and fed through a per-segment linear model whose
//! outputs are softmaxed into segment probabilities.

use umbra_catalog::resources::TextClassificationModel;

const MIN_TOKEN_CHARS: usize = 3;
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Lowercase alphanumeric tokens of at least three characters
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// L2-normalized bucket counts of every character n-gram of every token
pub fn hash_vectorize(tokens: &[String], ngram_sizes: &[usize], bucket_count: usize) -> Vec<f64> {
    let mut buckets = vec![0.0; bucket_count];
    if bucket_count == 0 {
        return buckets;
    }

    for token in tokens {
        let chars: Vec<char> = token.chars().collect();
        for &size in ngram_sizes {
            if size == 0 || size > chars.len() {
                continue;
            }
            for window in chars.windows(size) {
                let gram: String = window.iter().collect();
                let bucket = fnv1a(gram.as_bytes()) as usize % bucket_count;
                buckets[bucket] += 1.0;
            }
        }
    }

    let norm = buckets.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in &mut buckets {
            *x /= norm;
        }
    }
    buckets
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Segment probabilities for `text`, most likely first. Empty when the text
/// has no usable tokens.
pub fn classify(model: &TextClassificationModel, text: &str) -> Vec<(String, f64)> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Vec::new();
    }
    let features = hash_vectorize(&tokens, &model.ngram_sizes, model.bucket_count);

    let scores: Vec<f64> = model
        .weights
        .iter()
        .zip(&model.biases)
        .map(|(row, bias)| row.iter().zip(&features).map(|(w, x)| w * x).sum::<f64>() + bias)
        .collect();

    let mut ranked: Vec<(String, f64)> = model
        .segments
        .iter()
        .cloned()
        .zip(softmax(&scores))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> TextClassificationModel {
        let bucket_count = 16;
        let probe = hash_vectorize(&tokenize("football"), &[3], bucket_count);
        TextClassificationModel {
            version: 1,
            ngram_sizes: vec![3],
            bucket_count,
            segments: vec!["sports".to_string(), "technology & computing".to_string()],
            weights: vec![probe.iter().map(|x| x * 10.0).collect(), vec![0.0; bucket_count]],
            biases: vec![0.0, 0.0],
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("The QUICK, brown-fox! a is ok"),
            vec!["the", "quick", "brown", "fox"]
        );
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
    }

    #[test]
    fn test_vector_is_normalized() {
        let v = hash_vectorize(&tokenize("hello world"), &[2, 3], 32);
        let norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_classify_ranks_matching_segment_first() {
        let ranked = classify(&model(), "Football scores tonight");
        assert_eq!(ranked[0].0, "sports");
        let total: f64 = ranked.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(classify(&model(), "a b").is_empty());
    }
}
