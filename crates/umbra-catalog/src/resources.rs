//! Resource Store
//!
//! Downloadable resources that parameterise serving and conversions:
//!
//! | Resource | Used by |
//! |----------|---------|
//! | anti-targeting site lists | anti-targeting exclusion rule |
//! | text classification model | user model (page text → segment scores) |
//! | text embedding table | embedding-based ranking |
//! | conversion id patterns | verifiable conversion id extraction |
//!
//! Each resource arrives as versioned JSON. A resource that fails
//! validation is rejected whole with [`UmbraError::MalformedResource`] and
//! the previously published snapshot stays active.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use umbra_core::{CreativeSetId, Result, SnapshotCell, UmbraError, Versioned};

/// Which resource a payload carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Anti-targeting site lists
    AntiTargeting,
    /// Text classification model
    TextClassification,
    /// Text embedding table
    TextEmbedding,
    /// Conversion id patterns
    ConversionIdPatterns,
}

// ============================================================================
// Anti-targeting
// ============================================================================

/// Sites whose visitors must not see a creative set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AntiTargeting {
    /// Resource version
    pub version: u32,
    /// Hosts per creative set
    pub sites: HashMap<CreativeSetId, HashSet<String>>,
}

impl AntiTargeting {
    /// Whether `host` is anti-targeted for `creative_set_id`
    pub fn is_anti_targeted(&self, creative_set_id: &CreativeSetId, host: &str) -> bool {
        self.sites
            .get(creative_set_id)
            .is_some_and(|hosts| hosts.contains(host))
    }
}

#[derive(Deserialize)]
struct RawAntiTargeting {
    version: u32,
    sites: BTreeMap<String, Vec<String>>,
}

fn parse_anti_targeting(json: &str) -> Result<AntiTargeting> {
    let raw: RawAntiTargeting = serde_json::from_str(json)
        .map_err(|e| UmbraError::malformed_resource(format!("anti-targeting: {e}")))?;

    let mut sites = HashMap::new();
    for (creative_set_id, hosts) in raw.sites {
        if creative_set_id.is_empty() {
            return Err(UmbraError::malformed_resource(
                "anti-targeting: empty creative set id",
            ));
        }
        let hosts: HashSet<String> = hosts
            .into_iter()
            .map(|h| normalize_host(&h))
            .filter(|h| !h.is_empty())
            .collect();
        sites.insert(CreativeSetId::new(creative_set_id), hosts);
    }

    Ok(AntiTargeting {
        version: raw.version,
        sites,
    })
}

/// Lowercase host of a URL or bare host string
pub fn normalize_host(url_or_host: &str) -> String {
    let without_scheme = url_or_host
        .split_once("://")
        .map_or(url_or_host, |(_, rest)| rest);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit_once('@').map_or(host, |(_, h)| h);
    let host = host.split(':').next().unwrap_or_default();
    host.trim_start_matches("www.").to_ascii_lowercase()
}

// ============================================================================
// Text classification
// ============================================================================

/// Hash-vectorizer plus linear model mapping page text to segment scores
#[derive(Debug, Clone, PartialEq)]
pub struct TextClassificationModel {
    /// Resource version
    pub version: u32,
    /// Character n-gram sizes fed to the vectorizer
    pub ngram_sizes: Vec<usize>,
    /// Number of hash buckets
    pub bucket_count: usize,
    /// Segment names, one per weight row
    pub segments: Vec<String>,
    /// Weight rows, `segments.len()` × `bucket_count`
    pub weights: Vec<Vec<f64>>,
    /// Bias per segment
    pub biases: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTextClassification {
    version: u32,
    ngram_sizes: Vec<usize>,
    bucket_count: usize,
    segments: Vec<String>,
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
}

fn parse_text_classification(json: &str) -> Result<TextClassificationModel> {
    let raw: RawTextClassification = serde_json::from_str(json)
        .map_err(|e| UmbraError::malformed_resource(format!("text classification: {e}")))?;

    let malformed =
        |msg: String| UmbraError::malformed_resource(format!("text classification: {msg}"));

    if raw.bucket_count == 0 {
        return Err(malformed("bucket count is zero".into()));
    }
    if raw.ngram_sizes.is_empty() || raw.ngram_sizes.contains(&0) {
        return Err(malformed("n-gram sizes must be non-empty and positive".into()));
    }
    if raw.segments.is_empty() {
        return Err(malformed("no segments".into()));
    }
    if raw.weights.len() != raw.segments.len() || raw.biases.len() != raw.segments.len() {
        return Err(malformed(format!(
            "{} segments, {} weight rows, {} biases",
            raw.segments.len(),
            raw.weights.len(),
            raw.biases.len()
        )));
    }
    if let Some(row) = raw.weights.iter().position(|w| w.len() != raw.bucket_count) {
        return Err(malformed(format!(
            "weight row {row} does not have {} entries",
            raw.bucket_count
        )));
    }
    if raw
        .weights
        .iter()
        .flatten()
        .chain(&raw.biases)
        .any(|w| !w.is_finite())
    {
        return Err(malformed("non-finite weight".into()));
    }

    Ok(TextClassificationModel {
        version: raw.version,
        ngram_sizes: raw.ngram_sizes,
        bucket_count: raw.bucket_count,
        segments: raw.segments,
        weights: raw.weights,
        biases: raw.biases,
    })
}

// ============================================================================
// Text embedding
// ============================================================================

/// Token → vector table for page embeddings
#[derive(Debug, Clone, PartialEq)]
pub struct TextEmbeddingTable {
    /// Resource version
    pub version: u32,
    /// Vector length
    pub dimension: usize,
    /// Vectors by lowercase token
    pub vectors: HashMap<String, Vec<f32>>,
}

#[derive(Deserialize)]
struct RawTextEmbedding {
    version: u32,
    dimension: usize,
    embeddings: HashMap<String, Vec<f32>>,
}

fn parse_text_embedding(json: &str) -> Result<TextEmbeddingTable> {
    let raw: RawTextEmbedding = serde_json::from_str(json)
        .map_err(|e| UmbraError::malformed_resource(format!("text embedding: {e}")))?;

    if raw.dimension == 0 {
        return Err(UmbraError::malformed_resource(
            "text embedding: dimension is zero",
        ));
    }
    if let Some((token, _)) = raw
        .embeddings
        .iter()
        .find(|(_, v)| v.len() != raw.dimension || v.iter().any(|x| !x.is_finite()))
    {
        return Err(UmbraError::malformed_resource(format!(
            "text embedding: bad vector for {token:?}"
        )));
    }

    Ok(TextEmbeddingTable {
        version: raw.version,
        dimension: raw.dimension,
        vectors: raw
            .embeddings
            .into_iter()
            .map(|(token, v)| (token.to_lowercase(), v))
            .collect(),
    })
}

// ============================================================================
// Conversion id patterns
// ============================================================================

/// Where a conversion id pattern searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchIn {
    /// The matching URL of the redirect chain
    UrlRedirect,
    /// The landing page HTML
    Html,
}

/// How to pull an advertiser conversion id out of a page
#[derive(Debug, Clone)]
pub struct ConversionIdPattern {
    /// Wildcard pattern selecting the redirect-chain URL this applies to
    pub url_pattern: String,
    /// Search location
    pub search_in: SearchIn,
    /// Regex whose first capture group is the id
    pub id_pattern: Regex,
}

/// All conversion id patterns
#[derive(Debug, Clone, Default)]
pub struct ConversionIdPatterns {
    /// Resource version
    pub version: u32,
    /// Patterns in resource order
    pub patterns: Vec<ConversionIdPattern>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConversionIdPattern {
    url_pattern: String,
    search_in: SearchIn,
    id_pattern: String,
}

#[derive(Deserialize)]
struct RawConversionIdPatterns {
    version: u32,
    patterns: Vec<RawConversionIdPattern>,
}

fn parse_conversion_id_patterns(json: &str) -> Result<ConversionIdPatterns> {
    let raw: RawConversionIdPatterns = serde_json::from_str(json)
        .map_err(|e| UmbraError::malformed_resource(format!("conversion id patterns: {e}")))?;

    let patterns = raw
        .patterns
        .into_iter()
        .map(|p| {
            if p.url_pattern.is_empty() {
                return Err(UmbraError::malformed_resource(
                    "conversion id patterns: empty url pattern",
                ));
            }
            let id_pattern = Regex::new(&p.id_pattern).map_err(|e| {
                UmbraError::malformed_resource(format!(
                    "conversion id patterns: {}: {e}",
                    p.url_pattern
                ))
            })?;
            if id_pattern.captures_len() < 2 {
                return Err(UmbraError::malformed_resource(format!(
                    "conversion id patterns: {} has no capture group",
                    p.url_pattern
                )));
            }
            Ok(ConversionIdPattern {
                url_pattern: p.url_pattern,
                search_in: p.search_in,
                id_pattern,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ConversionIdPatterns {
        version: raw.version,
        patterns,
    })
}

// ============================================================================
// Store
// ============================================================================

/// The set of resources active at one point in time
#[derive(Debug, Clone, Default)]
pub struct Resources {
    /// Anti-targeting site lists
    pub anti_targeting: Arc<AntiTargeting>,
    /// Text classification model, if downloaded
    pub text_classification: Option<Arc<TextClassificationModel>>,
    /// Text embedding table, if downloaded
    pub text_embedding: Option<Arc<TextEmbeddingTable>>,
    /// Conversion id patterns
    pub conversion_id_patterns: Arc<ConversionIdPatterns>,
}

/// Versioned resource snapshots
#[derive(Debug)]
pub struct ResourceStore {
    cell: SnapshotCell<Resources>,
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore {
    /// Empty resources
    pub fn new() -> Self {
        Self {
            cell: SnapshotCell::new(Resources::default()),
        }
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<Versioned<Resources>> {
        self.cell.current()
    }

    /// Validate and publish one resource. On failure the current snapshot is
    /// left untouched.
    pub fn update(&self, kind: ResourceKind, json: &str) -> Result<u64> {
        let mut next = self.current().value.clone();

        let parsed = match kind {
            ResourceKind::AntiTargeting => {
                parse_anti_targeting(json).map(|r| next.anti_targeting = Arc::new(r))
            }
            ResourceKind::TextClassification => parse_text_classification(json)
                .map(|r| next.text_classification = Some(Arc::new(r))),
            ResourceKind::TextEmbedding => {
                parse_text_embedding(json).map(|r| next.text_embedding = Some(Arc::new(r)))
            }
            ResourceKind::ConversionIdPatterns => parse_conversion_id_patterns(json)
                .map(|r| next.conversion_id_patterns = Arc::new(r)),
        };

        if let Err(err) = parsed {
            warn!(?kind, error = %err, "rejected resource; keeping previous snapshot");
            return Err(err);
        }

        let version = self.cell.publish(next);
        info!(?kind, version, "published resources");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("https://www.Foo.com:443/bar?x=1"), "foo.com");
        assert_eq!(normalize_host("foo.com"), "foo.com");
        assert_eq!(normalize_host("http://user@bar.org/"), "bar.org");
    }

    #[test]
    fn test_anti_targeting() {
        let store = ResourceStore::new();
        store
            .update(
                ResourceKind::AntiTargeting,
                r#"{"version":1,"sites":{"set-1":["https://www.foo.com","bar.com"]}}"#,
            )
            .unwrap();

        let resources = store.current();
        let set = CreativeSetId::new("set-1");
        assert!(resources.value.anti_targeting.is_anti_targeted(&set, "foo.com"));
        assert!(resources.value.anti_targeting.is_anti_targeted(&set, "bar.com"));
        assert!(!resources
            .value
            .anti_targeting
            .is_anti_targeted(&CreativeSetId::new("set-2"), "foo.com"));
    }

    #[test]
    fn test_malformed_resource_keeps_previous() {
        let store = ResourceStore::new();
        store
            .update(
                ResourceKind::TextEmbedding,
                r#"{"version":1,"dimension":2,"embeddings":{"cat":[1.0,0.0]}}"#,
            )
            .unwrap();

        let result = store.update(
            ResourceKind::TextEmbedding,
            r#"{"version":2,"dimension":2,"embeddings":{"dog":[1.0]}}"#,
        );
        assert_matches!(result, Err(UmbraError::MalformedResource { .. }));

        let current = store.current();
        assert_eq!(current.version, 1);
        let table = current.value.text_embedding.as_ref().unwrap();
        assert_eq!(table.version, 1);
        assert!(table.vectors.contains_key("cat"));
    }

    #[test]
    fn test_text_classification_shape_checked() {
        let store = ResourceStore::new();
        let bad = r#"{"version":1,"ngramSizes":[3],"bucketCount":4,
            "segments":["a","b"],"weights":[[0,0,0,0]],"biases":[0,0]}"#;
        assert!(store.update(ResourceKind::TextClassification, bad).is_err());

        let good = r#"{"version":1,"ngramSizes":[3],"bucketCount":2,
            "segments":["a","b"],"weights":[[1,0],[0,1]],"biases":[0,0]}"#;
        store.update(ResourceKind::TextClassification, good).unwrap();
        assert!(store.current().value.text_classification.is_some());
    }

    #[test]
    fn test_conversion_id_patterns_require_capture_group() {
        let store = ResourceStore::new();
        let no_group = r#"{"version":1,"patterns":[
            {"urlPattern":"https://foo.com/*","searchIn":"url_redirect","idPattern":"qux_id=.*"}]}"#;
        assert!(store
            .update(ResourceKind::ConversionIdPatterns, no_group)
            .is_err());

        let invalid_regex = r#"{"version":1,"patterns":[
            {"urlPattern":"https://foo.com/*","searchIn":"html","idPattern":"(unclosed"}]}"#;
        assert!(store
            .update(ResourceKind::ConversionIdPatterns, invalid_regex)
            .is_err());

        let good = r#"{"version":1,"patterns":[
            {"urlPattern":"https://foo.com/*","searchIn":"url_redirect","idPattern":"qux_id=(.*)"}]}"#;
        store.update(ResourceKind::ConversionIdPatterns, good).unwrap();
        assert_eq!(
            store.current().value.conversion_id_patterns.patterns[0].search_in,
            SearchIn::UrlRedirect
        );
    }
}
