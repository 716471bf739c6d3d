//! Conversions
//!
//! A page load converts a creative set when its wildcard URL pattern
//! matches any URL of the redirect chain and the user viewed or clicked one
//! of its creatives within the observation window. Advertisers that publish
//! an X25519 key receive a [`VerifiableConversionEnvelope`] carrying the
//! conversion id found on the page.

pub mod envelope;

pub use envelope::{seal, SealRandomness, VerifiableConversionEnvelope, ENVELOPE_ALGORITHM};

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use umbra_catalog::resources::{ConversionIdPatterns, SearchIn};
use umbra_catalog::{matches_any, matches_wildcard, AdEvent, AdEventList, Catalog, Resources};
use umbra_core::{CreativeSetId, PhysicalTime, Result, UmbraError};

/// Longest accepted conversion id
pub const MAX_CONVERSION_ID_LENGTH: usize = 30;

const CONVERSION_ID_META_TAG: &str =
    r#"(?i)<meta[^>]*name\s*=\s*["']ad-conversion-id["'][^>]*content\s*=\s*["']([^"']*)["']"#;

static CONVERSION_ID_META: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

fn conversion_id_meta() -> Result<&'static Regex> {
    CONVERSION_ID_META
        .get_or_init(|| Regex::new(CONVERSION_ID_META_TAG))
        .as_ref()
        .map_err(|e| UmbraError::internal(format!("conversion id meta pattern: {e}")))
}

/// 1 to 30 characters of `[-a-zA-Z0-9]`
pub fn is_valid_conversion_id(id: &str) -> bool {
    (1..=MAX_CONVERSION_ID_LENGTH).contains(&id.len())
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// The id and key a verifiable conversion is sealed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiableConversion {
    /// Advertiser conversion id
    pub id: String,
    /// Advertiser X25519 public key, base64
    pub advertiser_public_key: String,
}

/// One creative set converted by a page load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionAction {
    /// Converted creative set
    pub creative_set_id: CreativeSetId,
    /// The ad event the conversion credits
    pub ad_event: AdEvent,
    /// Present when the advertiser accepts verifiable conversions and the
    /// page carried an id
    pub verifiable: Option<VerifiableConversion>,
}

fn first_capture(pattern: &Regex, haystack: &str) -> Option<String> {
    pattern
        .captures(haystack)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Pull the advertiser conversion id out of a page load. The first id
/// pattern whose URL pattern matches the redirect chain decides; without
/// one, the `ad-conversion-id` meta tag is used.
pub fn extract_conversion_id(
    redirect_chain: &[String],
    html: &str,
    patterns: &ConversionIdPatterns,
) -> Result<Option<String>> {
    for pattern in &patterns.patterns {
        let Some(url) = redirect_chain
            .iter()
            .find(|url| matches_wildcard(&pattern.url_pattern, url))
        else {
            continue;
        };
        let haystack = match pattern.search_in {
            SearchIn::UrlRedirect => url.as_str(),
            SearchIn::Html => html,
        };
        let id = first_capture(&pattern.id_pattern, haystack);
        return Ok(id.filter(|id| is_valid_conversion_id(id)));
    }

    let meta = conversion_id_meta()?;
    Ok(first_capture(meta, html).filter(|id| is_valid_conversion_id(id)))
}

/// Creative sets converted by a page load, at most one action per set
pub fn detect_conversions(
    redirect_chain: &[String],
    html: &str,
    catalog: &Catalog,
    ad_events: &AdEventList,
    resources: &Resources,
    now: PhysicalTime,
) -> Result<Vec<ConversionAction>> {
    let mut converted: HashSet<CreativeSetId> = HashSet::new();
    let mut conversion_id: Option<Option<String>> = None;
    let mut actions = Vec::new();

    for conversion in catalog.active_conversions(now) {
        let set = &conversion.creative_set_id;
        if converted.contains(set)
            || ad_events.has_conversion(set)
            || !matches_any(&conversion.url_pattern, redirect_chain)
        {
            continue;
        }
        let Some(event) =
            ad_events.conversion_candidate(set, now, conversion.observation_window_ms())
        else {
            continue;
        };

        let verifiable = match conversion.advertiser_public_key.as_deref() {
            Some(key) if conversion.is_verifiable() => {
                if conversion_id.is_none() {
                    conversion_id = Some(extract_conversion_id(
                        redirect_chain,
                        html,
                        &resources.conversion_id_patterns,
                    )?);
                }
                conversion_id
                    .clone()
                    .flatten()
                    .map(|id| VerifiableConversion {
                        id,
                        advertiser_public_key: key.to_string(),
                    })
            }
            _ => None,
        };

        converted.insert(set.clone());
        actions.push(ConversionAction {
            creative_set_id: set.clone(),
            ad_event: event.clone(),
            verifiable,
        });
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_catalog::catalog::parse_catalog;
    use umbra_catalog::{ResourceKind, ResourceStore};
    use umbra_core::time::DAY_MS;
    use umbra_core::{ConfirmationType, PlacementId};
    use umbra_testkit::{catalog_feed_json, FeedCampaign, FIXTURE_NOW_MS};

    #[test]
    fn test_meta_pattern_is_compiled_once() {
        let first = conversion_id_meta().unwrap();
        let second = conversion_id_meta().unwrap();
        assert!(std::ptr::eq(first, second));
        let html = r#"<META NAME='ad-conversion-id' content="abc-1">"#;
        assert_eq!(first_capture(first, html).as_deref(), Some("abc-1"));
    }

    fn chain(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| (*u).to_string()).collect()
    }

    fn catalog(campaigns: &[FeedCampaign]) -> Catalog {
        parse_catalog(&catalog_feed_json("catalog", campaigns)).unwrap()
    }

    fn event(catalog: &Catalog, kind: ConfirmationType, at: u64) -> AdEvent {
        AdEvent::for_creative(
            &catalog.creatives[0],
            PlacementId::new("p"),
            kind,
            PhysicalTime::from_ms(at),
        )
    }

    #[test]
    fn test_conversion_id_rules() {
        assert!(is_valid_conversion_id("abc-DEF-123"));
        assert!(!is_valid_conversion_id(""));
        assert!(!is_valid_conversion_id("a_b"));
        assert!(!is_valid_conversion_id(&"a".repeat(31)));
    }

    #[test]
    fn test_meta_tag_fallback() {
        let urls = chain(&["https://shop.test/"]);
        let patterns = ConversionIdPatterns::default();
        let html = r#"<html><meta name="ad-conversion-id" content="order-42"></html>"#;
        let id = extract_conversion_id(&urls, html, &patterns).unwrap();
        assert_eq!(id.as_deref(), Some("order-42"));

        let bad = r#"<meta name="ad-conversion-id" content="not valid!">"#;
        assert_eq!(extract_conversion_id(&urls, bad, &patterns).unwrap(), None);
    }

    #[test]
    fn test_resource_pattern_searches_url() {
        let store = ResourceStore::new();
        store
            .update(
                ResourceKind::ConversionIdPatterns,
                r#"{"version":1,"patterns":[{
                    "urlPattern":"https://shop.test/thanks*",
                    "searchIn":"url_redirect",
                    "idPattern":"order=([-a-z0-9]+)"}]}"#,
            )
            .unwrap();
        let resources = store.current();
        let urls = chain(&["https://ad.test/click", "https://shop.test/thanks?order=x-9"]);
        let html = r#"<meta name="ad-conversion-id" content="from-meta">"#;

        let patterns = &resources.value.conversion_id_patterns;
        let id = extract_conversion_id(&urls, html, patterns).unwrap();
        assert_eq!(id.as_deref(), Some("x-9"));
    }

    #[test]
    fn test_detects_once_per_creative_set() {
        let catalog = catalog(&[FeedCampaign::notification("c1")
            .with_conversion("https://shop.test/*", Some("a2V5"))]);
        let now = FIXTURE_NOW_MS;
        let events = AdEventList::new(vec![
            event(&catalog, ConfirmationType::Viewed, now - DAY_MS),
            event(&catalog, ConfirmationType::Clicked, now - DAY_MS + 1),
        ]);
        let urls = chain(&["https://shop.test/checkout"]);
        let html = r#"<meta name="ad-conversion-id" content="abc">"#;
        let resources = Resources::default();

        let at = PhysicalTime::from_ms(now);
        let actions = detect_conversions(&urls, html, &catalog, &events, &resources, at).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].ad_event.confirmation_type, ConfirmationType::Clicked);
        assert_eq!(actions[0].verifiable.as_ref().map(|v| v.id.as_str()), Some("abc"));

        let mut converted: Vec<AdEvent> = events.iter().cloned().collect();
        converted.push(event(&catalog, ConfirmationType::Conversion, now - 1));
        let again = detect_conversions(
            &urls,
            html,
            &catalog,
            &AdEventList::new(converted),
            &resources,
            at,
        )
        .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_outside_window_or_pattern_does_not_convert() {
        let campaign =
            FeedCampaign::notification("c1").with_conversion("https://shop.test/*", None);
        let catalog = catalog(&[campaign]);
        let now = FIXTURE_NOW_MS;
        let stale =
            AdEventList::new(vec![event(&catalog, ConfirmationType::Viewed, now - 31 * DAY_MS)]);
        let resources = Resources::default();
        let at = PhysicalTime::from_ms(now);

        let urls = chain(&["https://shop.test/"]);
        let actions = detect_conversions(&urls, "", &catalog, &stale, &resources, at).unwrap();
        assert!(actions.is_empty());

        let fresh =
            AdEventList::new(vec![event(&catalog, ConfirmationType::Viewed, now - DAY_MS)]);
        let elsewhere = chain(&["https://other.test/"]);
        let actions = detect_conversions(&elsewhere, "", &catalog, &fresh, &resources, at).unwrap();
        assert!(actions.is_empty());

        let actions = detect_conversions(&urls, "", &catalog, &fresh, &resources, at).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].verifiable, None);
    }
}
