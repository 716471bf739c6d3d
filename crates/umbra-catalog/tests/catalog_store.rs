#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use assert_matches::assert_matches;
use umbra_catalog::{CatalogStore, ResourceKind, ResourceStore};
use umbra_core::{AdType, UmbraError};

fn feed(catalog_id: &str, pass_through_rate: &str) -> String {
    format!(
        r#"{{
          "catalogId": "{catalog_id}",
          "version": 9,
          "ping": 3600000,
          "campaigns": [{{
            "campaignId": "campaign-1",
            "advertiserId": "advertiser-1",
            "priority": 1,
            "passThroughRate": {pass_through_rate},
            "startAt": "2024-01-01T00:00:00Z",
            "endAt": "2034-01-01T00:00:00Z",
            "dailyCap": 1,
            "creativeSets": [{{
              "creativeSetId": "set-1",
              "segments": [{{"code": "untargeted"}}],
              "creatives": [{{
                "creativeInstanceId": "C1",
                "type": {{"code": "promoted_content_all_v1"}},
                "payload": {{"title": "t", "description": "d", "targetUrl": "https://a.example"}}
              }}]
            }}]
          }}]
        }}"#
    )
}

#[test]
fn malformed_campaign_keeps_previous_catalog() {
    let store = CatalogStore::default();
    store.update(&feed("first", "1.0"), None).unwrap();

    let rejected = store.update(&feed("second", "-0.5"), None);
    assert_matches!(rejected, Err(UmbraError::MalformedCatalog { .. }));

    let current = store.current();
    assert_eq!(current.version, 1);
    assert_eq!(current.value.id, "first");
    assert_eq!(
        current.value.creatives_for(AdType::PromotedContent).count(),
        1
    );
}

#[test]
fn readers_keep_their_snapshot_across_updates() {
    let store = CatalogStore::default();
    store.update(&feed("first", "1.0"), None).unwrap();
    let held = store.current();

    store.update(&feed("second", "0.5"), None).unwrap();

    assert_eq!(held.value.id, "first");
    assert_eq!(store.current().value.id, "second");
}

#[test]
fn malformed_resource_keeps_previous_resources() {
    let store = ResourceStore::new();
    store
        .update(
            ResourceKind::AntiTargeting,
            r#"{"version": 1, "sites": {"set-1": ["https://www.foo.com/bar"]}}"#,
        )
        .unwrap();

    assert!(store
        .update(ResourceKind::AntiTargeting, r#"{"version": "x"}"#)
        .is_err());

    let current = store.current();
    assert_eq!(current.value.anti_targeting.version, 1);
}
