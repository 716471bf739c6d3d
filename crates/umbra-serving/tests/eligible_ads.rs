#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use proptest::prelude::*;
use std::sync::Arc;
use umbra_catalog::{AdEvent, AdEventList, AdEventLog, CatalogStore, ResourceStore, Resources};
use umbra_core::time::{HOUR_MS, MINUTE_MS};
use umbra_core::{AdType, ConfirmationType, PhysicalTime, PlacementId, UmbraConfig};
use umbra_serving::{BanditArms, EligibleAds, ExclusionChain, ExclusionContext, UserModel};
use umbra_testkit::{
    catalog_feed_json, creative_ad, FeedCampaign, SeededRandom, TestEffects, FIXTURE_NOW_MS,
};

async fn eligible_ads(harness: &TestEffects, feed: &str) -> (EligibleAds, AdEventLog) {
    let catalog = Arc::new(CatalogStore::default());
    catalog.update(feed, None).unwrap();
    let ad_events = AdEventLog::load(harness.storage.clone()).await.unwrap();
    let arms = BanditArms::load(harness.storage.clone()).await.unwrap();
    let ads = EligibleAds::new(
        &UmbraConfig::default(),
        catalog,
        Arc::new(ResourceStore::new()),
        ad_events.clone(),
        arms,
        harness.effects(),
    );
    (ads, ad_events)
}

#[tokio::test]
async fn daily_capped_creative_serves_once_per_day() {
    let harness = TestEffects::new(3);
    let feed = catalog_feed_json(
        "catalog",
        &[FeedCampaign::notification("C1").with_daily_cap(1)],
    );
    let (ads, ad_events) = eligible_ads(&harness, &feed).await;
    let user_model = UserModel::default();

    let served = ads
        .get_eligible_ad(AdType::Notification, &user_model)
        .await
        .unwrap()
        .expect("C1 is eligible");
    assert_eq!(served.creative_instance_id.as_str(), "C1");

    ad_events
        .append(AdEvent::for_creative(
            &served,
            PlacementId::new("placement"),
            ConfirmationType::Served,
            harness.time.now(),
        ))
        .await
        .unwrap();

    harness.time.advance_ms(HOUR_MS);
    assert!(ads
        .get_eligible_ad(AdType::Notification, &user_model)
        .await
        .unwrap()
        .is_none());

    harness.time.advance_ms(24 * HOUR_MS);
    assert!(ads
        .get_eligible_ad(AdType::Notification, &user_model)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn pacing_draw_decides_between_candidates() {
    // first draw paces C1 (0.9 >= 0.5), second keeps C2 (0.0 < 0.5)
    let harness = TestEffects::new(5).with_random(SeededRandom::with_units(5, [0.9, 0.0]));
    let feed = catalog_feed_json(
        "catalog",
        &[
            FeedCampaign::notification("C1").with_pass_through_rate(0.5),
            FeedCampaign::notification("C2").with_pass_through_rate(0.5),
        ],
    );
    let (ads, _) = eligible_ads(&harness, &feed).await;

    let served = ads
        .get_eligible_ad(AdType::Notification, &UserModel::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(served.creative_instance_id.as_str(), "C2");
}

#[tokio::test]
async fn everything_paced_serves_nothing() {
    let harness = TestEffects::new(5).with_random(SeededRandom::with_units(5, [0.9]));
    let feed = catalog_feed_json(
        "catalog",
        &[FeedCampaign::notification("C1").with_pass_through_rate(0.5)],
    );
    let (ads, _) = eligible_ads(&harness, &feed).await;

    assert!(ads
        .get_eligible_ad(AdType::Notification, &UserModel::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn empty_catalog_serves_nothing() {
    let harness = TestEffects::new(1);
    let (ads, _) = eligible_ads(&harness, &catalog_feed_json("empty", &[])).await;
    assert!(ads
        .get_eligible_ad(AdType::Notification, &UserModel::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn anti_targeted_history_excludes() {
    let harness = TestEffects::new(2);
    let feed = catalog_feed_json("catalog", &[FeedCampaign::notification("C1")]);
    let catalog = Arc::new(CatalogStore::default());
    catalog.update(&feed, None).unwrap();
    let resources = Arc::new(ResourceStore::new());
    resources
        .update(
            umbra_catalog::ResourceKind::AntiTargeting,
            r#"{"version": 1, "sites": {"C1-set": ["competitor.com"]}}"#,
        )
        .unwrap();
    harness
        .platform
        .set_browsing_history(vec!["https://www.competitor.com/shop".to_string()]);

    let ads = EligibleAds::new(
        &UmbraConfig::default(),
        catalog,
        resources,
        AdEventLog::load(harness.storage.clone()).await.unwrap(),
        BanditArms::load(harness.storage.clone()).await.unwrap(),
        harness.effects(),
    );
    assert!(ads
        .get_eligible_ad(AdType::Notification, &UserModel::default())
        .await
        .unwrap()
        .is_none());
}

proptest! {
    #[test]
    fn daily_cap_is_never_exceeded(cap in 1u32..6, attempts in 1usize..20) {
        let mut creative = creative_ad("capped");
        creative.daily_cap = cap;
        let chain = ExclusionChain::for_ad_type(AdType::Notification);
        let resources = Resources::default();
        let mut events = Vec::new();

        for attempt in 0..attempts {
            let now = PhysicalTime::from_ms(FIXTURE_NOW_MS + attempt as u64 * MINUTE_MS);
            let list = AdEventList::new(events.clone());
            let ctx = ExclusionContext {
                now,
                ad_events: &list,
                resources: &resources,
                browsing_hosts: &[],
                country_code: "US",
                subdivision_code: None,
                utc_offset_minutes: 0,
            };
            if !chain.evaluate(&creative, &ctx).is_excluded() {
                events.push(AdEvent::for_creative(
                    &creative,
                    PlacementId::new("p"),
                    ConfirmationType::Served,
                    now,
                ));
            }
        }

        prop_assert_eq!(events.len(), attempts.min(cap as usize));
    }
}
