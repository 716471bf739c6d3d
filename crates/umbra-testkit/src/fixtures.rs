//! Creative and catalog fixtures

use serde_json::{json, Value};
use umbra_catalog::{AdPayload, CreativeAd};
use umbra_core::{AdvertiserId, CampaignId, CreativeInstanceId, CreativeSetId, PhysicalTime};

/// 2024-06-02T12:00:00Z, a Sunday
pub const FIXTURE_NOW_MS: u64 = 1_717_329_600_000;

/// An uncapped, always-valid notification creative. Set, campaign and
/// advertiser ids are derived from `instance_id`.
pub fn creative_ad(instance_id: &str) -> CreativeAd {
    CreativeAd {
        creative_instance_id: CreativeInstanceId::new(instance_id),
        creative_set_id: CreativeSetId::new(format!("{instance_id}-set")),
        campaign_id: CampaignId::new(format!("{instance_id}-campaign")),
        advertiser_id: AdvertiserId::new(format!("{instance_id}-advertiser")),
        segment: "untargeted".to_string(),
        geo_targets: Vec::new(),
        dayparts: Vec::new(),
        daily_cap: 0,
        per_day: 0,
        per_week: 0,
        per_month: 0,
        total_max: 0,
        pass_through_rate: 1.0,
        priority: 1,
        value: 0.05,
        start_at: PhysicalTime::from_ms(0),
        end_at: PhysicalTime::from_ms(FIXTURE_NOW_MS * 2),
        split_test_group: None,
        embedding: Vec::new(),
        payload: AdPayload::Notification {
            title: format!("{instance_id} title"),
            body: format!("{instance_id} body"),
            target_url: format!("https://{instance_id}.example"),
        },
    }
}

/// One single-creative notification campaign in a feed
#[derive(Debug, Clone)]
pub struct FeedCampaign {
    /// Creative instance id; set/campaign/advertiser ids derive from it
    pub creative_instance_id: String,
    /// Campaign daily cap
    pub daily_cap: u32,
    /// Pass-through rate
    pub pass_through_rate: f64,
    /// Segment code
    pub segment: String,
    /// Conversion url pattern, if the set converts
    pub conversion_url_pattern: Option<String>,
    /// Advertiser X25519 public key, base64
    pub advertiser_public_key: Option<String>,
}

impl FeedCampaign {
    /// Uncapped, fully passing, untargeted
    pub fn notification(creative_instance_id: &str) -> Self {
        Self {
            creative_instance_id: creative_instance_id.to_string(),
            daily_cap: 0,
            pass_through_rate: 1.0,
            segment: "untargeted".to_string(),
            conversion_url_pattern: None,
            advertiser_public_key: None,
        }
    }

    /// Set the daily cap
    pub fn with_daily_cap(mut self, cap: u32) -> Self {
        self.daily_cap = cap;
        self
    }

    /// Set the pass-through rate
    pub fn with_pass_through_rate(mut self, rate: f64) -> Self {
        self.pass_through_rate = rate;
        self
    }

    /// Set the segment
    pub fn with_segment(mut self, segment: &str) -> Self {
        self.segment = segment.to_string();
        self
    }

    /// Attach a conversion
    pub fn with_conversion(
        mut self,
        url_pattern: &str,
        advertiser_public_key: Option<&str>,
    ) -> Self {
        self.conversion_url_pattern = Some(url_pattern.to_string());
        self.advertiser_public_key = advertiser_public_key.map(str::to_string);
        self
    }

    fn to_json(&self) -> Value {
        let id = &self.creative_instance_id;
        let conversions: Vec<Value> = self
            .conversion_url_pattern
            .iter()
            .map(|pattern| {
                let mut conversion = json!({ "urlPattern": pattern, "observationWindow": 30 });
                if let Some(key) = &self.advertiser_public_key {
                    conversion["conversionPublicKey"] = json!(key);
                }
                conversion
            })
            .collect();
        json!({
            "campaignId": format!("{id}-campaign"),
            "advertiserId": format!("{id}-advertiser"),
            "priority": 1,
            "passThroughRate": self.pass_through_rate,
            "startAt": "2024-01-01T00:00:00Z",
            "endAt": "2034-01-01T00:00:00Z",
            "dailyCap": self.daily_cap,
            "creativeSets": [{
                "creativeSetId": format!("{id}-set"),
                "value": 0.05,
                "segments": [{ "code": self.segment }],
                "conversions": conversions,
                "creatives": [{
                    "creativeInstanceId": id,
                    "type": { "code": "notification_all_v1" },
                    "payload": {
                        "title": format!("{id} title"),
                        "body": format!("{id} body"),
                        "targetUrl": format!("https://{id}.example")
                    }
                }]
            }]
        })
    }
}

/// A version 9 feed containing `campaigns`
pub fn catalog_feed_json(catalog_id: &str, campaigns: &[FeedCampaign]) -> String {
    json!({
        "catalogId": catalog_id,
        "version": 9,
        "ping": 7_200_000,
        "campaigns": campaigns.iter().map(FeedCampaign::to_json).collect::<Vec<_>>(),
    })
    .to_string()
}
