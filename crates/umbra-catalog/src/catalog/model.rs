//! Flattened catalog model
//!
//! The feed nests campaigns → creative sets → creatives → segments. Serving
//! works on the flattened form: one [`CreativeAd`] per (creative, segment),
//! kept in feed order so ranking ties break by insertion order.

use serde::{Deserialize, Serialize};
use umbra_core::{
    AdType, AdvertiserId, CampaignId, CreativeInstanceId, CreativeSetId, PhysicalTime,
};

/// A day-of-week and minute-of-day window during which a campaign may serve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Daypart {
    /// Days as digits, `0` = Sunday (`"0123456"` is every day)
    pub days_of_week: String,
    /// First minute of the window, inclusive
    pub start_minute: u32,
    /// Last minute of the window, inclusive
    pub end_minute: u32,
}

impl Daypart {
    /// Whether a local day/minute falls inside this daypart
    pub fn contains(&self, day_of_week: u32, minute_of_day: u32) -> bool {
        let day_matches = char::from_digit(day_of_week, 10)
            .is_some_and(|day| self.days_of_week.contains(day));
        day_matches && (self.start_minute..=self.end_minute).contains(&minute_of_day)
    }
}

/// New tab page wallpaper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallpaper {
    /// Image location
    pub image_url: String,
    /// Focal point x
    pub focal_x: i32,
    /// Focal point y
    pub focal_y: i32,
}

/// Ad-unit specific creative content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdPayload {
    /// Notification ad
    Notification {
        /// Title line
        title: String,
        /// Body text
        body: String,
        /// Landing page
        target_url: String,
    },
    /// New tab page ad
    NewTabPage {
        /// Advertiser display name
        company_name: String,
        /// Logo image
        image_url: String,
        /// Logo alt text
        alt: String,
        /// Landing page
        target_url: String,
        /// Wallpapers to rotate through
        wallpapers: Vec<Wallpaper>,
    },
    /// Inline content ad
    InlineContent {
        /// Title line
        title: String,
        /// Description text
        description: String,
        /// Card image
        image_url: String,
        /// Image dimensions, `WxH`
        dimensions: String,
        /// Call to action label
        cta_text: String,
        /// Landing page
        target_url: String,
    },
    /// Promoted content ad
    PromotedContent {
        /// Title line
        title: String,
        /// Description text
        description: String,
        /// Landing page
        target_url: String,
    },
}

impl AdPayload {
    /// The ad unit this payload renders as
    pub fn ad_type(&self) -> AdType {
        match self {
            AdPayload::Notification { .. } => AdType::Notification,
            AdPayload::NewTabPage { .. } => AdType::NewTabPage,
            AdPayload::InlineContent { .. } => AdType::InlineContent,
            AdPayload::PromotedContent { .. } => AdType::PromotedContent,
        }
    }

    /// Landing page
    pub fn target_url(&self) -> &str {
        match self {
            AdPayload::Notification { target_url, .. }
            | AdPayload::NewTabPage { target_url, .. }
            | AdPayload::InlineContent { target_url, .. }
            | AdPayload::PromotedContent { target_url, .. } => target_url,
        }
    }
}

/// One conversion definition attached to a creative set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeSetConversion {
    /// Creative set the conversion credits
    pub creative_set_id: CreativeSetId,
    /// Wildcard pattern matched against the redirect chain
    pub url_pattern: String,
    /// Days after the ad event during which a visit converts
    pub observation_window_days: u32,
    /// Advertiser X25519 public key (base64); non-empty enables verifiable conversions
    pub advertiser_public_key: Option<String>,
    /// The definition is ignored after this time
    pub expire_at: PhysicalTime,
}

impl CreativeSetConversion {
    /// Observation window in milliseconds
    pub fn observation_window_ms(&self) -> u64 {
        u64::from(self.observation_window_days) * umbra_core::time::DAY_MS
    }

    /// Whether a verifiable envelope can be produced
    pub fn is_verifiable(&self) -> bool {
        self.advertiser_public_key
            .as_deref()
            .is_some_and(|key| !key.is_empty())
    }
}

/// A servable creative, flattened for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeAd {
    /// Creative instance
    pub creative_instance_id: CreativeInstanceId,
    /// Creative set
    pub creative_set_id: CreativeSetId,
    /// Campaign
    pub campaign_id: CampaignId,
    /// Advertiser
    pub advertiser_id: AdvertiserId,
    /// Targeted segment, possibly hierarchical (`parent-child`)
    pub segment: String,
    /// ISO country or `country-subdivision` codes; empty targets everywhere
    pub geo_targets: Vec<String>,
    /// Serving windows; empty serves at any time
    pub dayparts: Vec<Daypart>,
    /// Served events per campaign per day, 0 for uncapped
    pub daily_cap: u32,
    /// Served events per creative set per day, 0 for uncapped
    pub per_day: u32,
    /// Served events per creative set per week, 0 for uncapped
    pub per_week: u32,
    /// Served events per creative set per month, 0 for uncapped
    pub per_month: u32,
    /// Served events per creative set in total, 0 for uncapped
    pub total_max: u32,
    /// Probability in `[0, 1]` that a selection passes pacing
    pub pass_through_rate: f64,
    /// Campaign priority, 1 is highest
    pub priority: u32,
    /// Payment value of a confirmation
    pub value: f64,
    /// First servable instant
    pub start_at: PhysicalTime,
    /// Last servable instant
    pub end_at: PhysicalTime,
    /// Split test group, if any
    pub split_test_group: Option<String>,
    /// Creative set embedding for similarity ranking
    pub embedding: Vec<f32>,
    /// Content
    pub payload: AdPayload,
}

impl CreativeAd {
    /// The ad unit this creative serves on
    pub fn ad_type(&self) -> AdType {
        self.payload.ad_type()
    }
}

/// A validated catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    /// Server catalog id
    pub id: String,
    /// Feed format version
    pub version: u32,
    /// Suggested refresh interval
    pub ping_ms: u64,
    /// Creatives in feed order
    pub creatives: Vec<CreativeAd>,
    /// Conversion definitions
    pub conversions: Vec<CreativeSetConversion>,
}

impl Catalog {
    /// Creatives for one ad unit, in feed order
    pub fn creatives_for(&self, ad_type: AdType) -> impl Iterator<Item = &CreativeAd> {
        self.creatives.iter().filter(move |ad| ad.ad_type() == ad_type)
    }

    /// Look up a creative by instance id
    pub fn creative(&self, id: &CreativeInstanceId) -> Option<&CreativeAd> {
        self.creatives
            .iter()
            .find(|ad| &ad.creative_instance_id == id)
    }

    /// Conversion definitions still in force at `now`
    pub fn active_conversions(
        &self,
        now: PhysicalTime,
    ) -> impl Iterator<Item = &CreativeSetConversion> {
        self.conversions.iter().filter(move |c| c.expire_at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daypart_contains() {
        let weekdays_morning = Daypart {
            days_of_week: "12345".to_string(),
            start_minute: 6 * 60,
            end_minute: 12 * 60,
        };
        assert!(weekdays_morning.contains(1, 6 * 60));
        assert!(weekdays_morning.contains(5, 12 * 60));
        assert!(!weekdays_morning.contains(0, 8 * 60));
        assert!(!weekdays_morning.contains(3, 13 * 60));
    }

    #[test]
    fn test_conversion_verifiable() {
        let mut conversion = CreativeSetConversion {
            creative_set_id: CreativeSetId::new("set"),
            url_pattern: "https://foo.com/*".to_string(),
            observation_window_days: 3,
            advertiser_public_key: Some(String::new()),
            expire_at: PhysicalTime::from_ms(0),
        };
        assert!(!conversion.is_verifiable());
        conversion.advertiser_public_key = Some("key".to_string());
        assert!(conversion.is_verifiable());
        assert_eq!(conversion.observation_window_ms(), 3 * 86_400_000);
    }
}
