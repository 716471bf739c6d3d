//! Catalog feed parsing and validation
//!
//! The server feed is JSON at format version 9. Parsing is all-or-nothing:
//! a structural error anywhere rejects the whole feed with
//! [`UmbraError::MalformedCatalog`]. Creatives of an unknown type are skipped
//! so newer ad units do not break older clients.

use chrono::DateTime;
use serde::Deserialize;
use tracing::debug;
use umbra_core::time::DAY_MS;
use umbra_core::{
    AdvertiserId, CampaignId, CreativeInstanceId, CreativeSetId, PhysicalTime, Result,
    UmbraError,
};

use super::model::{AdPayload, Catalog, CreativeAd, CreativeSetConversion, Daypart, Wallpaper};

/// Supported feed format version
pub const CATALOG_VERSION: u32 = 9;

const LAST_MINUTE_OF_DAY: u32 = 24 * 60 - 1;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCatalog {
    catalog_id: String,
    version: u32,
    #[serde(default)]
    ping: u64,
    campaigns: Vec<RawCampaign>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCampaign {
    campaign_id: String,
    advertiser_id: String,
    priority: u32,
    pass_through_rate: f64,
    start_at: String,
    end_at: String,
    #[serde(default)]
    daily_cap: u32,
    #[serde(default)]
    geo_targets: Vec<RawCode>,
    #[serde(default)]
    day_parts: Vec<RawDayPart>,
    creative_sets: Vec<RawCreativeSet>,
}

#[derive(Deserialize)]
struct RawCode {
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDayPart {
    dow: String,
    start_minute: u32,
    end_minute: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCreativeSet {
    creative_set_id: String,
    #[serde(default)]
    per_day: u32,
    #[serde(default)]
    per_week: u32,
    #[serde(default)]
    per_month: u32,
    #[serde(default)]
    total_max: u32,
    #[serde(default)]
    value: f64,
    segments: Vec<RawCode>,
    #[serde(default)]
    split_test_group: Option<String>,
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    conversions: Vec<RawConversion>,
    creatives: Vec<RawCreative>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConversion {
    url_pattern: String,
    observation_window: u32,
    #[serde(default)]
    expire_at: Option<String>,
    #[serde(default)]
    conversion_public_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCreative {
    creative_instance_id: String,
    #[serde(rename = "type")]
    kind: RawCode,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotificationPayload {
    title: String,
    body: String,
    target_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLogo {
    company_name: String,
    image_url: String,
    alt: String,
    destination_url: String,
}

#[derive(Deserialize)]
struct RawFocalPoint {
    x: i32,
    y: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWallpaper {
    image_url: String,
    focal_point: RawFocalPoint,
}

#[derive(Deserialize)]
struct RawNewTabPagePayload {
    logo: RawLogo,
    wallpapers: Vec<RawWallpaper>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInlineContentPayload {
    title: String,
    description: String,
    image_url: String,
    dimensions: String,
    cta_text: String,
    target_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPromotedContentPayload {
    title: String,
    description: String,
    target_url: String,
}

fn malformed(message: impl Into<String>) -> UmbraError {
    UmbraError::malformed_catalog(message)
}

fn require_id(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(malformed(format!("empty {what}")));
    }
    Ok(())
}

fn parse_time(value: &str, what: &str) -> Result<PhysicalTime> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|e| malformed(format!("{what} {value:?}: {e}")))?;
    let ms = u64::try_from(parsed.timestamp_millis())
        .map_err(|_| malformed(format!("{what} {value:?} is before the epoch")))?;
    Ok(PhysicalTime::from_ms(ms))
}

fn require_https(url: &str, what: &str) -> Result<()> {
    if !url.starts_with("https://") {
        return Err(malformed(format!("{what} is not an https url: {url:?}")));
    }
    Ok(())
}

fn payload<T: for<'de> Deserialize<'de>>(value: serde_json::Value, code: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| malformed(format!("{code} payload: {e}")))
}

/// Parse a creative payload, `None` for creative types this client does not serve
fn parse_payload(code: &str, value: serde_json::Value) -> Result<Option<AdPayload>> {
    let parsed = match code {
        "notification_all_v1" => {
            let p: RawNotificationPayload = payload(value, code)?;
            AdPayload::Notification {
                title: p.title,
                body: p.body,
                target_url: p.target_url,
            }
        }
        "new_tab_page_all_v1" => {
            let p: RawNewTabPagePayload = payload(value, code)?;
            if p.wallpapers.is_empty() {
                return Err(malformed("new tab page creative without wallpapers"));
            }
            AdPayload::NewTabPage {
                company_name: p.logo.company_name,
                image_url: p.logo.image_url,
                alt: p.logo.alt,
                target_url: p.logo.destination_url,
                wallpapers: p
                    .wallpapers
                    .into_iter()
                    .map(|w| Wallpaper {
                        image_url: w.image_url,
                        focal_x: w.focal_point.x,
                        focal_y: w.focal_point.y,
                    })
                    .collect(),
            }
        }
        "inline_content_all_v1" => {
            let p: RawInlineContentPayload = payload(value, code)?;
            AdPayload::InlineContent {
                title: p.title,
                description: p.description,
                image_url: p.image_url,
                dimensions: p.dimensions,
                cta_text: p.cta_text,
                target_url: p.target_url,
            }
        }
        "promoted_content_all_v1" => {
            let p: RawPromotedContentPayload = payload(value, code)?;
            AdPayload::PromotedContent {
                title: p.title,
                description: p.description,
                target_url: p.target_url,
            }
        }
        other => {
            debug!(creative_type = other, "skipping unsupported creative type");
            return Ok(None);
        }
    };
    require_https(parsed.target_url(), "target url")?;
    Ok(Some(parsed))
}

fn parse_daypart(raw: RawDayPart) -> Result<Daypart> {
    if raw.dow.is_empty() || !raw.dow.chars().all(|c| ('0'..='6').contains(&c)) {
        return Err(malformed(format!("invalid daypart days {:?}", raw.dow)));
    }
    if raw.start_minute > raw.end_minute || raw.end_minute > LAST_MINUTE_OF_DAY {
        return Err(malformed(format!(
            "invalid daypart minutes {}..{}",
            raw.start_minute, raw.end_minute
        )));
    }
    Ok(Daypart {
        days_of_week: raw.dow,
        start_minute: raw.start_minute,
        end_minute: raw.end_minute,
    })
}

/// Parse and validate a feed into a flattened [`Catalog`]
pub fn parse_catalog(json: &str) -> Result<Catalog> {
    let raw: RawCatalog = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

    if raw.version != CATALOG_VERSION {
        return Err(malformed(format!(
            "unsupported catalog version {} (expected {CATALOG_VERSION})",
            raw.version
        )));
    }
    require_id(&raw.catalog_id, "catalog id")?;

    let mut creatives = Vec::new();
    let mut conversions = Vec::new();

    for campaign in raw.campaigns {
        require_id(&campaign.campaign_id, "campaign id")?;
        require_id(&campaign.advertiser_id, "advertiser id")?;
        if !(0.0..=1.0).contains(&campaign.pass_through_rate) {
            return Err(malformed(format!(
                "campaign {}: pass-through rate {} outside [0, 1]",
                campaign.campaign_id, campaign.pass_through_rate
            )));
        }
        let start_at = parse_time(&campaign.start_at, "campaign start")?;
        let end_at = parse_time(&campaign.end_at, "campaign end")?;
        if start_at >= end_at {
            return Err(malformed(format!(
                "campaign {}: starts after it ends",
                campaign.campaign_id
            )));
        }
        let dayparts = campaign
            .day_parts
            .into_iter()
            .map(parse_daypart)
            .collect::<Result<Vec<_>>>()?;
        let geo_targets: Vec<String> = campaign
            .geo_targets
            .into_iter()
            .map(|g| g.code.to_ascii_uppercase())
            .collect();

        for set in campaign.creative_sets {
            require_id(&set.creative_set_id, "creative set id")?;
            if set.segments.is_empty() {
                return Err(malformed(format!(
                    "creative set {} has no segments",
                    set.creative_set_id
                )));
            }
            if !set.value.is_finite() || set.value < 0.0 {
                return Err(malformed(format!(
                    "creative set {}: invalid value",
                    set.creative_set_id
                )));
            }
            let creative_set_id = CreativeSetId::new(&*set.creative_set_id);

            for conversion in set.conversions {
                if conversion.url_pattern.is_empty() || conversion.observation_window == 0 {
                    return Err(malformed(format!(
                        "creative set {}: invalid conversion",
                        set.creative_set_id
                    )));
                }
                let expire_at = match &conversion.expire_at {
                    Some(at) => parse_time(at, "conversion expiry")?,
                    None => end_at.add_ms(u64::from(conversion.observation_window) * DAY_MS),
                };
                conversions.push(CreativeSetConversion {
                    creative_set_id: creative_set_id.clone(),
                    url_pattern: conversion.url_pattern,
                    observation_window_days: conversion.observation_window,
                    advertiser_public_key: conversion.conversion_public_key,
                    expire_at,
                });
            }

            for creative in set.creatives {
                require_id(&creative.creative_instance_id, "creative instance id")?;
                let Some(payload) = parse_payload(&creative.kind.code, creative.payload)? else {
                    continue;
                };

                for segment in &set.segments {
                    let segment = segment.code.trim().to_lowercase();
                    require_id(&segment, "segment")?;
                    creatives.push(CreativeAd {
                        creative_instance_id: CreativeInstanceId::new(
                            &*creative.creative_instance_id,
                        ),
                        creative_set_id: creative_set_id.clone(),
                        campaign_id: CampaignId::new(&*campaign.campaign_id),
                        advertiser_id: AdvertiserId::new(&*campaign.advertiser_id),
                        segment,
                        geo_targets: geo_targets.clone(),
                        dayparts: dayparts.clone(),
                        daily_cap: campaign.daily_cap,
                        per_day: set.per_day,
                        per_week: set.per_week,
                        per_month: set.per_month,
                        total_max: set.total_max,
                        pass_through_rate: campaign.pass_through_rate,
                        priority: campaign.priority,
                        value: set.value,
                        start_at,
                        end_at,
                        split_test_group: set.split_test_group.clone(),
                        embedding: set.embedding.clone(),
                        payload: payload.clone(),
                    });
                }
            }
        }
    }

    Ok(Catalog {
        id: raw.catalog_id,
        version: raw.version,
        ping_ms: raw.ping,
        creatives,
        conversions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use umbra_core::AdType;

    fn feed(campaign_overrides: &str) -> String {
        format!(
            r#"{{
              "catalogId": "29e5c8bc0ba319069980bb390d8e8f9b58c05a20",
              "version": 9,
              "ping": 7200000,
              "campaigns": [{{
                "campaignId": "27a624a1-9c80-494a-bf1b-af327b563f85",
                "advertiserId": "a437c7f3-9a48-4fe8-a628-6b4aae5c6b7c",
                "priority": 1,
                "passThroughRate": 1.0,
                "startAt": "2024-01-01T00:00:00Z",
                "endAt": "2034-01-01T00:00:00Z",
                "dailyCap": 2,
                "geoTargets": [{{"code": "us"}}],
                "dayParts": [{{"dow": "0123456", "startMinute": 0, "endMinute": 1439}}],
                {campaign_overrides}
                "creativeSets": [{{
                  "creativeSetId": "c2ba3e7d-f688-4bc4-a053-cbe7ac1e6123",
                  "perDay": 3,
                  "totalMax": 10,
                  "value": 0.05,
                  "segments": [{{"code": "Technology & Computing"}}, {{"code": "untargeted"}}],
                  "conversions": [{{"urlPattern": "https://foo.com/*", "observationWindow": 3}}],
                  "creatives": [{{
                    "creativeInstanceId": "3519f52c-46a4-4c48-9c2b-c264c0067f04",
                    "type": {{"code": "notification_all_v1"}},
                    "payload": {{"title": "Umbra", "body": "Try it", "targetUrl": "https://umbra.example"}}
                  }}, {{
                    "creativeInstanceId": "future",
                    "type": {{"code": "hologram_all_v1"}},
                    "payload": {{}}
                  }}]
                }}]
              }}]
            }}"#
        )
    }

    #[test]
    fn test_parse_flattens_per_segment() {
        let catalog = parse_catalog(&feed("")).unwrap();

        assert_eq!(catalog.ping_ms, 7_200_000);
        assert_eq!(catalog.creatives.len(), 2);
        assert_eq!(catalog.creatives[0].segment, "technology & computing");
        assert_eq!(catalog.creatives[1].segment, "untargeted");

        let ad = &catalog.creatives[0];
        assert_eq!(ad.ad_type(), AdType::Notification);
        assert_eq!(ad.daily_cap, 2);
        assert_eq!(ad.per_day, 3);
        assert_eq!(ad.per_week, 0);
        assert_eq!(ad.geo_targets, vec!["US".to_string()]);

        assert_eq!(catalog.conversions.len(), 1);
        assert_eq!(
            catalog.conversions[0].expire_at,
            ad.end_at.add_ms(3 * DAY_MS)
        );
    }

    #[test]
    fn test_rejects_wrong_version() {
        let json = feed("").replace("\"version\": 9", "\"version\": 8");
        assert_matches!(parse_catalog(&json), Err(UmbraError::MalformedCatalog { .. }));
    }

    #[test]
    fn test_rejects_bad_pass_through_rate() {
        let json = feed("").replace("\"passThroughRate\": 1.0", "\"passThroughRate\": 1.5");
        assert_matches!(parse_catalog(&json), Err(UmbraError::MalformedCatalog { .. }));
    }

    #[test]
    fn test_rejects_inverted_validity() {
        let json = feed("").replace("2034-01-01T00:00:00Z", "2023-01-01T00:00:00Z");
        assert!(parse_catalog(&json).is_err());
    }

    #[test]
    fn test_rejects_bad_daypart() {
        let json = feed("").replace("\"endMinute\": 1439", "\"endMinute\": 1440");
        assert!(parse_catalog(&json).is_err());
    }

    #[test]
    fn test_rejects_non_https_target() {
        let json = feed("").replace("https://umbra.example", "http://umbra.example");
        assert!(parse_catalog(&json).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_catalog("{").is_err());
        assert!(parse_catalog("[]").is_err());
    }
}
