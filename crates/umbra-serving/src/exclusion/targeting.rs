//! Time, place and browsing targeting rules

use umbra_catalog::CreativeAd;
use umbra_core::{Result, UmbraError};

use super::{ExclusionContext, ExclusionRule, Verdict};

const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Campaign validity window `[start_at, end_at]`
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidityRule;

impl ExclusionRule for ValidityRule {
    fn name(&self) -> &'static str {
        "validity"
    }

    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict> {
        if ad.start_at > ad.end_at {
            return Err(UmbraError::exclusion_evaluation(format!(
                "campaign {} ends before it starts",
                ad.campaign_id
            )));
        }
        if ctx.now < ad.start_at || ctx.now > ad.end_at {
            return Ok(Verdict::exclude(format!(
                "campaign {} is not running",
                ad.campaign_id
            )));
        }
        Ok(Verdict::Include)
    }
}

/// Local day-of-week and minute must fall inside a daypart
#[derive(Debug, Clone, Copy, Default)]
pub struct DaypartRule;

impl ExclusionRule for DaypartRule {
    fn name(&self) -> &'static str {
        "daypart"
    }

    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict> {
        if ad.dayparts.is_empty() {
            return Ok(Verdict::Include);
        }
        if ctx.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(UmbraError::exclusion_evaluation(format!(
                "utc offset {} out of range",
                ctx.utc_offset_minutes
            )));
        }
        let (day, minute) = ctx.now.local_day_and_minute(ctx.utc_offset_minutes);
        if ad.dayparts.iter().any(|part| part.contains(day, minute)) {
            return Ok(Verdict::Include);
        }
        Ok(Verdict::exclude(format!(
            "day {day} minute {minute} outside dayparts"
        )))
    }
}

/// Device country or subdivision must match a geo target
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTargetingRule;

impl ExclusionRule for GeoTargetingRule {
    fn name(&self) -> &'static str {
        "geo_targeting"
    }

    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict> {
        if ad.geo_targets.is_empty() {
            return Ok(Verdict::Include);
        }
        let matches = |code: &str| {
            ad.geo_targets
                .iter()
                .any(|target| target.eq_ignore_ascii_case(code))
        };
        if matches(ctx.country_code) || ctx.subdivision_code.is_some_and(matches) {
            return Ok(Verdict::Include);
        }
        Ok(Verdict::exclude(format!(
            "{} not geo targeted",
            ctx.country_code
        )))
    }
}

/// Recently visited anti-targeted sites
#[derive(Debug, Clone, Copy, Default)]
pub struct AntiTargetingRule;

impl ExclusionRule for AntiTargetingRule {
    fn name(&self) -> &'static str {
        "anti_targeting"
    }

    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict> {
        let anti_targeting = &ctx.resources.anti_targeting;
        if let Some(host) = ctx
            .browsing_hosts
            .iter()
            .find(|host| anti_targeting.is_anti_targeted(&ad.creative_set_id, host))
        {
            return Ok(Verdict::exclude(format!(
                "creative set {} anti-targets {host}",
                ad.creative_set_id
            )));
        }
        Ok(Verdict::Include)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ad, ctx};
    use super::*;
    use umbra_catalog::{AdEventList, Daypart, ResourceKind, ResourceStore, Resources};
    use umbra_core::time::{DAY_MS, HOUR_MS};
    use umbra_core::PhysicalTime;

    // 1970-01-04 was a Sunday
    const SUNDAY_MIDNIGHT: u64 = 3 * DAY_MS;

    #[test]
    fn test_validity_window() {
        let mut creative = ad("a");
        creative.start_at = PhysicalTime::from_ms(100);
        creative.end_at = PhysicalTime::from_ms(200);
        let events = AdEventList::default();
        let resources = Resources::default();

        let check = |now| {
            ValidityRule
                .should_exclude(&creative, &ctx(PhysicalTime::from_ms(now), &events, &resources))
                .unwrap()
                .is_excluded()
        };
        assert!(check(99));
        assert!(!check(100));
        assert!(!check(200));
        assert!(check(201));

        creative.start_at = PhysicalTime::from_ms(300);
        assert!(ValidityRule
            .should_exclude(&creative, &ctx(PhysicalTime::from_ms(250), &events, &resources))
            .is_err());
    }

    #[test]
    fn test_daypart_uses_local_time() {
        let mut creative = ad("a");
        creative.dayparts = vec![Daypart {
            days_of_week: "0".to_string(),
            start_minute: 9 * 60,
            end_minute: 17 * 60,
        }];
        let events = AdEventList::default();
        let resources = Resources::default();
        let ten_am_utc = PhysicalTime::from_ms(SUNDAY_MIDNIGHT + 10 * HOUR_MS);

        let mut context = ctx(ten_am_utc, &events, &resources);
        assert!(!DaypartRule.should_exclude(&creative, &context).unwrap().is_excluded());

        context.utc_offset_minutes = -8 * 60;
        assert!(DaypartRule.should_exclude(&creative, &context).unwrap().is_excluded());

        context.utc_offset_minutes = 20 * 60;
        assert!(DaypartRule.should_exclude(&creative, &context).is_err());
    }

    #[test]
    fn test_geo_targets_match_country_or_subdivision() {
        let mut creative = ad("a");
        creative.geo_targets = vec!["US-CA".to_string(), "GB".to_string()];
        let events = AdEventList::default();
        let resources = Resources::default();
        let mut context = ctx(PhysicalTime::from_ms(1), &events, &resources);

        assert!(GeoTargetingRule.should_exclude(&creative, &context).unwrap().is_excluded());
        context.subdivision_code = Some("us-ca");
        assert!(!GeoTargetingRule.should_exclude(&creative, &context).unwrap().is_excluded());
        context.subdivision_code = None;
        context.country_code = "GB";
        assert!(!GeoTargetingRule.should_exclude(&creative, &context).unwrap().is_excluded());
    }

    #[test]
    fn test_anti_targeting() {
        let creative = ad("a");
        let store = ResourceStore::new();
        store
            .update(
                ResourceKind::AntiTargeting,
                r#"{"version": 1, "sites": {"a-set": ["https://www.blocked.com"]}}"#,
            )
            .unwrap();
        let snapshot = store.current();
        let events = AdEventList::default();
        let hosts = vec!["other.com".to_string(), "blocked.com".to_string()];

        let mut context = ctx(PhysicalTime::from_ms(1), &events, &snapshot.value);
        assert!(!AntiTargetingRule.should_exclude(&creative, &context).unwrap().is_excluded());
        context.browsing_hosts = &hosts;
        assert!(AntiTargetingRule.should_exclude(&creative, &context).unwrap().is_excluded());
    }
}
