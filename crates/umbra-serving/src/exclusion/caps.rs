//! Frequency caps over rolling windows. A cap of 0 is uncapped.

use umbra_catalog::CreativeAd;
use umbra_core::time::DAY_MS;
use umbra_core::Result;

use super::{ExclusionContext, ExclusionRule, Verdict};

/// Campaign-scope served events in the last 24 hours
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyCapRule;

impl ExclusionRule for DailyCapRule {
    fn name(&self) -> &'static str {
        "daily_cap"
    }

    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict> {
        if ad.daily_cap == 0 {
            return Ok(Verdict::Include);
        }
        let served = ctx
            .ad_events
            .served_for_campaign(&ad.campaign_id, ctx.now, DAY_MS);
        if served >= ad.daily_cap as usize {
            return Ok(Verdict::exclude(format!(
                "campaign {} hit daily cap {}",
                ad.campaign_id, ad.daily_cap
            )));
        }
        Ok(Verdict::Include)
    }
}

/// Creative-set scope per-day, per-week, per-month and total caps
#[derive(Debug, Clone, Copy, Default)]
pub struct CreativeSetCapRule;

impl ExclusionRule for CreativeSetCapRule {
    fn name(&self) -> &'static str {
        "creative_set_caps"
    }

    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict> {
        let caps = [
            ("per day", ad.per_day, Some(DAY_MS)),
            ("per week", ad.per_week, Some(7 * DAY_MS)),
            ("per month", ad.per_month, Some(30 * DAY_MS)),
            ("total", ad.total_max, None),
        ];

        for (label, cap, window) in caps {
            if cap == 0 {
                continue;
            }
            let served = ctx
                .ad_events
                .served_for_creative_set(&ad.creative_set_id, ctx.now, window);
            if served >= cap as usize {
                return Ok(Verdict::exclude(format!(
                    "creative set {} hit {label} cap {cap}",
                    ad.creative_set_id
                )));
            }
        }
        Ok(Verdict::Include)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ad, ctx};
    use super::*;
    use umbra_catalog::{AdEvent, AdEventList, Resources};
    use umbra_core::time::HOUR_MS;
    use umbra_core::{ConfirmationType, PhysicalTime, PlacementId};

    fn served(ad: &CreativeAd, at: u64) -> AdEvent {
        AdEvent::for_creative(
            ad,
            PlacementId::new("p"),
            ConfirmationType::Served,
            PhysicalTime::from_ms(at),
        )
    }

    #[test]
    fn test_daily_cap_rolls_off() {
        let mut creative = ad("a");
        creative.daily_cap = 1;
        let resources = Resources::default();
        let now = 2 * DAY_MS;

        let recent = AdEventList::new(vec![served(&creative, now - HOUR_MS)]);
        let verdict = DailyCapRule
            .should_exclude(&creative, &ctx(PhysicalTime::from_ms(now), &recent, &resources))
            .unwrap();
        assert!(verdict.is_excluded());

        let old = AdEventList::new(vec![served(&creative, now - DAY_MS - 1)]);
        let verdict = DailyCapRule
            .should_exclude(&creative, &ctx(PhysicalTime::from_ms(now), &old, &resources))
            .unwrap();
        assert!(!verdict.is_excluded());
    }

    #[test]
    fn test_total_cap() {
        let mut creative = ad("a");
        creative.total_max = 2;
        let resources = Resources::default();
        let events = AdEventList::new(vec![served(&creative, 1), served(&creative, 2)]);

        let verdict = CreativeSetCapRule
            .should_exclude(
                &creative,
                &ctx(PhysicalTime::from_ms(365 * DAY_MS), &events, &resources),
            )
            .unwrap();
        assert!(verdict.is_excluded());
    }

    #[test]
    fn test_zero_caps_are_uncapped() {
        let creative = ad("a");
        let resources = Resources::default();
        let events = AdEventList::new((0..50).map(|i| served(&creative, i)).collect());
        let context = ctx(PhysicalTime::from_ms(100), &events, &resources);

        assert!(!DailyCapRule.should_exclude(&creative, &context).unwrap().is_excluded());
        assert!(!CreativeSetCapRule
            .should_exclude(&creative, &context)
            .unwrap()
            .is_excluded());
    }
}
