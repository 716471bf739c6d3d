//! Rules driven by the user's past interactions

use umbra_catalog::CreativeAd;
use umbra_core::{ConfirmationType, Result};

use super::{ExclusionContext, ExclusionRule, Verdict};

/// A creative set converts at most once
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionRule;

impl ExclusionRule for ConversionRule {
    fn name(&self) -> &'static str {
        "conversion"
    }

    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict> {
        if ctx.ad_events.has_conversion(&ad.creative_set_id) {
            return Ok(Verdict::exclude(format!(
                "creative set {} already converted",
                ad.creative_set_id
            )));
        }
        Ok(Verdict::Include)
    }
}

/// Creative sets the user marked as inappropriate
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkedAsInappropriateRule;

impl ExclusionRule for MarkedAsInappropriateRule {
    fn name(&self) -> &'static str {
        "marked_as_inappropriate"
    }

    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict> {
        if ctx.ad_events.is_flagged(&ad.creative_set_id) {
            return Ok(Verdict::exclude(format!(
                "creative set {} was flagged",
                ad.creative_set_id
            )));
        }
        Ok(Verdict::Include)
    }
}

/// Advertisers whose latest reaction is a dislike
#[derive(Debug, Clone, Copy, Default)]
pub struct DislikeRule;

impl ExclusionRule for DislikeRule {
    fn name(&self) -> &'static str {
        "dislike"
    }

    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict> {
        if ctx.ad_events.latest_reaction(&ad.advertiser_id) == Some(ConfirmationType::Downvoted) {
            return Ok(Verdict::exclude(format!(
                "advertiser {} was disliked",
                ad.advertiser_id
            )));
        }
        Ok(Verdict::Include)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ad, ctx};
    use super::*;
    use umbra_catalog::{AdEvent, AdEventList, Resources};
    use umbra_core::{PhysicalTime, PlacementId};

    fn events(creative: &CreativeAd, kinds: &[ConfirmationType]) -> AdEventList {
        AdEventList::new(
            kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| {
                    AdEvent::for_creative(
                        creative,
                        PlacementId::new("p"),
                        *kind,
                        PhysicalTime::from_ms(i as u64),
                    )
                })
                .collect(),
        )
    }

    fn excluded(rule: &dyn ExclusionRule, creative: &CreativeAd, list: &AdEventList) -> bool {
        let resources = Resources::default();
        rule.should_exclude(creative, &ctx(PhysicalTime::from_ms(100), list, &resources))
            .unwrap()
            .is_excluded()
    }

    #[test]
    fn test_converted_sets_are_excluded() {
        let creative = ad("a");
        let clicked = events(&creative, &[ConfirmationType::Clicked]);
        assert!(!excluded(&ConversionRule, &creative, &clicked));
        let converted = events(&creative, &[ConfirmationType::Conversion]);
        assert!(excluded(&ConversionRule, &creative, &converted));
    }

    #[test]
    fn test_flagged_sets_are_excluded() {
        let creative = ad("a");
        assert!(excluded(
            &MarkedAsInappropriateRule,
            &creative,
            &events(&creative, &[ConfirmationType::Flagged])
        ));
    }

    #[test]
    fn test_latest_reaction_wins() {
        let creative = ad("a");
        let disliked = events(&creative, &[ConfirmationType::Upvoted, ConfirmationType::Downvoted]);
        let relented = events(&creative, &[ConfirmationType::Downvoted, ConfirmationType::Upvoted]);
        assert!(excluded(&DislikeRule, &creative, &disliked));
        assert!(!excluded(&DislikeRule, &creative, &relented));
    }
}
