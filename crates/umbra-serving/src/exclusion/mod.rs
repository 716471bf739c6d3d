//! Exclusion rule chain
//!
//! A candidate is eligible only if no rule excludes it. Rules are pure
//! functions of the creative, the ad event history, the active resources
//! and the [`ExclusionContext`]. A rule that fails to evaluate excludes.

mod caps;
mod history;
mod targeting;

pub use caps::{CreativeSetCapRule, DailyCapRule};
pub use history::{ConversionRule, DislikeRule, MarkedAsInappropriateRule};
pub use targeting::{AntiTargetingRule, DaypartRule, GeoTargetingRule, ValidityRule};

use tracing::{debug, warn};
use umbra_catalog::{AdEventList, CreativeAd, Resources};
use umbra_core::{AdType, PhysicalTime, Result};

/// Outcome of one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The rule has no objection
    Include,
    /// The rule disqualifies the candidate
    Exclude(String),
}

impl Verdict {
    /// Exclude with a diagnostic
    pub fn exclude(reason: impl Into<String>) -> Self {
        Verdict::Exclude(reason.into())
    }

    /// Whether this verdict excludes
    pub fn is_excluded(&self) -> bool {
        matches!(self, Verdict::Exclude(_))
    }
}

/// Everything a rule may consult besides the creative itself
#[derive(Debug, Clone)]
pub struct ExclusionContext<'a> {
    /// Evaluation time
    pub now: PhysicalTime,
    /// History snapshot
    pub ad_events: &'a AdEventList,
    /// Resource snapshot
    pub resources: &'a Resources,
    /// Normalized hosts of recent browsing history
    pub browsing_hosts: &'a [String],
    /// Device country code
    pub country_code: &'a str,
    /// Device subdivision code (`"US-CA"`), if known
    pub subdivision_code: Option<&'a str>,
    /// Local time offset from UTC
    pub utc_offset_minutes: i32,
}

/// A predicate that can disqualify a candidate
pub trait ExclusionRule: Send + Sync {
    /// Rule name for logs
    fn name(&self) -> &'static str;

    /// Evaluate the rule. Must not panic.
    fn should_exclude(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Result<Verdict>;
}

/// Ordered list of rules for one ad unit
pub struct ExclusionChain {
    rules: Vec<Box<dyn ExclusionRule>>,
}

impl std::fmt::Debug for ExclusionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

impl ExclusionChain {
    /// Chain from explicit rules
    pub fn new(rules: Vec<Box<dyn ExclusionRule>>) -> Self {
        Self { rules }
    }

    /// Standard chain for an ad unit. New tab page and search result ads are
    /// not driven by browsing, so they skip anti-targeting.
    pub fn for_ad_type(ad_type: AdType) -> Self {
        let mut rules: Vec<Box<dyn ExclusionRule>> = vec![
            Box::new(ValidityRule),
            Box::new(DailyCapRule),
            Box::new(CreativeSetCapRule),
            Box::new(DaypartRule),
            Box::new(GeoTargetingRule),
            Box::new(ConversionRule),
            Box::new(MarkedAsInappropriateRule),
            Box::new(DislikeRule),
        ];
        if !matches!(ad_type, AdType::NewTabPage | AdType::SearchResult) {
            rules.push(Box::new(AntiTargetingRule));
        }
        Self::new(rules)
    }

    /// Rule names in evaluation order
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run every rule until one excludes. Evaluation errors exclude.
    pub fn evaluate(&self, ad: &CreativeAd, ctx: &ExclusionContext<'_>) -> Verdict {
        for rule in &self.rules {
            match rule.should_exclude(ad, ctx) {
                Ok(Verdict::Include) => {}
                Ok(Verdict::Exclude(reason)) => {
                    debug!(
                        rule = rule.name(),
                        creative_instance_id = %ad.creative_instance_id,
                        %reason,
                        "excluded"
                    );
                    return Verdict::Exclude(reason);
                }
                Err(err) => {
                    warn!(
                        rule = rule.name(),
                        creative_instance_id = %ad.creative_instance_id,
                        error = %err,
                        "exclusion rule failed; excluding"
                    );
                    return Verdict::exclude(format!("{} failed: {err}", rule.name()));
                }
            }
        }
        Verdict::Include
    }

    /// Candidates that pass every rule, in input order
    pub fn filter<'c>(
        &self,
        candidates: impl IntoIterator<Item = &'c CreativeAd>,
        ctx: &ExclusionContext<'_>,
    ) -> Vec<&'c CreativeAd> {
        candidates
            .into_iter()
            .filter(|ad| !self.evaluate(ad, ctx).is_excluded())
            .collect()
    }
}
