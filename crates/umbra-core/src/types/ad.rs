//! Ad unit and confirmation vocabularies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::UmbraError;

/// The surface an ad is shown on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    /// System notification ads
    Notification,
    /// New tab page wallpaper ads
    NewTabPage,
    /// Inline content cards
    InlineContent,
    /// Promoted content cards
    PromotedContent,
    /// Ads attached to search results
    SearchResult,
}

impl AdType {
    /// All ad types
    pub const ALL: [AdType; 5] = [
        AdType::Notification,
        AdType::NewTabPage,
        AdType::InlineContent,
        AdType::PromotedContent,
        AdType::SearchResult,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AdType::Notification => "ad_notification",
            AdType::NewTabPage => "new_tab_page_ad",
            AdType::InlineContent => "inline_content_ad",
            AdType::PromotedContent => "promoted_content_ad",
            AdType::SearchResult => "search_result_ad",
        }
    }
}

impl fmt::Display for AdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdType {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AdType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UmbraError::invalid(format!("unknown ad type: {s}")))
    }
}

/// The lifecycle event a confirmation attests to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationType {
    /// Ad was chosen and handed to the UI
    Served,
    /// Ad was displayed
    Viewed,
    /// Ad was clicked
    Clicked,
    /// Ad was dismissed
    Dismissed,
    /// User navigated to the advertiser
    Transferred,
    /// User marked the ad as inappropriate
    Flagged,
    /// User saved the ad
    Saved,
    /// User liked the advertiser
    Upvoted,
    /// User disliked the advertiser
    Downvoted,
    /// An ad led to a conversion on the advertiser's site
    Conversion,
}

impl ConfirmationType {
    /// All confirmation types
    pub const ALL: [ConfirmationType; 10] = [
        ConfirmationType::Served,
        ConfirmationType::Viewed,
        ConfirmationType::Clicked,
        ConfirmationType::Dismissed,
        ConfirmationType::Transferred,
        ConfirmationType::Flagged,
        ConfirmationType::Saved,
        ConfirmationType::Upvoted,
        ConfirmationType::Downvoted,
        ConfirmationType::Conversion,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationType::Served => "served",
            ConfirmationType::Viewed => "view",
            ConfirmationType::Clicked => "click",
            ConfirmationType::Dismissed => "dismiss",
            ConfirmationType::Transferred => "landed",
            ConfirmationType::Flagged => "flag",
            ConfirmationType::Saved => "bookmark",
            ConfirmationType::Upvoted => "upvote",
            ConfirmationType::Downvoted => "downvote",
            ConfirmationType::Conversion => "conversion",
        }
    }
}

impl fmt::Display for ConfirmationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfirmationType {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfirmationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UmbraError::invalid(format!("unknown confirmation type: {s}")))
    }
}

/// Parent of a hierarchical segment (`"technology & computing-software"` →
/// `"technology & computing"`). A top-level segment is its own parent.
pub fn parent_segment(segment: &str) -> &str {
    segment.split_once('-').map_or(segment, |(parent, _)| parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for t in ConfirmationType::ALL {
            assert_eq!(t.as_str().parse::<ConfirmationType>().unwrap(), t);
        }
        for t in AdType::ALL {
            assert_eq!(t.as_str().parse::<AdType>().unwrap(), t);
        }
        assert!("nope".parse::<AdType>().is_err());
    }

    #[test]
    fn test_parent_segment() {
        assert_eq!(
            parent_segment("technology & computing-software"),
            "technology & computing"
        );
        assert_eq!(parent_segment("automotive"), "automotive");
    }
}
