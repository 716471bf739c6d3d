//! Shared domain types

pub mod ad;
pub mod identifiers;

pub use ad::{parent_segment, AdType, ConfirmationType};
pub use identifiers::{
    AdvertiserId, CampaignId, CreativeInstanceId, CreativeSetId, PlacementId, TransactionId,
};
