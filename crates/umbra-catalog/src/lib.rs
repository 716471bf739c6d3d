//! # Umbra Catalog
//!
//! Read-mostly data the serving path evaluates against:
//!
//! - [`catalog`]: the signed campaign feed, flattened into [`CreativeAd`]s
//!   and published through a [`CatalogStore`]
//! - [`resources`]: anti-targeting lists, text models and conversion id
//!   patterns, published through a [`ResourceStore`]
//! - [`ad_events`]: the append-only [`AdEventLog`]
//!
//! Catalogs and resources are replaced wholesale; a rejected update never
//! disturbs the active snapshot.

pub mod ad_events;
pub mod catalog;
pub mod pattern;
pub mod resources;

pub use ad_events::{AdEvent, AdEventList, AdEventLog};
pub use catalog::{AdPayload, Catalog, CatalogStore, CreativeAd, CreativeSetConversion, Daypart};
pub use pattern::{matches_any, matches_wildcard};
pub use resources::{ResourceKind, ResourceStore, Resources};
