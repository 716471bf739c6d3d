//! Catalog feed, model and store

pub mod feed;
pub mod model;
pub mod store;

pub use feed::{parse_catalog, CATALOG_VERSION};
pub use model::{AdPayload, Catalog, CreativeAd, CreativeSetConversion, Daypart, Wallpaper};
pub use store::CatalogStore;
