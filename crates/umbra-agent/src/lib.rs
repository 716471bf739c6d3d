//! # Umbra Agent
//!
//! Composes the Umbra crates into one [`AdsService`]:
//!
//! - [`AdsServiceBuilder`] validates configuration, loads persisted state
//!   and wires every store to one [`UmbraEffects`](umbra_core::UmbraEffects)
//!   bundle
//! - [`AdsService::start`] fetches issuers, resumes queued redemptions,
//!   refills tokens and starts the background maintenance tick
//! - serving, event recording and conversion detection run through the
//!   service; each confirmation it builds is queued for redemption
//! - [`AdsService::shutdown`] stops background work and lets in-flight
//!   redemptions finish

mod builder;
mod service;
mod tasks;

pub use builder::AdsServiceBuilder;
pub use service::{
    AdsService, ConfirmationOutcome, ConversionOutcome, EventOutcome, MaintenanceReport,
    StartupReport,
};
