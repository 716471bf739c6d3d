//! # Umbra Account
//!
//! Everything between "the user saw an ad" and "the ledger owes them for
//! it":
//!
//! - [`issuers`]: the ledger's published confirmation and payment keys
//! - [`tokens`] and [`refill`]: the confirmation token ledger and its
//!   blind-signed top-ups
//! - [`confirmations`]: building and validating confirmations, with and
//!   without a reward credential
//! - [`redemption`]: the persistent retrying queue that redeems them
//! - [`payment_tokens`] and [`transactions`]: what redemption earned
//! - [`conversions`]: conversion detection and verifiable conversion
//!   envelopes
//!
//! Every piece of mutable state here is owned by one task; handles are
//! cheap to clone and safe to share.

pub mod confirmations;
pub mod conversions;
mod http;
pub mod issuers;
pub mod payment_tokens;
pub mod redemption;
pub mod refill;
pub mod tokens;
pub mod transactions;

pub use confirmations::{ConfirmationBuilder, ConfirmationInfo, ConfirmationRequest, UserData};
pub use conversions::{detect_conversions, ConversionAction, VerifiableConversionEnvelope};
pub use issuers::{IssuerStore, IssuerType, IssuersInfo};
pub use payment_tokens::{PaymentTokens, UnblindedPaymentToken};
pub use redemption::{QueueItem, RedemptionQueue, RedemptionState};
pub use refill::{RefillOutcome, TokenRefill};
pub use tokens::{ConfirmationToken, TokenLedger};
pub use transactions::{TransactionInfo, Transactions};
