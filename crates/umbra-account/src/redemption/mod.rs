//! Confirmation redemption
//!
//! [`RedemptionQueue`] persists confirmations and retries them with
//! backoff; [`Redeemer`] performs the ledger calls of a single attempt.

mod protocol;
mod queue;

pub use protocol::{RedeemedPaymentToken, Redeemer};
pub use queue::{QueueItem, QueueState, RedemptionQueue, RedemptionState};
