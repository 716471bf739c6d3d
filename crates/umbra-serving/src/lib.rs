//! # Umbra Serving
//!
//! Decides which creative, if any, to show for one serving opportunity:
//!
//! - [`exclusion`]: rules that disqualify candidates, composed per ad unit
//! - [`predictor`]: model, embedding and bandit ranking, plus page text
//!   classification
//! - [`pacing`]: pass-through throttling
//! - [`user_model`]: segments and embeddings describing the user
//! - [`eligible`]: the orchestrator tying them together

pub mod eligible;
pub mod exclusion;
pub mod pacing;
pub mod predictor;
pub mod user_model;

pub use eligible::{EligibleAds, SelectionState};
pub use exclusion::{ExclusionChain, ExclusionContext, ExclusionRule, Verdict};
pub use pacing::should_serve;
pub use predictor::{BanditArms, Ranker, RankingInput};
pub use user_model::UserModel;
