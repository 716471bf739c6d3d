//! Cryptographic primitives
//!
//! - [`hash`]: SHA-256/512 helpers
//! - [`tokens`]: blind-signature tokens, batch DLEQ proofs and token-bound MACs

pub mod hash;
pub mod tokens;

pub use tokens::{
    BatchDleqProof, BlindedToken, PublicKey, SignedToken, SigningKey, Token, TokenPreimage,
    UnblindedToken, VerificationKey, VerificationSignature, TOKEN_PREIMAGE_LENGTH,
};
