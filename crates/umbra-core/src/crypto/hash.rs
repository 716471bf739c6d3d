//! Hash helpers
//!
//! SHA-256 for content digests and key derivation inputs, SHA-512 for
//! wide reductions onto the Ristretto group and its scalar field.

use sha2::{Digest, Sha256, Sha512};

/// SHA-256 of `data`
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-512 of `data`
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

/// SHA-512 over a domain label followed by each part in order
pub fn sha512_parts(label: &[u8], parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(label);
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}
