//! Blind-signature tokens over Ristretto
//!
//! A verifiable oblivious PRF in the Privacy Pass style:
//!
//! 1. The client picks a 64-byte pre-image `t`, maps it to a group element
//!    `T = H(t)` and blinds it with a random scalar `r`: `P = r·T`.
//! 2. The issuer signs blindly with its secret `k`: `Q = k·P`, and proves
//!    with a batch DLEQ proof that every `Q` used the `k` behind its public
//!    key `Y = k·G`.
//! 3. The client unblinds: `W = r⁻¹·Q = k·T`. The pair `(t, W)` is an
//!    unblinded token. The issuer cannot link it to the signing request.
//! 4. To spend, the client derives a MAC key from `(t, W)` and signs a
//!    request. The issuer recomputes `W = k·H(t)` from the revealed `t` and
//!    checks the MAC.
//!
//! Every value has a base64 wire form and serializes as that string.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::hash::{sha512, sha512_parts};
use crate::errors::{Result, UmbraError};

/// Length of a token pre-image in bytes
pub const TOKEN_PREIMAGE_LENGTH: usize = 64;

const DERIVE_KEY_LABEL: &[u8] = b"umbra_token_derive_key";
const DLEQ_CHALLENGE_LABEL: &[u8] = b"umbra_dleq_challenge";
const DLEQ_COMPOSITE_LABEL: &[u8] = b"umbra_dleq_composite";

type HmacSha512 = Hmac<Sha512>;

fn decode_exact<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N]> {
    let bytes = STANDARD.decode(encoded)?;
    bytes
        .try_into()
        .map_err(|_| UmbraError::crypto(format!("{what}: expected {N} bytes")))
}

fn decompress(point: &CompressedRistretto, what: &str) -> Result<RistrettoPoint> {
    point
        .decompress()
        .ok_or_else(|| UmbraError::crypto(format!("{what}: not a valid group element")))
}

fn scalar_from_canonical(bytes: [u8; 32], what: &str) -> Result<Scalar> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
        .ok_or_else(|| UmbraError::crypto(format!("{what}: non-canonical scalar")))
}

fn nonzero_scalar(wide: &[u8; 64], what: &str) -> Result<Scalar> {
    let scalar = Scalar::from_bytes_mod_order_wide(wide);
    if scalar == Scalar::ZERO {
        return Err(UmbraError::crypto(format!("{what}: zero scalar")));
    }
    Ok(scalar)
}

// Base64 string wire form plus serde through that string.
macro_rules! base64_wire {
    ($name:ident) => {
        impl $name {
            /// Base64 wire form
            pub fn encode_base64(&self) -> String {
                STANDARD.encode(self.to_bytes())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.encode_base64())
            }
        }

        impl TryFrom<String> for $name {
            type Error = UmbraError;

            fn try_from(encoded: String) -> Result<Self> {
                Self::decode_base64(&encoded)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.encode_base64()
            }
        }
    };
}

// ============================================================================
// Client-side tokens
// ============================================================================

/// The random pre-image a token is derived from
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenPreimage([u8; TOKEN_PREIMAGE_LENGTH]);

impl TokenPreimage {
    /// Wrap raw bytes
    pub fn from_bytes(bytes: [u8; TOKEN_PREIMAGE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn to_bytes(&self) -> [u8; TOKEN_PREIMAGE_LENGTH] {
        self.0
    }

    /// Decode from base64
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Ok(Self(decode_exact(encoded, "token preimage")?))
    }

    fn hash_to_point(&self) -> RistrettoPoint {
        RistrettoPoint::from_uniform_bytes(&sha512(&self.0))
    }
}

base64_wire!(TokenPreimage);

impl fmt::Debug for TokenPreimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenPreimage({}..)", &self.encode_base64()[..8])
    }
}

/// A token together with its blinding factor, held until the signed token
/// comes back
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token {
    preimage: TokenPreimage,
    blind: Scalar,
}

impl Token {
    /// Build a token from 64 bytes of pre-image and 64 bytes of blinding seed
    pub fn from_random(
        preimage: [u8; TOKEN_PREIMAGE_LENGTH],
        blind_seed: [u8; 64],
    ) -> Result<Self> {
        Ok(Self {
            preimage: TokenPreimage(preimage),
            blind: nonzero_scalar(&blind_seed, "token blind")?,
        })
    }

    /// The pre-image
    pub fn preimage(&self) -> &TokenPreimage {
        &self.preimage
    }

    /// Blind the token for signing
    pub fn blind(&self) -> BlindedToken {
        BlindedToken((self.blind * self.preimage.hash_to_point()).compress())
    }

    /// Unblind a signed token. Only valid after the batch proof covering
    /// `signed` has been verified.
    pub fn unblind(&self, signed: &SignedToken) -> Result<UnblindedToken> {
        let q = decompress(&signed.0, "signed token")?;
        let w = self.blind.invert() * q;
        Ok(UnblindedToken {
            preimage: self.preimage.clone(),
            point: w.compress(),
        })
    }

    /// Raw bytes: pre-image followed by the blind scalar
    pub fn to_bytes(&self) -> [u8; 96] {
        let mut out = [0u8; 96];
        out[..64].copy_from_slice(&self.preimage.0);
        out[64..].copy_from_slice(self.blind.as_bytes());
        out
    }

    /// Decode from base64
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        let bytes: [u8; 96] = decode_exact(encoded, "token")?;
        let mut preimage = [0u8; 64];
        preimage.copy_from_slice(&bytes[..64]);
        let mut blind = [0u8; 32];
        blind.copy_from_slice(&bytes[64..]);
        Ok(Self {
            preimage: TokenPreimage(preimage),
            blind: scalar_from_canonical(blind, "token blind")?,
        })
    }
}

base64_wire!(Token);

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("preimage", &self.preimage)
            .finish_non_exhaustive()
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.blind.zeroize();
    }
}

/// A blinded token sent to the issuer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlindedToken(CompressedRistretto);

impl BlindedToken {
    /// Raw bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Decode from base64
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Ok(Self(CompressedRistretto(decode_exact(encoded, "blinded token")?)))
    }
}

base64_wire!(BlindedToken);

/// A blinded token signed by the issuer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignedToken(CompressedRistretto);

impl SignedToken {
    /// Raw bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Decode from base64
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Ok(Self(CompressedRistretto(decode_exact(encoded, "signed token")?)))
    }
}

base64_wire!(SignedToken);

/// A spendable token `(t, W)`
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnblindedToken {
    preimage: TokenPreimage,
    point: CompressedRistretto,
}

impl UnblindedToken {
    /// The pre-image, revealed to the issuer when spending
    pub fn preimage(&self) -> &TokenPreimage {
        &self.preimage
    }

    /// Derive the MAC key bound to this token
    pub fn derive_verification_key(&self) -> VerificationKey {
        VerificationKey(sha512_parts(
            DERIVE_KEY_LABEL,
            &[&self.preimage.0, self.point.as_bytes()],
        ))
    }

    /// Raw bytes: pre-image followed by `W`
    pub fn to_bytes(&self) -> [u8; 96] {
        let mut out = [0u8; 96];
        out[..64].copy_from_slice(&self.preimage.0);
        out[64..].copy_from_slice(self.point.as_bytes());
        out
    }

    /// Decode from base64
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        let bytes: [u8; 96] = decode_exact(encoded, "unblinded token")?;
        let mut preimage = [0u8; 64];
        preimage.copy_from_slice(&bytes[..64]);
        let mut point = [0u8; 32];
        point.copy_from_slice(&bytes[64..]);
        Ok(Self {
            preimage: TokenPreimage(preimage),
            point: CompressedRistretto(point),
        })
    }
}

base64_wire!(UnblindedToken);

impl fmt::Debug for UnblindedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnblindedToken")
            .field("preimage", &self.preimage)
            .finish_non_exhaustive()
    }
}

/// MAC key derived from an unblinded token
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VerificationKey([u8; 64]);

impl VerificationKey {
    /// MAC `message`
    pub fn sign(&self, message: &[u8]) -> Result<VerificationSignature> {
        let mut out = [0u8; 64];
        out.copy_from_slice(&self.mac(message)?.finalize().into_bytes());
        Ok(VerificationSignature(out))
    }

    /// Constant-time check of a MAC over `message`
    pub fn verify(&self, signature: &VerificationSignature, message: &[u8]) -> bool {
        self.mac(message)
            .map(|mac| mac.verify_slice(&signature.0).is_ok())
            .unwrap_or(false)
    }

    fn mac(&self, message: &[u8]) -> Result<HmacSha512> {
        let mut mac = HmacSha512::new_from_slice(&self.0)
            .map_err(|e| UmbraError::crypto(format!("hmac key: {e}")))?;
        mac.update(message);
        Ok(mac)
    }
}

/// A MAC produced with a [`VerificationKey`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VerificationSignature([u8; 64]);

impl VerificationSignature {
    /// Raw bytes
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }

    /// Decode from base64
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        Ok(Self(decode_exact(encoded, "verification signature")?))
    }
}

base64_wire!(VerificationSignature);

// ============================================================================
// Issuer keys and proofs
// ============================================================================

/// An issuer public key `Y = k·G`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(CompressedRistretto);

impl PublicKey {
    /// Raw bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Decode from base64
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        let key = Self(CompressedRistretto(decode_exact(encoded, "public key")?));
        decompress(&key.0, "public key")?;
        Ok(key)
    }
}

base64_wire!(PublicKey);

/// An issuer signing key. Lives on the ledger; the client only uses it in
/// tests through the mock ledger.
#[derive(Clone)]
pub struct SigningKey {
    k: Scalar,
}

impl SigningKey {
    /// Build a key from 64 bytes of seed material
    pub fn from_random(seed: [u8; 64]) -> Result<Self> {
        Ok(Self {
            k: nonzero_scalar(&seed, "signing key")?,
        })
    }

    /// The matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey((self.k * RISTRETTO_BASEPOINT_POINT).compress())
    }

    /// Blindly sign one token
    pub fn sign(&self, blinded: &BlindedToken) -> Result<SignedToken> {
        let p = decompress(&blinded.0, "blinded token")?;
        Ok(SignedToken((self.k * p).compress()))
    }

    /// Recompute the unblinded token for a revealed pre-image
    pub fn rederive_unblinded_token(&self, preimage: &TokenPreimage) -> UnblindedToken {
        UnblindedToken {
            preimage: preimage.clone(),
            point: (self.k * preimage.hash_to_point()).compress(),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.k.zeroize();
    }
}

/// Proof that a batch of signed tokens all used the key behind one public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchDleqProof {
    c: Scalar,
    s: Scalar,
}

struct Composites {
    m: RistrettoPoint,
    z: RistrettoPoint,
}

fn composites(
    blinded: &[BlindedToken],
    signed: &[SignedToken],
    public_key: &PublicKey,
) -> Result<Composites> {
    if blinded.is_empty() || blinded.len() != signed.len() {
        return Err(UmbraError::crypto(format!(
            "batch proof: {} blinded tokens, {} signed tokens",
            blinded.len(),
            signed.len()
        )));
    }

    let mut seed_parts: Vec<&[u8]> = Vec::with_capacity(2 + 2 * blinded.len());
    let g = RISTRETTO_BASEPOINT_POINT.compress();
    seed_parts.push(g.as_bytes());
    seed_parts.push(public_key.0.as_bytes());
    seed_parts.extend(blinded.iter().map(|b| b.0.as_bytes().as_slice()));
    seed_parts.extend(signed.iter().map(|s| s.0.as_bytes().as_slice()));
    let seed = sha512_parts(DLEQ_COMPOSITE_LABEL, &seed_parts);

    let mut m = RistrettoPoint::identity();
    let mut z = RistrettoPoint::identity();
    for (index, (b, s)) in blinded.iter().zip(signed).enumerate() {
        let coefficient = Scalar::from_bytes_mod_order_wide(&sha512_parts(
            &seed,
            &[&(index as u64).to_le_bytes()],
        ));
        m += coefficient * decompress(&b.0, "blinded token")?;
        z += coefficient * decompress(&s.0, "signed token")?;
    }
    Ok(Composites { m, z })
}

fn challenge(
    public_key: &PublicKey,
    composites: &Composites,
    a: &RistrettoPoint,
    b: &RistrettoPoint,
) -> Scalar {
    let g = RISTRETTO_BASEPOINT_POINT.compress();
    let m = composites.m.compress();
    let z = composites.z.compress();
    let a = a.compress();
    let b = b.compress();
    Scalar::from_bytes_mod_order_wide(&sha512_parts(
        DLEQ_CHALLENGE_LABEL,
        &[
            g.as_bytes(),
            public_key.0.as_bytes(),
            m.as_bytes(),
            z.as_bytes(),
            a.as_bytes(),
            b.as_bytes(),
        ],
    ))
}

impl BatchDleqProof {
    /// Prove a batch (issuer side). `nonce_seed` must be fresh randomness.
    pub fn new(
        blinded: &[BlindedToken],
        signed: &[SignedToken],
        key: &SigningKey,
        nonce_seed: [u8; 64],
    ) -> Result<Self> {
        let public_key = key.public_key();
        let composites = composites(blinded, signed, &public_key)?;
        let mut t = nonzero_scalar(&nonce_seed, "proof nonce")?;
        let a = t * RISTRETTO_BASEPOINT_POINT;
        let b = t * composites.m;
        let c = challenge(&public_key, &composites, &a, &b);
        let s = t - c * key.k;
        t.zeroize();
        Ok(Self { c, s })
    }

    /// Verify a batch against the issuer's public key
    pub fn verify(
        &self,
        blinded: &[BlindedToken],
        signed: &[SignedToken],
        public_key: &PublicKey,
    ) -> Result<()> {
        let y = decompress(&public_key.0, "public key")?;
        let composites = composites(blinded, signed, public_key)?;
        let a = self.s * RISTRETTO_BASEPOINT_POINT + self.c * y;
        let b = self.s * composites.m + self.c * composites.z;
        if challenge(public_key, &composites, &a, &b) == self.c {
            Ok(())
        } else {
            Err(UmbraError::crypto("batch proof verification failed"))
        }
    }

    /// Verify the batch and unblind every signed token
    pub fn verify_and_unblind(
        &self,
        tokens: &[Token],
        signed: &[SignedToken],
        public_key: &PublicKey,
    ) -> Result<Vec<UnblindedToken>> {
        let blinded: Vec<BlindedToken> = tokens.iter().map(Token::blind).collect();
        self.verify(&blinded, signed, public_key)?;
        tokens
            .iter()
            .zip(signed)
            .map(|(token, signed)| token.unblind(signed))
            .collect()
    }

    /// Raw bytes: `c` followed by `s`
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.c.as_bytes());
        out[32..].copy_from_slice(self.s.as_bytes());
        out
    }

    /// Decode from base64
    pub fn decode_base64(encoded: &str) -> Result<Self> {
        let bytes: [u8; 64] = decode_exact(encoded, "batch proof")?;
        let mut c = [0u8; 32];
        c.copy_from_slice(&bytes[..32]);
        let mut s = [0u8; 32];
        s.copy_from_slice(&bytes[32..]);
        Ok(Self {
            c: scalar_from_canonical(c, "batch proof")?,
            s: scalar_from_canonical(s, "batch proof")?,
        })
    }
}

base64_wire!(BatchDleqProof);
