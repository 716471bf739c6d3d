//! Verifiable conversion envelopes
//!
//! A conversion id is sealed to the advertiser's X25519 public key with a
//! fresh ephemeral key pair. The shared secret is expanded with HKDF-SHA256
//! (salted with a fixed domain, keyed to both public keys) into an
//! XChaCha20-Poly1305 key. Only the holder of the advertiser secret can
//! open the envelope; the engine checks the envelope shape before upload.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;
use umbra_core::{Result, UmbraError};

use super::is_valid_conversion_id;

/// Algorithm tag carried by every envelope
pub const ENVELOPE_ALGORITHM: &str = "crypto_box_curve25519xchacha20poly1305";

const ENVELOPE_DOMAIN: &[u8] = b"UMBRA_CONVERSION_ENVELOPE_v1";
const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 24;
const TAG_LENGTH: usize = 16;

/// An encrypted conversion id, every field base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableConversionEnvelope {
    /// Always [`ENVELOPE_ALGORITHM`]
    pub algorithm: String,
    /// Sealed conversion id with its authentication tag
    pub ciphertext: String,
    /// Sender's ephemeral X25519 public key
    pub ephemeral_public_key: String,
    /// 24-byte nonce
    pub nonce: String,
}

/// Fresh randomness for one seal
pub struct SealRandomness {
    /// Ephemeral X25519 secret
    pub ephemeral_secret: Zeroizing<[u8; KEY_LENGTH]>,
    /// Encryption nonce
    pub nonce: [u8; NONCE_LENGTH],
}

impl SealRandomness {
    /// Wrap raw random bytes
    pub fn new(ephemeral_secret: [u8; KEY_LENGTH], nonce: [u8; NONCE_LENGTH]) -> Self {
        Self {
            ephemeral_secret: Zeroizing::new(ephemeral_secret),
            nonce,
        }
    }
}

fn decode_array<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N]> {
    STANDARD
        .decode(encoded)?
        .try_into()
        .map_err(|_| UmbraError::crypto(format!("envelope {what}: expected {N} bytes")))
}

/// Base64 X25519 public key for a secret
pub fn public_key_for(secret: &[u8; KEY_LENGTH]) -> String {
    STANDARD.encode(MontgomeryPoint::mul_base_clamped(*secret).as_bytes())
}

fn shared_key(
    other_public: &MontgomeryPoint,
    own_secret: &[u8; KEY_LENGTH],
    ephemeral_public: &MontgomeryPoint,
    recipient_public: &MontgomeryPoint,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let shared = Zeroizing::new(other_public.mul_clamped(*own_secret).to_bytes());
    if shared.iter().all(|b| *b == 0) {
        return Err(UmbraError::crypto("envelope: low-order public key"));
    }

    let mut info = Vec::with_capacity(2 * KEY_LENGTH);
    info.extend_from_slice(ephemeral_public.as_bytes());
    info.extend_from_slice(recipient_public.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(ENVELOPE_DOMAIN), &shared[..]);
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    hkdf.expand(&info, &mut key[..])
        .map_err(|_| UmbraError::crypto("envelope: key expansion failed"))?;
    Ok(key)
}

/// Seal `conversion_id` to the advertiser's base64 X25519 public key
pub fn seal(
    conversion_id: &str,
    advertiser_public_key: &str,
    randomness: SealRandomness,
) -> Result<VerifiableConversionEnvelope> {
    if !is_valid_conversion_id(conversion_id) {
        return Err(UmbraError::invalid(format!(
            "invalid conversion id {conversion_id:?}"
        )));
    }
    let recipient = MontgomeryPoint(decode_array(advertiser_public_key, "advertiser key")?);
    let ephemeral_public = MontgomeryPoint::mul_base_clamped(*randomness.ephemeral_secret);
    let key = shared_key(
        &recipient,
        &randomness.ephemeral_secret,
        &ephemeral_public,
        &recipient,
    )?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&randomness.nonce), conversion_id.as_bytes())
        .map_err(|_| UmbraError::crypto("envelope: encryption failed"))?;

    Ok(VerifiableConversionEnvelope {
        algorithm: ENVELOPE_ALGORITHM.to_string(),
        ciphertext: STANDARD.encode(ciphertext),
        ephemeral_public_key: STANDARD.encode(ephemeral_public.as_bytes()),
        nonce: STANDARD.encode(randomness.nonce),
    })
}

impl VerifiableConversionEnvelope {
    /// Check the algorithm tag, base64 encodings and field lengths
    pub fn validate(&self) -> Result<()> {
        if self.algorithm != ENVELOPE_ALGORITHM {
            return Err(UmbraError::invalid(format!(
                "envelope: unsupported algorithm {}",
                self.algorithm
            )));
        }
        decode_array::<KEY_LENGTH>(&self.ephemeral_public_key, "ephemeral key")?;
        decode_array::<NONCE_LENGTH>(&self.nonce, "nonce")?;
        let ciphertext = STANDARD.decode(&self.ciphertext)?;
        if ciphertext.len() <= TAG_LENGTH {
            return Err(UmbraError::crypto("envelope ciphertext: too short"));
        }
        Ok(())
    }

    /// Open with the advertiser's X25519 secret
    pub fn open(&self, advertiser_secret: &[u8; KEY_LENGTH]) -> Result<String> {
        self.validate()?;
        let ephemeral_public =
            MontgomeryPoint(decode_array(&self.ephemeral_public_key, "ephemeral key")?);
        let nonce: [u8; NONCE_LENGTH] = decode_array(&self.nonce, "nonce")?;
        let ciphertext = STANDARD.decode(&self.ciphertext)?;
        let recipient = MontgomeryPoint::mul_base_clamped(*advertiser_secret);
        let key = shared_key(&ephemeral_public, advertiser_secret, &ephemeral_public, &recipient)?;

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| UmbraError::crypto("envelope: authentication failed"))?;
        let conversion_id = String::from_utf8(plaintext)
            .map_err(|_| UmbraError::crypto("envelope: plaintext is not utf-8"))?;
        if !is_valid_conversion_id(&conversion_id) {
            return Err(UmbraError::invalid("envelope: opened an invalid conversion id"));
        }
        Ok(conversion_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    const ADVERTISER_SECRET: [u8; 32] = [11; 32];

    fn randomness(seed: u8) -> SealRandomness {
        SealRandomness::new([seed; 32], [seed.wrapping_add(1); 24])
    }

    #[test]
    fn test_open_seal() {
        let public = public_key_for(&ADVERTISER_SECRET);
        let envelope = seal("abc-123", &public, randomness(1)).unwrap();
        envelope.validate().unwrap();
        assert_eq!(envelope.open(&ADVERTISER_SECRET).unwrap(), "abc-123");
    }

    #[test]
    fn test_wrong_secret_fails() {
        let public = public_key_for(&ADVERTISER_SECRET);
        let envelope = seal("abc-123", &public, randomness(1)).unwrap();
        assert_matches!(envelope.open(&[12; 32]), Err(UmbraError::Crypto { .. }));
    }

    #[test]
    fn test_tampered_envelopes() {
        let public = public_key_for(&ADVERTISER_SECRET);
        let envelope = seal("abc-123", &public, randomness(1)).unwrap();

        let mut algorithm = envelope.clone();
        algorithm.algorithm = "rot13".to_string();
        assert!(algorithm.validate().is_err());

        let mut nonce = envelope.clone();
        nonce.nonce = STANDARD.encode([0u8; 12]);
        assert!(nonce.validate().is_err());

        let mut ciphertext = envelope.clone();
        let mut bytes = STANDARD.decode(&envelope.ciphertext).unwrap();
        bytes[0] ^= 1;
        ciphertext.ciphertext = STANDARD.encode(bytes);
        assert!(ciphertext.open(&ADVERTISER_SECRET).is_err());
    }

    #[test]
    fn test_rejects_bad_ids_and_keys() {
        let public = public_key_for(&ADVERTISER_SECRET);
        assert!(seal("", &public, randomness(1)).is_err());
        assert!(seal("has space", &public, randomness(1)).is_err());
        assert!(seal(&"x".repeat(31), &public, randomness(1)).is_err());
        assert!(seal("abc", "not base64!", randomness(1)).is_err());
        assert!(seal("abc", &STANDARD.encode([0u8; 32]), randomness(1)).is_err());
    }

    proptest! {
        #[test]
        fn prop_open_inverts_seal(
            id in "[-a-zA-Z0-9]{1,30}",
            secret in prop::array::uniform32(any::<u8>()),
            ephemeral in prop::array::uniform32(any::<u8>()),
            nonce in prop::array::uniform24(any::<u8>()),
        ) {
            let public = public_key_for(&secret);
            let envelope = seal(&id, &public, SealRandomness::new(ephemeral, nonce)).unwrap();
            prop_assert_eq!(envelope.open(&secret).unwrap(), id);
        }
    }
}
