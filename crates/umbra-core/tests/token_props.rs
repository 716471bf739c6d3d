#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]
//! Property tests for the blind-token protocol

use proptest::prelude::*;
use umbra_core::crypto::{BatchDleqProof, BlindedToken, SignedToken, SigningKey, Token};

fn seed64(seed: [u8; 32], salt: u8) -> [u8; 64] {
    let mut out = [salt; 64];
    out[..32].copy_from_slice(&seed);
    out
}

proptest! {
    #[test]
    fn unblinded_tokens_match_issuer_rederivation(
        key_seed in any::<[u8; 32]>(),
        token_seeds in proptest::collection::vec(any::<[u8; 32]>(), 1..8),
    ) {
        let key = SigningKey::from_random(seed64(key_seed, 1)).unwrap();
        let tokens: Vec<Token> = token_seeds
            .iter()
            .map(|s| Token::from_random(seed64(*s, 2), seed64(*s, 3)).unwrap())
            .collect();
        let blinded: Vec<BlindedToken> = tokens.iter().map(Token::blind).collect();
        let signed: Vec<SignedToken> = blinded.iter().map(|b| key.sign(b).unwrap()).collect();
        let proof = BatchDleqProof::new(&blinded, &signed, &key, seed64(key_seed, 4)).unwrap();

        let unblinded = proof
            .verify_and_unblind(&tokens, &signed, &key.public_key())
            .unwrap();

        for (token, unblinded) in tokens.iter().zip(&unblinded) {
            prop_assert_eq!(unblinded, &key.rederive_unblinded_token(token.preimage()));
        }
    }

    #[test]
    fn blinded_tokens_hide_preimage(seed in any::<[u8; 32]>(), other in any::<[u8; 32]>()) {
        prop_assume!(seed != other);
        // Same pre-image, different blinds: unlinkable blinded values
        let a = Token::from_random(seed64(seed, 5), seed64(seed, 6)).unwrap();
        let b = Token::from_random(seed64(seed, 5), seed64(other, 6)).unwrap();
        prop_assert_ne!(a.blind(), b.blind());
    }
}
