//! Confirmation builder
//!
//! A confirmation attests that one ad lifecycle event happened. With
//! rewards enabled it spends exactly one confirmation token: the payload
//! (transaction id, creative, event type, a freshly blinded payment token
//! and user data) is signed with a MAC keyed by the token, and the
//! credential reveals the token pre-image so the ledger can re-derive the
//! key. The ledger learns that *a* valid token was spent, never whose.
//!
//! With rewards disabled the confirmation carries no token, no user data
//! and no credential.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use umbra_core::crypto::{BlindedToken, PublicKey, Token, UnblindedToken, VerificationSignature};
use umbra_core::{
    parent_segment, AdType, ConfirmationType, CreativeInstanceId, PhysicalTime, Result,
    TransactionId, UmbraConfig, UmbraEffects, UmbraError,
};

use crate::conversions::VerifiableConversionEnvelope;
use crate::issuers::IssuersInfo;
use crate::payment_tokens::PaymentTokens;
use crate::tokens::TokenLedger;

/// Reported in place of a country outside the anonymity set
pub const UNKNOWN_COUNTRY_CODE: &str = "??";

/// Earned payment tokens for one ad format and event type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataTotal {
    /// Ad format wire name
    pub ad_format: String,
    /// Confirmation type wire name
    #[serde(rename = "type")]
    pub confirmation_type: String,
    /// Tokens held
    pub count: usize,
}

/// Coarse context attached to opted-in confirmations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    /// Country code, or [`UNKNOWN_COUNTRY_CODE`]
    pub country_code: String,
    /// Top-level segment of the creative
    pub segment: String,
    /// Platform name
    pub platform: String,
    /// Build channel
    pub build_channel: String,
    /// Earned payment token totals
    pub totals: Vec<UserDataTotal>,
    /// Sealed conversion id, conversion confirmations only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_envelope: Option<VerifiableConversionEnvelope>,
}

/// The token spent by an opted-in confirmation and everything derived from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardCredential {
    /// Spent confirmation token
    pub unblinded_token: UnblindedToken,
    /// Confirmations issuer key the token was signed under
    pub public_key: PublicKey,
    /// Payment token kept to unblind the ledger's signature
    pub payment_token: Token,
    /// Blinded payment token sent for signing
    pub blinded_payment_token: BlindedToken,
    /// Signed payload, as sent
    pub payload: String,
    /// `base64url(json{payload, signature, t})`
    pub credential: String,
}

/// One confirmation, from creation to redemption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationInfo {
    /// Transaction id, unique per confirmation
    pub transaction_id: TransactionId,
    /// Creative the event happened to
    pub creative_instance_id: CreativeInstanceId,
    /// Lifecycle event
    pub confirmation_type: ConfirmationType,
    /// Ad unit
    pub ad_type: AdType,
    /// When the confirmation was built
    pub created_at: PhysicalTime,
    /// Present for opted-in confirmations only
    pub user_data: Option<UserData>,
    /// Present for opted-in confirmations only
    pub reward: Option<RewardCredential>,
    /// The ledger has accepted the create request
    pub was_created: bool,
}

/// What to confirm
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    /// Creative the event happened to
    pub creative_instance_id: CreativeInstanceId,
    /// Lifecycle event
    pub confirmation_type: ConfirmationType,
    /// Ad unit
    pub ad_type: AdType,
    /// Creative segment
    pub segment: String,
    /// Sealed conversion id for verifiable conversions
    pub conversion_envelope: Option<VerifiableConversionEnvelope>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Payload<'a> {
    transaction_id: &'a TransactionId,
    creative_instance_id: &'a CreativeInstanceId,
    #[serde(rename = "type")]
    confirmation_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    blinded_payment_tokens: Option<[&'a BlindedToken; 1]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_key: Option<&'a PublicKey>,
    #[serde(flatten)]
    user_data: Option<&'a UserData>,
}

#[derive(Serialize, Deserialize)]
struct CredentialEnvelope {
    payload: String,
    signature: String,
    t: String,
}

fn encode_credential(
    payload: &str,
    signature: &VerificationSignature,
    token: &UnblindedToken,
) -> Result<String> {
    let envelope = CredentialEnvelope {
        payload: payload.to_string(),
        signature: signature.encode_base64(),
        t: token.preimage().encode_base64(),
    };
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(&envelope)?))
}

fn decode_credential(credential: &str) -> Result<CredentialEnvelope> {
    let bytes = URL_SAFE_NO_PAD
        .decode(credential)
        .map_err(|e| UmbraError::invalid_credential(format!("not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| UmbraError::invalid_credential(format!("not json: {e}")))
}

impl ConfirmationInfo {
    /// Whether the confirmation spends a token
    pub fn is_opted_in(&self) -> bool {
        self.reward.is_some()
    }

    /// Body posted when creating the confirmation
    pub fn payload(&self) -> Result<String> {
        match &self.reward {
            Some(reward) => Ok(reward.payload.clone()),
            None => Ok(serde_json::to_string(&Payload {
                transaction_id: &self.transaction_id,
                creative_instance_id: &self.creative_instance_id,
                confirmation_type: self.confirmation_type.as_str(),
                blinded_payment_tokens: None,
                public_key: None,
                user_data: None,
            })?),
        }
    }

    /// Check the confirmation can be redeemed: ids are present and, when a
    /// token is spent, the credential matches the payload, the token's MAC
    /// verifies and its key is a current confirmations issuer key
    pub fn validate(&self, issuers: &IssuersInfo) -> Result<()> {
        if self.transaction_id.uuid().is_nil() {
            return Err(UmbraError::invalid("confirmation has no transaction id"));
        }
        if self.creative_instance_id.as_str().is_empty() {
            return Err(UmbraError::invalid("confirmation has no creative instance id"));
        }
        let Some(reward) = &self.reward else {
            if self.user_data.is_some() {
                return Err(UmbraError::invalid("opted-out confirmation carries user data"));
            }
            return Ok(());
        };

        if self.user_data.is_none() {
            return Err(UmbraError::invalid("opted-in confirmation has no user data"));
        }
        let envelope = decode_credential(&reward.credential)?;
        if envelope.payload != reward.payload {
            return Err(UmbraError::invalid_credential("credential does not cover the payload"));
        }
        let signature = VerificationSignature::decode_base64(&envelope.signature)
            .map_err(|e| UmbraError::invalid_credential(format!("signature: {e}")))?;
        if envelope.t != reward.unblinded_token.preimage().encode_base64() {
            return Err(UmbraError::invalid_credential("credential reveals another token"));
        }
        if !reward
            .unblinded_token
            .derive_verification_key()
            .verify(&signature, envelope.payload.as_bytes())
        {
            return Err(UmbraError::invalid_credential("token signature does not verify"));
        }
        if !issuers.is_confirmation_key(&reward.public_key) {
            return Err(UmbraError::unknown_issuer(format!(
                "token signed under unpublished key {}",
                reward.public_key
            )));
        }
        Ok(())
    }
}

/// Builds confirmations, spending tokens from the ledger
#[derive(Debug, Clone)]
pub struct ConfirmationBuilder {
    tokens: TokenLedger,
    payment_tokens: PaymentTokens,
    effects: UmbraEffects,
    anonymity_countries: HashSet<String>,
}

impl ConfirmationBuilder {
    /// Builder over the token ledger and earned payment tokens
    pub fn new(
        config: &UmbraConfig,
        tokens: TokenLedger,
        payment_tokens: PaymentTokens,
        effects: UmbraEffects,
    ) -> Self {
        Self {
            tokens,
            payment_tokens,
            effects,
            anonymity_countries: config
                .privacy
                .anonymity_countries
                .iter()
                .map(|c| c.to_ascii_uppercase())
                .collect(),
        }
    }

    async fn transaction_id(&self) -> Result<TransactionId> {
        let bytes: [u8; 16] = self
            .effects
            .random
            .random_bytes(16)
            .await
            .try_into()
            .map_err(|_| UmbraError::internal("random source returned a short buffer"))?;
        Ok(TransactionId::from_random_bytes(bytes))
    }

    /// User data for an opted-in confirmation
    pub async fn user_data(&self, request: &ConfirmationRequest) -> Result<UserData> {
        let platform = &self.effects.platform;
        let country = platform.country_code().await.to_ascii_uppercase();
        let country_code = if self.anonymity_countries.contains(&country) {
            country
        } else {
            UNKNOWN_COUNTRY_CODE.to_string()
        };
        let totals = self
            .payment_tokens
            .totals()
            .await?
            .into_iter()
            .map(|total| UserDataTotal {
                ad_format: total.ad_type.as_str().to_string(),
                confirmation_type: total.confirmation_type.as_str().to_string(),
                count: total.count,
            })
            .collect();
        let conversion_envelope = match request.confirmation_type {
            ConfirmationType::Conversion => request.conversion_envelope.clone(),
            _ => None,
        };

        Ok(UserData {
            country_code,
            segment: parent_segment(&request.segment).to_string(),
            platform: platform.platform_name().await,
            build_channel: platform.build_channel().await,
            totals,
            conversion_envelope,
        })
    }

    /// Build a confirmation. Opted-in confirmations fail with
    /// `InsufficientTokens` when the ledger is empty; nothing is consumed.
    pub async fn build(&self, request: ConfirmationRequest) -> Result<ConfirmationInfo> {
        let transaction_id = self.transaction_id().await?;
        let created_at = self.effects.now().await?;

        if !self.effects.platform.is_rewards_enabled().await {
            debug!(
                %transaction_id,
                confirmation_type = %request.confirmation_type,
                "built opted-out confirmation"
            );
            return Ok(ConfirmationInfo {
                transaction_id,
                creative_instance_id: request.creative_instance_id,
                confirmation_type: request.confirmation_type,
                ad_type: request.ad_type,
                created_at,
                user_data: None,
                reward: None,
                was_created: false,
            });
        }

        let user_data = self.user_data(&request).await?;
        let random = &self.effects.random;
        let preimage = random.random_bytes_64().await;
        let blind_seed = random.random_bytes_64().await;
        let payment_token = Token::from_random(preimage, blind_seed)?;
        let blinded_payment_token = payment_token.blind();

        let spent = self
            .tokens
            .get(1)
            .await?
            .pop()
            .ok_or_else(|| UmbraError::insufficient_tokens(1, 0))?;

        let payload = serde_json::to_string(&Payload {
            transaction_id: &transaction_id,
            creative_instance_id: &request.creative_instance_id,
            confirmation_type: request.confirmation_type.as_str(),
            blinded_payment_tokens: Some([&blinded_payment_token]),
            public_key: Some(&spent.public_key),
            user_data: Some(&user_data),
        })?;
        let signature = spent
            .unblinded_token
            .derive_verification_key()
            .sign(payload.as_bytes())?;
        let credential = encode_credential(&payload, &signature, &spent.unblinded_token)?;

        debug!(
            %transaction_id,
            confirmation_type = %request.confirmation_type,
            "built opted-in confirmation"
        );
        Ok(ConfirmationInfo {
            transaction_id,
            creative_instance_id: request.creative_instance_id,
            confirmation_type: request.confirmation_type,
            ad_type: request.ad_type,
            created_at,
            user_data: Some(user_data),
            reward: Some(RewardCredential {
                unblinded_token: spent.unblinded_token,
                public_key: spent.public_key,
                payment_token,
                blinded_payment_token,
                payload,
                credential,
            }),
            was_created: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuers::parse_issuers;
    use crate::tokens::ConfirmationToken;
    use assert_matches::assert_matches;
    use umbra_core::crypto::SigningKey;
    use umbra_testkit::TestEffects;

    fn request(confirmation_type: ConfirmationType) -> ConfirmationRequest {
        ConfirmationRequest {
            creative_instance_id: CreativeInstanceId::new("creative"),
            confirmation_type,
            ad_type: AdType::Notification,
            segment: "technology & computing-software".to_string(),
            conversion_envelope: None,
        }
    }

    async fn builder(
        harness: &TestEffects,
        key: &SigningKey,
        tokens: u8,
    ) -> (ConfirmationBuilder, TokenLedger) {
        let effects = harness.effects();
        let ledger = TokenLedger::load(effects.storage.clone()).await.unwrap();
        let issued = (1..=tokens)
            .map(|seed| {
                let token = Token::from_random([seed; 64], [seed + 1; 64]).unwrap();
                let signed = key.sign(&token.blind()).unwrap();
                ConfirmationToken {
                    unblinded_token: token.unblind(&signed).unwrap(),
                    public_key: key.public_key(),
                }
            })
            .collect();
        ledger.add(issued).await.unwrap();
        let payment_tokens = PaymentTokens::load(effects.storage.clone()).await.unwrap();
        let builder = ConfirmationBuilder::new(
            &UmbraConfig::default(),
            ledger.clone(),
            payment_tokens,
            effects,
        );
        (builder, ledger)
    }

    #[tokio::test]
    async fn test_opted_in_spends_one_token() {
        let harness = TestEffects::new(4);
        let key = SigningKey::from_random([3; 64]).unwrap();
        let (builder, ledger) = builder(&harness, &key, 2).await;

        let confirmation = builder.build(request(ConfirmationType::Viewed)).await.unwrap();
        assert_eq!(ledger.count().await.unwrap(), 1);
        let user_data = confirmation.user_data.as_ref().unwrap();
        assert_eq!(user_data.country_code, "US");
        assert_eq!(user_data.segment, "technology & computing");

        let reward = confirmation.reward.as_ref().unwrap();
        assert!(reward.payload.contains("blindedPaymentTokens"));
        let decoded = decode_credential(&reward.credential).unwrap();
        assert_eq!(decoded.payload, reward.payload);
    }

    #[tokio::test]
    async fn test_validates_against_published_keys() {
        let harness = TestEffects::new(4);
        let key = SigningKey::from_random([3; 64]).unwrap();
        let (builder, _) = builder(&harness, &key, 1).await;
        let confirmation = builder.build(request(ConfirmationType::Clicked)).await.unwrap();

        let ledger_issuers = parse_issuers(&harness.ledger.issuers_json()).unwrap();
        assert_matches!(
            confirmation.validate(&ledger_issuers),
            Err(UmbraError::UnknownIssuer { .. })
        );

        let mut issuers = ledger_issuers.clone();
        issuers.issuers[0].public_keys[0].public_key = key.public_key();
        confirmation.validate(&issuers).unwrap();

        let mut tampered = confirmation.clone();
        if let Some(reward) = tampered.reward.as_mut() {
            reward.payload.push(' ');
        }
        assert_matches!(
            tampered.validate(&issuers),
            Err(UmbraError::InvalidCredential { .. })
        );
    }

    #[tokio::test]
    async fn test_country_outside_anonymity_set() {
        let harness = TestEffects::new(4);
        harness.platform.set_country_code("LI");
        let key = SigningKey::from_random([3; 64]).unwrap();
        let (builder, _) = builder(&harness, &key, 1).await;

        let user_data = builder.user_data(&request(ConfirmationType::Viewed)).await.unwrap();
        assert_eq!(user_data.country_code, UNKNOWN_COUNTRY_CODE);
    }

    #[tokio::test]
    async fn test_opted_out_carries_nothing() {
        let harness = TestEffects::new(4);
        harness.platform.set_rewards_enabled(false);
        let key = SigningKey::from_random([3; 64]).unwrap();
        let (builder, ledger) = builder(&harness, &key, 1).await;

        let confirmation = builder.build(request(ConfirmationType::Viewed)).await.unwrap();
        assert!(!confirmation.is_opted_in());
        assert!(confirmation.user_data.is_none());
        assert_eq!(ledger.count().await.unwrap(), 1);
        confirmation.validate(&IssuersInfo::default()).unwrap();
        assert!(!confirmation.payload().unwrap().contains("blindedPaymentTokens"));
    }

    #[tokio::test]
    async fn test_empty_ledger_is_insufficient() {
        let harness = TestEffects::new(4);
        let key = SigningKey::from_random([3; 64]).unwrap();
        let (builder, _) = builder(&harness, &key, 0).await;
        assert_matches!(
            builder.build(request(ConfirmationType::Viewed)).await,
            Err(UmbraError::InsufficientTokens { requested: 1, available: 0 })
        );
    }
}
