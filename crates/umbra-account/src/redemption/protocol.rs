//! Ledger calls made by one redemption attempt
//!
//! Opted-in: `POST /v3/confirmation/{tid}/{credential}` with the signed
//! payload, then `GET /v3/confirmation/{tid}/paymentToken` for the signed
//! payment token. Opted-out: `POST /v3/confirmation/{tid}` only.
//!
//! While fetching the payment token, 202 and 404 mean the ledger has not
//! processed the confirmation yet and are retryable.

use serde::Deserialize;
use std::sync::Arc;
use umbra_core::crypto::{BatchDleqProof, PublicKey, SignedToken, UnblindedToken};
use umbra_core::effects::{NetworkEffects, UrlRequest};
use umbra_core::{Result, UmbraError};

use crate::confirmations::ConfirmationInfo;
use crate::http;
use crate::issuers::IssuerStore;

/// The unblinded payment token a redemption produced
#[derive(Debug, Clone, PartialEq)]
pub struct RedeemedPaymentToken {
    /// The token
    pub unblinded_token: UnblindedToken,
    /// Payments issuer key it was signed under
    pub public_key: PublicKey,
    /// Value bucket of that key
    pub value: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedPaymentToken {
    public_key: PublicKey,
    batch_proof: BatchDleqProof,
    signed_tokens: Vec<SignedToken>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentTokenResponse {
    id: String,
    payment_token: SignedPaymentToken,
}

/// Client for the confirmation endpoints
pub struct Redeemer {
    network: Arc<dyn NetworkEffects>,
    issuers: Arc<IssuerStore>,
    base_url: String,
}

impl std::fmt::Debug for Redeemer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redeemer")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Redeemer {
    /// Client against `base_url`
    pub fn new(
        network: Arc<dyn NetworkEffects>,
        issuers: Arc<IssuerStore>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            network,
            issuers,
            base_url: base_url.into(),
        }
    }

    /// Create the confirmation on the ledger
    pub async fn create(&self, confirmation: &ConfirmationInfo) -> Result<()> {
        let path = match &confirmation.reward {
            Some(reward) => format!(
                "/v3/confirmation/{}/{}",
                confirmation.transaction_id, reward.credential
            ),
            None => format!("/v3/confirmation/{}", confirmation.transaction_id),
        };
        let request = UrlRequest::post_json(
            http::endpoint(&self.base_url, &path),
            confirmation.payload()?,
        );
        let response = http::send(self.network.as_ref(), request).await?;
        if !response.is_success() {
            return Err(http::status_error(&response, "create confirmation"));
        }
        Ok(())
    }

    /// Fetch, verify and unblind the payment token of an opted-in confirmation
    pub async fn fetch_payment_token(
        &self,
        confirmation: &ConfirmationInfo,
    ) -> Result<RedeemedPaymentToken> {
        let reward = confirmation
            .reward
            .as_ref()
            .ok_or_else(|| UmbraError::invalid("opted-out confirmations earn no payment token"))?;
        let url = http::endpoint(
            &self.base_url,
            &format!("/v3/confirmation/{}/paymentToken", confirmation.transaction_id),
        );
        let response = http::send(self.network.as_ref(), UrlRequest::get(url)).await?;
        match response.status_code {
            202 | 404 => {
                return Err(UmbraError::server_unavailable(
                    response.status_code,
                    "payment token not ready",
                ))
            }
            _ if !response.is_success() => {
                return Err(http::status_error(&response, "payment token"));
            }
            _ => {}
        }

        let body: PaymentTokenResponse = http::parse_body(&response.body, "payment token")?;
        if body.id != confirmation.transaction_id.to_string() {
            return Err(UmbraError::invalid(format!(
                "payment token for {} returned for {}",
                body.id, confirmation.transaction_id
            )));
        }
        let signed = body.payment_token;
        let value = self
            .issuers
            .current()
            .value
            .payment_value(&signed.public_key)
            .ok_or_else(|| {
                UmbraError::unknown_issuer(format!(
                    "payment token signed under unpublished key {}",
                    signed.public_key
                ))
            })?;
        if signed.signed_tokens.len() != 1 {
            return Err(UmbraError::invalid(format!(
                "expected one signed payment token, got {}",
                signed.signed_tokens.len()
            )));
        }

        let unblinded_token = signed
            .batch_proof
            .verify_and_unblind(
                std::slice::from_ref(&reward.payment_token),
                &signed.signed_tokens,
                &signed.public_key,
            )?
            .pop()
            .ok_or_else(|| UmbraError::invalid("no payment token unblinded"))?;

        Ok(RedeemedPaymentToken {
            unblinded_token,
            public_key: signed.public_key,
            value,
        })
    }
}
