//! Confirmation token refill
//!
//! Below the low-water mark the ledger is topped up to its maximum:
//!
//! 1. generate and blind fresh tokens
//! 2. `POST /v3/confirmation/token/{payment_id}` with the blinded tokens
//!    (and a captcha solution when one was demanded) to obtain a nonce
//! 3. `GET /v3/confirmation/token/{payment_id}?nonce=` for the signed batch
//! 4. verify the batch proof against a published confirmations key,
//!    unblind locally and add the tokens to the ledger
//!
//! Steps 2 and 3 retry transient failures with the configured backoff.
//! Only one refill runs at a time; a caller arriving while another refill
//! is underway waits for it and then usually finds nothing to do.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use umbra_core::config::TokenConfig;
use umbra_core::crypto::{BatchDleqProof, PublicKey, SignedToken, Token};
use umbra_core::effects::UrlRequest;
use umbra_core::{Result, UmbraConfig, UmbraEffects, UmbraError};

use crate::http;
use crate::issuers::IssuerStore;
use crate::tokens::{ConfirmationToken, TokenLedger};

/// Header carrying a solved captcha
pub const CAPTCHA_SOLUTION_HEADER: &str = "captcha-solution";

/// What a refill did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefillOutcome {
    /// This many tokens were added
    Refilled(usize),
    /// The ledger was at or above the low-water mark
    NotNeeded,
    /// The ledger wants a captcha solved first
    CaptchaRequired(String),
}

enum Signing {
    Nonce(String),
    Captcha(String),
}

#[derive(Deserialize)]
struct NonceResponse {
    nonce: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptchaResponse {
    captcha_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedTokensResponse {
    batch_proof: BatchDleqProof,
    signed_tokens: Vec<SignedToken>,
    public_key: PublicKey,
}

/// Refills a [`TokenLedger`] from the ledger service
pub struct TokenRefill {
    ledger: TokenLedger,
    issuers: Arc<IssuerStore>,
    effects: UmbraEffects,
    config: TokenConfig,
    base_url: String,
    payment_id: String,
    running: Mutex<()>,
}

impl std::fmt::Debug for TokenRefill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefill")
            .field("config", &self.config)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TokenRefill {
    /// Refill for the wallet identified by `payment_id`
    pub fn new(
        config: &UmbraConfig,
        ledger: TokenLedger,
        issuers: Arc<IssuerStore>,
        effects: UmbraEffects,
        payment_id: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            issuers,
            effects,
            config: config.tokens.clone(),
            base_url: config.endpoints.ledger_base_url.clone(),
            payment_id: payment_id.into(),
            running: Mutex::new(()),
        }
    }

    /// Top the ledger up if it is below the low-water mark
    pub async fn refill(&self, captcha_solution: Option<&str>) -> Result<RefillOutcome> {
        let _running = self.running.lock().await;

        let held = self.ledger.count().await?;
        if held >= self.config.min_unblinded_tokens {
            debug!(held, "token refill not needed");
            return Ok(RefillOutcome::NotNeeded);
        }
        let needed = self.config.max_unblinded_tokens.saturating_sub(held);
        debug!(held, needed, "refilling confirmation tokens");

        let tokens = self.generate(needed).await?;
        let policy = &self.config.refill_retry;
        let time = self.effects.time.as_ref();
        let random = self.effects.random.as_ref();

        let tokens_ref = &tokens;
        let nonce = match policy
            .execute(time, random, move |_| {
                self.request_signing(tokens_ref, captcha_solution)
            })
            .await?
        {
            Signing::Nonce(nonce) => nonce,
            Signing::Captcha(captcha_id) => {
                info!(%captcha_id, "token refill needs a captcha");
                return Ok(RefillOutcome::CaptchaRequired(captcha_id));
            }
        };

        let nonce_ref = nonce.as_str();
        let signed = policy
            .execute(time, random, move |_| self.fetch_signed(nonce_ref))
            .await?;

        let unblinded = self.verify(&tokens, signed)?;
        let added = self.ledger.add(unblinded).await?;
        info!(added, held = held + added, "refilled confirmation tokens");
        Ok(RefillOutcome::Refilled(added))
    }

    async fn generate(&self, count: usize) -> Result<Vec<Token>> {
        let random = &self.effects.random;
        let mut tokens = Vec::with_capacity(count);
        for _ in 0..count {
            let preimage = random.random_bytes_64().await;
            let blind_seed = random.random_bytes_64().await;
            tokens.push(Token::from_random(preimage, blind_seed)?);
        }
        Ok(tokens)
    }

    fn tokens_url(&self) -> String {
        http::endpoint(
            &self.base_url,
            &format!("/v3/confirmation/token/{}", self.payment_id),
        )
    }

    async fn request_signing(
        &self,
        tokens: &[Token],
        captcha_solution: Option<&str>,
    ) -> Result<Signing> {
        let blinded: Vec<String> = tokens.iter().map(|t| t.blind().encode_base64()).collect();
        let body = json!({ "blindedTokens": blinded }).to_string();
        let mut request = UrlRequest::post_json(self.tokens_url(), body);
        if let Some(solution) = captcha_solution {
            request = request.with_header(CAPTCHA_SOLUTION_HEADER, solution);
        }

        let response = http::send(self.effects.network.as_ref(), request).await?;
        match response.status_code {
            401 => {
                let body: CaptchaResponse = http::parse_body(&response.body, "captcha response")?;
                Ok(Signing::Captcha(body.captcha_id))
            }
            _ if response.is_success() => {
                let body: NonceResponse = http::parse_body(&response.body, "nonce response")?;
                body.nonce
                    .filter(|n| !n.is_empty())
                    .map(Signing::Nonce)
                    .ok_or_else(|| UmbraError::invalid("token request returned no nonce"))
            }
            _ => Err(http::status_error(&response, "token request")),
        }
    }

    async fn fetch_signed(&self, nonce: &str) -> Result<SignedTokensResponse> {
        let url = format!("{}?nonce={nonce}", self.tokens_url());
        let response = http::send(self.effects.network.as_ref(), UrlRequest::get(url)).await?;
        if !response.is_success() {
            return Err(http::status_error(&response, "signed tokens"));
        }
        http::parse_body(&response.body, "signed tokens")
    }

    fn verify(
        &self,
        tokens: &[Token],
        signed: SignedTokensResponse,
    ) -> Result<Vec<ConfirmationToken>> {
        let issuers = self.issuers.current();
        if !issuers.value.is_confirmation_key(&signed.public_key) {
            return Err(UmbraError::unknown_issuer(format!(
                "signed tokens under unpublished key {}",
                signed.public_key
            )));
        }
        if signed.signed_tokens.len() != tokens.len() {
            return Err(UmbraError::invalid(format!(
                "requested {} tokens, {} signed",
                tokens.len(),
                signed.signed_tokens.len()
            )));
        }

        let unblinded = signed.batch_proof.verify_and_unblind(
            tokens,
            &signed.signed_tokens,
            &signed.public_key,
        )?;
        Ok(unblinded
            .into_iter()
            .map(|unblinded_token| ConfirmationToken {
                unblinded_token,
                public_key: signed.public_key,
            })
            .collect())
    }
}
