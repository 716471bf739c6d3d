//! In-process confirmation ledger
//!
//! Speaks the same routes as the anonymous confirmation service:
//!
//! | Route | Method | Path under `/v3` |
//! |-------|--------|------------------|
//! | [`LedgerRoute::Issuers`] | GET | `/issuers/` |
//! | [`LedgerRoute::RequestTokens`] | POST | `/confirmation/token/{payment_id}` |
//! | [`LedgerRoute::FetchTokens`] | GET | `/confirmation/token/{payment_id}?nonce=` |
//! | [`LedgerRoute::CreateConfirmation`] | POST | `/confirmation/{tid}[/{credential}]` |
//! | [`LedgerRoute::FetchPaymentToken`] | GET | `/confirmation/{tid}/paymentToken` |
//!
//! Tokens are signed with real issuer keys and every batch carries a valid
//! DLEQ proof unless a test asks otherwise. Credentials are checked by
//! re-deriving the spent token from its pre-image.

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use umbra_core::crypto::{
    BatchDleqProof, BlindedToken, PublicKey, SignedToken, SigningKey, TokenPreimage,
    VerificationSignature,
};
use umbra_core::effects::{NetworkEffects, NetworkError, UrlMethod, UrlRequest, UrlResponse};

/// Ledger endpoints, for scripting failures and counting requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerRoute {
    /// Issuer public keys
    Issuers,
    /// Submit blinded confirmation tokens for signing
    RequestTokens,
    /// Collect signed confirmation tokens
    FetchTokens,
    /// Create a confirmation
    CreateConfirmation,
    /// Collect the signed payment token for a confirmation
    FetchPaymentToken,
}

#[derive(Debug, Clone, Copy)]
enum Scripted {
    Status(u16),
    Disconnect,
    Stall(u64),
}

#[derive(Debug, Default)]
struct ConfirmationRecord {
    blinded_payment_tokens: Vec<BlindedToken>,
}

struct LedgerState {
    rng: ChaCha20Rng,
    nonces: HashMap<String, Vec<BlindedToken>>,
    captcha_id: Option<String>,
    scripted: HashMap<LedgerRoute, VecDeque<Scripted>>,
    payment_token_not_ready: usize,
    confirmations: HashMap<String, ConfirmationRecord>,
    spent: HashSet<TokenPreimage>,
    requests: Vec<LedgerRoute>,
    payment_token_fetches: HashMap<String, usize>,
    corrupt_next_proof: bool,
    sign_with_unknown_key: bool,
    sign_payments_with_unknown_key: bool,
}

impl LedgerState {
    fn seed64(&mut self) -> [u8; 64] {
        let mut seed = [0u8; 64];
        self.rng.fill_bytes(&mut seed);
        seed
    }
}

/// A scriptable ledger implementing [`NetworkEffects`]
pub struct MockLedger {
    confirmation_key: SigningKey,
    payment_key: SigningKey,
    unknown_key: SigningKey,
    state: Mutex<LedgerState>,
}

impl std::fmt::Debug for MockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLedger")
            .field("confirmation_key", &self.confirmation_key.public_key())
            .field("payment_key", &self.payment_key.public_key())
            .finish_non_exhaustive()
    }
}

fn response(status: u16, body: Value) -> UrlResponse {
    UrlResponse::new(status, body.to_string())
}

fn bad_request(message: &str) -> UrlResponse {
    response(400, json!({ "message": message }))
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .ok()
}

fn blinded_tokens(value: &Value, field: &str) -> Option<Vec<BlindedToken>> {
    value
        .get(field)?
        .as_array()?
        .iter()
        .map(|token| BlindedToken::decode_base64(token.as_str()?).ok())
        .collect()
}

impl MockLedger {
    /// Ledger with keys derived from `seed`
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut key = || {
            let mut bytes = [0u8; 64];
            rng.fill_bytes(&mut bytes);
            SigningKey::from_random(bytes).expect("seeded key")
        };
        let confirmation_key = key();
        let payment_key = key();
        let unknown_key = key();

        Self {
            confirmation_key,
            payment_key,
            unknown_key,
            state: Mutex::new(LedgerState {
                rng: ChaCha20Rng::seed_from_u64(seed.wrapping_add(1)),
                nonces: HashMap::new(),
                captcha_id: None,
                scripted: HashMap::new(),
                payment_token_not_ready: 0,
                confirmations: HashMap::new(),
                spent: HashSet::new(),
                requests: Vec::new(),
                payment_token_fetches: HashMap::new(),
                corrupt_next_proof: false,
                sign_with_unknown_key: false,
                sign_payments_with_unknown_key: false,
            }),
        }
    }

    /// Public key signing confirmation tokens
    pub fn confirmation_public_key(&self) -> PublicKey {
        self.confirmation_key.public_key()
    }

    /// Public key signing payment tokens
    pub fn payment_public_key(&self) -> PublicKey {
        self.payment_key.public_key()
    }

    /// A key the ledger never publishes
    pub fn unknown_public_key(&self) -> PublicKey {
        self.unknown_key.public_key()
    }

    /// Issuers document as served on `/v3/issuers/`
    pub fn issuers_json(&self) -> String {
        self.issuers_body().to_string()
    }

    fn issuers_body(&self) -> Value {
        json!({
            "ping": 7_200_000,
            "issuers": [
                {
                    "name": "confirmations",
                    "publicKeys": [
                        {
                            "publicKey": self.confirmation_public_key().encode_base64(),
                            "associatedValue": ""
                        }
                    ]
                },
                {
                    "name": "payments",
                    "publicKeys": [
                        {
                            "publicKey": self.payment_public_key().encode_base64(),
                            "associatedValue": "0.1"
                        }
                    ]
                }
            ]
        })
    }

    /// Demand a captcha solution on token requests until one is supplied
    pub fn require_captcha(&self, captcha_id: &str) {
        self.state.lock().captcha_id = Some(captcha_id.to_string());
    }

    /// Answer the next `times` requests on `route` with `status`
    pub fn fail_next(&self, route: LedgerRoute, status: u16, times: usize) {
        let mut state = self.state.lock();
        let queue = state.scripted.entry(route).or_default();
        queue.extend(std::iter::repeat(Scripted::Status(status)).take(times));
    }

    /// Fail the next `times` requests on `route` at the transport level
    pub fn disconnect_next(&self, route: LedgerRoute, times: usize) {
        let mut state = self.state.lock();
        let queue = state.scripted.entry(route).or_default();
        queue.extend(std::iter::repeat(Scripted::Disconnect).take(times));
    }

    /// Hold the next `times` requests on `route` for `delay_ms` of tokio time
    /// before answering them normally
    pub fn stall_next(&self, route: LedgerRoute, delay_ms: u64, times: usize) {
        let mut state = self.state.lock();
        let queue = state.scripted.entry(route).or_default();
        queue.extend(std::iter::repeat(Scripted::Stall(delay_ms)).take(times));
    }

    /// Answer the next `times` payment token fetches with 202
    pub fn payment_token_not_ready(&self, times: usize) {
        self.state.lock().payment_token_not_ready = times;
    }

    /// Break the batch proof of the next signed batch
    pub fn corrupt_next_proof(&self) {
        self.state.lock().corrupt_next_proof = true;
    }

    /// Sign confirmation tokens with an unpublished key
    pub fn sign_with_unknown_key(&self, enabled: bool) {
        self.state.lock().sign_with_unknown_key = enabled;
    }

    /// Sign payment tokens with an unpublished key
    pub fn sign_payments_with_unknown_key(&self, enabled: bool) {
        self.state.lock().sign_payments_with_unknown_key = enabled;
    }

    /// Requests received on `route`
    pub fn request_count(&self, route: LedgerRoute) -> usize {
        self.state.lock().requests.iter().filter(|r| **r == route).count()
    }

    /// Confirmations created
    pub fn confirmation_count(&self) -> usize {
        self.state.lock().confirmations.len()
    }

    /// Successful payment token fetches for a transaction
    pub fn payment_token_fetches(&self, transaction_id: &str) -> usize {
        self.state
            .lock()
            .payment_token_fetches
            .get(transaction_id)
            .copied()
            .unwrap_or(0)
    }

    /// Token pre-images spent by confirmations
    pub fn spent_token_count(&self) -> usize {
        self.state.lock().spent.len()
    }

    fn route(method: UrlMethod, url: &str) -> Option<(LedgerRoute, Vec<String>, Option<String>)> {
        let (_, rest) = url.split_once("/v3/")?;
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (rest, None),
        };
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let names: Vec<&str> = segments.iter().map(String::as_str).collect();

        let route = match (method, names.as_slice()) {
            (UrlMethod::Get, ["issuers"]) => LedgerRoute::Issuers,
            (UrlMethod::Post, ["confirmation", "token", _]) => LedgerRoute::RequestTokens,
            (UrlMethod::Get, ["confirmation", "token", _]) => LedgerRoute::FetchTokens,
            (UrlMethod::Get, ["confirmation", _, "paymentToken"]) => LedgerRoute::FetchPaymentToken,
            (UrlMethod::Post, ["confirmation", _]) | (UrlMethod::Post, ["confirmation", _, _]) => {
                LedgerRoute::CreateConfirmation
            }
            _ => return None,
        };
        Some((route, segments, query))
    }

    fn sign_batch(
        state: &mut LedgerState,
        key: &SigningKey,
        blinded: &[BlindedToken],
    ) -> Option<(Vec<SignedToken>, BatchDleqProof)> {
        let signed: Vec<SignedToken> = blinded
            .iter()
            .map(|token| key.sign(token))
            .collect::<Result<_, _>>()
            .ok()?;
        let seed = state.seed64();
        let proof = BatchDleqProof::new(blinded, &signed, key, seed).ok()?;
        if std::mem::take(&mut state.corrupt_next_proof) {
            // a proof for a longer batch never verifies against this one
            let first = *blinded.first()?;
            let mut blinded_other = blinded.to_vec();
            blinded_other.push(first);
            let mut signed_other = signed.clone();
            signed_other.push(key.sign(&first).ok()?);
            let seed = state.seed64();
            let bogus = BatchDleqProof::new(&blinded_other, &signed_other, key, seed).ok()?;
            return Some((signed, bogus));
        }
        Some((signed, proof))
    }

    fn request_tokens(&self, state: &mut LedgerState, request: &UrlRequest) -> UrlResponse {
        if let Some(captcha_id) = state.captcha_id.clone() {
            if request.headers.contains_key("captcha-solution") {
                state.captcha_id = None;
            } else {
                return response(401, json!({ "captchaId": captcha_id }));
            }
        }
        let Some(body) = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_str::<Value>(b).ok())
        else {
            return bad_request("missing body");
        };
        let Some(tokens) = blinded_tokens(&body, "blindedTokens") else {
            return bad_request("bad blinded tokens");
        };
        let nonce = format!("{:016x}{:016x}", state.rng.next_u64(), state.rng.next_u64());
        state.nonces.insert(nonce.clone(), tokens);
        response(201, json!({ "nonce": nonce }))
    }

    fn fetch_tokens(&self, state: &mut LedgerState, query: Option<&str>) -> UrlResponse {
        let Some(nonce) = query.and_then(|q| q.strip_prefix("nonce=")) else {
            return bad_request("missing nonce");
        };
        let Some(blinded) = state.nonces.get(nonce).cloned() else {
            return response(404, json!({ "message": "unknown nonce" }));
        };
        let key = if state.sign_with_unknown_key {
            &self.unknown_key
        } else {
            &self.confirmation_key
        };
        let Some((signed, proof)) = Self::sign_batch(state, key, &blinded) else {
            return response(500, json!({ "message": "signing failed" }));
        };
        response(
            200,
            json!({
                "batchProof": proof.encode_base64(),
                "signedTokens": signed.iter().map(SignedToken::encode_base64).collect::<Vec<_>>(),
                "publicKey": key.public_key().encode_base64(),
            }),
        )
    }

    fn verify_credential(
        &self,
        state: &mut LedgerState,
        credential: &str,
    ) -> Result<(), &'static str> {
        let bytes = decode_segment(credential).ok_or("credential is not base64")?;
        let envelope: Value = serde_json::from_slice(&bytes).map_err(|_| "credential is not json")?;
        let field = |name: &str| envelope.get(name).and_then(Value::as_str).map(str::to_string);
        let payload = field("payload").ok_or("missing payload")?;
        let signature = field("signature")
            .and_then(|s| VerificationSignature::decode_base64(&s).ok())
            .ok_or("bad signature")?;
        let preimage = field("t")
            .and_then(|t| TokenPreimage::decode_base64(&t).ok())
            .ok_or("bad token")?;

        let token = self.confirmation_key.rederive_unblinded_token(&preimage);
        if !token
            .derive_verification_key()
            .verify(&signature, payload.as_bytes())
        {
            return Err("signature does not verify");
        }
        if !state.spent.insert(preimage) {
            return Err("token already spent");
        }
        Ok(())
    }

    fn create_confirmation(
        &self,
        state: &mut LedgerState,
        segments: &[String],
        request: &UrlRequest,
    ) -> UrlResponse {
        let transaction_id = segments[1].clone();
        if state.confirmations.contains_key(&transaction_id) {
            return response(201, json!({ "id": transaction_id }));
        }
        let body: Value = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_str(b).ok())
            .unwrap_or(Value::Null);

        let mut record = ConfirmationRecord::default();
        if let Some(credential) = segments.get(2) {
            if let Err(message) = self.verify_credential(state, credential) {
                return bad_request(message);
            }
            let Some(tokens) = blinded_tokens(&body, "blindedPaymentTokens") else {
                return bad_request("bad blinded payment tokens");
            };
            record.blinded_payment_tokens = tokens;
        }
        state.confirmations.insert(transaction_id.clone(), record);
        response(201, json!({ "id": transaction_id }))
    }

    fn fetch_payment_token(&self, state: &mut LedgerState, segments: &[String]) -> UrlResponse {
        let transaction_id = segments[1].clone();
        let Some(blinded) = state
            .confirmations
            .get(&transaction_id)
            .map(|r| r.blinded_payment_tokens.clone())
        else {
            return response(404, json!({ "message": "unknown confirmation" }));
        };
        if blinded.is_empty() {
            return response(404, json!({ "message": "no payment token" }));
        }
        if state.payment_token_not_ready > 0 {
            state.payment_token_not_ready -= 1;
            return response(202, json!({ "id": transaction_id }));
        }
        let key = if state.sign_payments_with_unknown_key {
            &self.unknown_key
        } else {
            &self.payment_key
        };
        let Some((signed, proof)) = Self::sign_batch(state, key, &blinded) else {
            return response(500, json!({ "message": "signing failed" }));
        };
        *state
            .payment_token_fetches
            .entry(transaction_id.clone())
            .or_default() += 1;
        response(
            200,
            json!({
                "id": transaction_id,
                "paymentToken": {
                    "publicKey": key.public_key().encode_base64(),
                    "batchProof": proof.encode_base64(),
                    "signedTokens":
                        signed.iter().map(SignedToken::encode_base64).collect::<Vec<_>>(),
                }
            }),
        )
    }
}

#[async_trait]
impl NetworkEffects for MockLedger {
    async fn send(&self, request: UrlRequest) -> Result<UrlResponse, NetworkError> {
        let Some((route, segments, query)) = Self::route(request.method, &request.url) else {
            return Ok(response(404, json!({ "message": "no such route" })));
        };

        let scripted = {
            let mut state = self.state.lock();
            state.requests.push(route);
            state.scripted.get_mut(&route).and_then(VecDeque::pop_front)
        };
        match scripted {
            Some(Scripted::Status(status)) => return Ok(UrlResponse::new(status, "")),
            Some(Scripted::Disconnect) => {
                return Err(NetworkError::ConnectionFailed("scripted disconnect".into()))
            }
            Some(Scripted::Stall(delay_ms)) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            None => {}
        }

        let mut state = self.state.lock();
        let response = match route {
            LedgerRoute::Issuers => response(200, self.issuers_body()),
            LedgerRoute::RequestTokens => self.request_tokens(&mut state, &request),
            LedgerRoute::FetchTokens => self.fetch_tokens(&mut state, query.as_deref()),
            LedgerRoute::CreateConfirmation => {
                self.create_confirmation(&mut state, &segments, &request)
            }
            LedgerRoute::FetchPaymentToken => self.fetch_payment_token(&mut state, &segments),
        };
        tracing::trace!(?route, status = response.status_code, "mock ledger responded");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::crypto::Token;

    fn tokens(n: u8) -> Vec<Token> {
        (0..n)
            .map(|i| Token::from_random([i + 1; 64], [i + 100; 64]).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_token_batch_verifies() {
        let ledger = MockLedger::new(9);
        let tokens = tokens(3);
        let blinded: Vec<String> = tokens.iter().map(|t| t.blind().encode_base64()).collect();

        let created = ledger
            .send(UrlRequest::post_json(
                "https://ledger.test/v3/confirmation/token/wallet",
                json!({ "blindedTokens": blinded }).to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(created.status_code, 201);
        let nonce = serde_json::from_str::<Value>(&created.body).unwrap()["nonce"]
            .as_str()
            .unwrap()
            .to_string();

        let fetched = ledger
            .send(UrlRequest::get(format!(
                "https://ledger.test/v3/confirmation/token/wallet?nonce={nonce}"
            )))
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&fetched.body).unwrap();
        let proof = BatchDleqProof::decode_base64(body["batchProof"].as_str().unwrap()).unwrap();
        let signed: Vec<SignedToken> = body["signedTokens"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| SignedToken::decode_base64(s.as_str().unwrap()).unwrap())
            .collect();
        let unblinded = proof
            .verify_and_unblind(&tokens, &signed, &ledger.confirmation_public_key())
            .unwrap();
        assert_eq!(unblinded.len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_failures_and_captcha() {
        let ledger = MockLedger::new(1);
        ledger.fail_next(LedgerRoute::Issuers, 503, 1);
        let url = "https://ledger.test/v3/issuers/";
        assert_eq!(ledger.send(UrlRequest::get(url)).await.unwrap().status_code, 503);
        assert_eq!(ledger.send(UrlRequest::get(url)).await.unwrap().status_code, 200);

        ledger.require_captcha("captcha-1");
        let request = UrlRequest::post_json(
            "https://ledger.test/v3/confirmation/token/wallet",
            json!({ "blindedTokens": [] }).to_string(),
        );
        assert_eq!(ledger.send(request.clone()).await.unwrap().status_code, 401);
        let solved = request.with_header("captcha-solution", "solution");
        assert_eq!(ledger.send(solved).await.unwrap().status_code, 201);
        assert_eq!(ledger.request_count(LedgerRoute::RequestTokens), 2);
    }
}
