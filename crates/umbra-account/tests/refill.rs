#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use assert_matches::assert_matches;
use std::sync::Arc;
use umbra_account::{IssuerStore, RefillOutcome, TokenLedger, TokenRefill};
use umbra_core::{UmbraConfig, UmbraError};
use umbra_testkit::{LedgerRoute, TestEffects};

struct Harness {
    test: TestEffects,
    tokens: TokenLedger,
    refill: TokenRefill,
}

async fn harness(seed: u64) -> Harness {
    let test = TestEffects::new(seed);
    let config = UmbraConfig::default();
    let effects = test.effects();

    let issuers = Arc::new(IssuerStore::new(config.issuers.clone()));
    issuers
        .fetch(effects.network.as_ref(), &config.endpoints.ledger_base_url)
        .await
        .unwrap();
    let tokens = TokenLedger::load(effects.storage.clone()).await.unwrap();
    let refill = TokenRefill::new(&config, tokens.clone(), issuers, effects, "wallet-1");

    Harness {
        test,
        tokens,
        refill,
    }
}

#[tokio::test]
async fn empty_ledger_fills_to_max() {
    let h = harness(1).await;

    assert_eq!(h.refill.refill(None).await.unwrap(), RefillOutcome::Refilled(50));
    assert_eq!(h.tokens.count().await.unwrap(), 50);
    assert_eq!(h.test.ledger.request_count(LedgerRoute::RequestTokens), 1);
    assert_eq!(h.test.ledger.request_count(LedgerRoute::FetchTokens), 1);
}

#[tokio::test]
async fn below_min_tops_up_to_max() {
    let h = harness(2).await;
    h.refill.refill(None).await.unwrap();
    h.tokens.get(31).await.unwrap();
    assert_eq!(h.tokens.count().await.unwrap(), 19);

    assert_eq!(h.refill.refill(None).await.unwrap(), RefillOutcome::Refilled(31));
    assert_eq!(h.tokens.count().await.unwrap(), 50);
}

#[tokio::test]
async fn at_min_does_nothing() {
    let h = harness(3).await;
    h.refill.refill(None).await.unwrap();
    h.tokens.get(30).await.unwrap();

    assert_eq!(h.refill.refill(None).await.unwrap(), RefillOutcome::NotNeeded);
    assert_eq!(h.tokens.count().await.unwrap(), 20);
    assert_eq!(h.test.ledger.request_count(LedgerRoute::RequestTokens), 1);
}

#[tokio::test]
async fn captcha_then_solution() {
    let h = harness(4).await;
    h.test.ledger.require_captcha("captcha-7");

    assert_eq!(
        h.refill.refill(None).await.unwrap(),
        RefillOutcome::CaptchaRequired("captcha-7".to_string())
    );
    assert_eq!(h.tokens.count().await.unwrap(), 0);
    assert_eq!(h.test.ledger.request_count(LedgerRoute::FetchTokens), 0);

    assert_eq!(
        h.refill.refill(Some("solved")).await.unwrap(),
        RefillOutcome::Refilled(50)
    );
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let h = harness(5).await;
    h.test.ledger.fail_next(LedgerRoute::RequestTokens, 503, 2);
    h.test.ledger.disconnect_next(LedgerRoute::FetchTokens, 1);

    assert_eq!(h.refill.refill(None).await.unwrap(), RefillOutcome::Refilled(50));
    assert_eq!(h.test.ledger.request_count(LedgerRoute::RequestTokens), 3);
    assert_eq!(h.test.ledger.request_count(LedgerRoute::FetchTokens), 2);
}

#[tokio::test]
async fn rejected_request_is_not_retried() {
    let h = harness(6).await;
    h.test.ledger.fail_next(LedgerRoute::RequestTokens, 400, 1);

    assert_matches!(
        h.refill.refill(None).await,
        Err(UmbraError::Rejected { status: 400, .. })
    );
    assert_eq!(h.test.ledger.request_count(LedgerRoute::RequestTokens), 1);
    assert_eq!(h.tokens.count().await.unwrap(), 0);
}

#[tokio::test]
async fn unpublished_signing_key_is_refused() {
    let h = harness(7).await;
    h.test.ledger.sign_with_unknown_key(true);

    assert_matches!(h.refill.refill(None).await, Err(UmbraError::UnknownIssuer { .. }));
    assert_eq!(h.tokens.count().await.unwrap(), 0);
}

#[tokio::test]
async fn bad_batch_proof_is_refused() {
    let h = harness(8).await;
    h.test.ledger.corrupt_next_proof();

    assert_matches!(h.refill.refill(None).await, Err(UmbraError::Crypto { .. }));
    assert_eq!(h.tokens.count().await.unwrap(), 0);

    assert_eq!(h.refill.refill(None).await.unwrap(), RefillOutcome::Refilled(50));
}
