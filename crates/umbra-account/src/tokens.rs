//! Confirmation token ledger
//!
//! Holds the unblinded tokens a confirmation spends. The ledger is owned by
//! one [`StateOwner`] task and persisted under
//! [`storage_keys::UNBLINDED_TOKENS`] after every mutation. A token handed
//! out by [`TokenLedger::get`] is remembered as spent and never accepted
//! back. Spent entries are forgotten together with their issuer key, since
//! refill refuses tokens of retired keys.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use umbra_core::crypto::hash::sha256;
use umbra_core::crypto::{PublicKey, UnblindedToken};
use umbra_core::effects::storage::{load_json, store_json};
use umbra_core::effects::{storage_keys, StorageEffects};
use umbra_core::{OwnedState, Result, StateOwner, UmbraError};

/// An unblinded token and the issuer key that signed it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmationToken {
    /// The spendable token
    pub unblinded_token: UnblindedToken,
    /// Confirmations issuer key the token was signed under
    pub public_key: PublicKey,
}

impl ConfirmationToken {
    fn fingerprint(&self) -> String {
        hex::encode(sha256(&self.unblinded_token.to_bytes()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpentToken {
    fingerprint: String,
    public_key: PublicKey,
}

/// Held tokens and spent fingerprints, as stored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedTokens {
    tokens: Vec<ConfirmationToken>,
    spent: Vec<SpentToken>,
}

/// Owner-task state
pub struct TokenLedgerState {
    persisted: PersistedTokens,
    storage: Arc<dyn StorageEffects>,
}

#[async_trait]
impl OwnedState for TokenLedgerState {
    type Checkpoint = PersistedTokens;

    fn name(&self) -> &'static str {
        "unblinded_tokens"
    }

    fn checkpoint(&self) -> PersistedTokens {
        self.persisted.clone()
    }

    fn restore(&mut self, checkpoint: PersistedTokens) {
        self.persisted = checkpoint;
    }

    async fn commit(&mut self) -> Result<()> {
        store_json(
            self.storage.as_ref(),
            storage_keys::UNBLINDED_TOKENS,
            &self.persisted,
        )
        .await
    }
}

impl TokenLedgerState {
    fn add(&mut self, tokens: Vec<ConfirmationToken>) -> usize {
        let spent: HashSet<&str> = self
            .persisted
            .spent
            .iter()
            .map(|spent| spent.fingerprint.as_str())
            .collect();
        let mut held: HashSet<String> =
            self.persisted.tokens.iter().map(ConfirmationToken::fingerprint).collect();
        let mut admitted = Vec::new();
        for token in tokens {
            let fingerprint = token.fingerprint();
            if spent.contains(fingerprint.as_str()) || !held.insert(fingerprint) {
                continue;
            }
            admitted.push(token);
        }
        let added = admitted.len();
        self.persisted.tokens.extend(admitted);
        added
    }

    fn get(&mut self, count: usize) -> Result<Vec<ConfirmationToken>> {
        let available = self.persisted.tokens.len();
        if count > available {
            return Err(UmbraError::insufficient_tokens(count, available));
        }
        let taken: Vec<ConfirmationToken> = self.persisted.tokens.drain(..count).collect();
        self.persisted.spent.extend(taken.iter().map(|token| SpentToken {
            fingerprint: token.fingerprint(),
            public_key: token.public_key,
        }));
        Ok(taken)
    }
}

/// Handle to the token ledger
#[derive(Debug, Clone)]
pub struct TokenLedger {
    owner: StateOwner<TokenLedgerState>,
}

impl TokenLedger {
    /// Load persisted tokens and start the owner task
    pub async fn load(storage: Arc<dyn StorageEffects>) -> Result<Self> {
        let persisted: PersistedTokens =
            load_json(storage.as_ref(), storage_keys::UNBLINDED_TOKENS)
                .await?
                .unwrap_or_default();
        debug!(tokens = persisted.tokens.len(), "loaded confirmation tokens");
        Ok(Self {
            owner: StateOwner::spawn(TokenLedgerState { persisted, storage }),
        })
    }

    /// Tokens held
    pub async fn count(&self) -> Result<usize> {
        self.owner.read(|state| state.persisted.tokens.len()).await
    }

    /// Spent tokens still remembered
    pub async fn spent_count(&self) -> Result<usize> {
        self.owner.read(|state| state.persisted.spent.len()).await
    }

    /// Every held token, oldest first
    pub async fn all(&self) -> Result<Vec<ConfirmationToken>> {
        self.owner.read(|state| state.persisted.tokens.clone()).await
    }

    /// Remove and return the `count` oldest tokens. Fails with
    /// `InsufficientTokens` and leaves the ledger untouched if fewer are held.
    pub async fn get(&self, count: usize) -> Result<Vec<ConfirmationToken>> {
        self.owner.try_mutate(move |state| state.get(count)).await
    }

    /// Add tokens, skipping any already held or already spent. Returns how
    /// many were added.
    pub async fn add(&self, tokens: Vec<ConfirmationToken>) -> Result<usize> {
        self.owner.mutate(move |state| state.add(tokens)).await
    }

    /// Drop one token without spending it
    pub async fn remove_token(&self, token: &UnblindedToken) -> Result<bool> {
        let token = token.clone();
        self.owner
            .mutate(move |state| {
                let before = state.persisted.tokens.len();
                state.persisted.tokens.retain(|t| t.unblinded_token != token);
                before != state.persisted.tokens.len()
            })
            .await
    }

    /// Drop tokens signed under keys no longer published, returning how many
    /// were removed. Spent entries of those keys are forgotten as well.
    pub async fn remove_tokens_not_in(&self, public_keys: HashSet<PublicKey>) -> Result<usize> {
        let removed = self
            .owner
            .mutate(move |state| {
                let before = state.persisted.tokens.len();
                state
                    .persisted
                    .tokens
                    .retain(|t| public_keys.contains(&t.public_key));
                state
                    .persisted
                    .spent
                    .retain(|spent| public_keys.contains(&spent.public_key));
                before - state.persisted.tokens.len()
            })
            .await?;
        if removed > 0 {
            debug!(removed, "dropped tokens from retired issuer keys");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use umbra_core::crypto::{SigningKey, Token};
    use umbra_effects::MemoryStorageHandler;
    use umbra_testkit::FaultyStorage;

    fn issued(key: &SigningKey, seeds: impl IntoIterator<Item = u8>) -> Vec<ConfirmationToken> {
        seeds
            .into_iter()
            .map(|seed| {
                let token = Token::from_random([seed; 64], [seed.wrapping_add(1); 64]).unwrap();
                let signed = key.sign(&token.blind()).unwrap();
                ConfirmationToken {
                    unblinded_token: token.unblind(&signed).unwrap(),
                    public_key: key.public_key(),
                }
            })
            .collect()
    }

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_random([seed; 64]).unwrap()
    }

    #[tokio::test]
    async fn test_get_is_all_or_nothing() {
        let ledger = TokenLedger::load(Arc::new(MemoryStorageHandler::new())).await.unwrap();
        ledger.add(issued(&key(1), 1..=3)).await.unwrap();

        assert_matches!(
            ledger.get(4).await,
            Err(UmbraError::InsufficientTokens { requested: 4, available: 3 })
        );
        assert_eq!(ledger.count().await.unwrap(), 3);
        assert_eq!(ledger.get(2).await.unwrap().len(), 2);
        assert_eq!(ledger.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_is_idempotent_and_refuses_spent() {
        let ledger = TokenLedger::load(Arc::new(MemoryStorageHandler::new())).await.unwrap();
        let tokens = issued(&key(1), 1..=2);
        assert_eq!(ledger.add(tokens.clone()).await.unwrap(), 2);
        assert_eq!(ledger.add(tokens.clone()).await.unwrap(), 0);

        let spent = ledger.get(1).await.unwrap();
        assert_eq!(ledger.add(spent).await.unwrap(), 0);
        assert_eq!(ledger.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_tokens_not_in() {
        let ledger = TokenLedger::load(Arc::new(MemoryStorageHandler::new())).await.unwrap();
        let current = key(1);
        let retired = key(2);
        ledger.add(issued(&current, 1..=2)).await.unwrap();
        ledger.add(issued(&retired, 10..=12)).await.unwrap();

        let keep = HashSet::from([current.public_key()]);
        assert_eq!(ledger.remove_tokens_not_in(keep).await.unwrap(), 3);
        assert_eq!(ledger.count().await.unwrap(), 2);

        let first = ledger.all().await.unwrap()[0].unblinded_token.clone();
        assert!(ledger.remove_token(&first).await.unwrap());
        assert!(!ledger.remove_token(&first).await.unwrap());
    }

    #[tokio::test]
    async fn test_retired_keys_forget_spent_tokens() {
        let ledger = TokenLedger::load(Arc::new(MemoryStorageHandler::new())).await.unwrap();
        let current = key(1);
        let retired = key(2);
        ledger.add(issued(&retired, 1..=2)).await.unwrap();
        ledger.get(2).await.unwrap();
        ledger.add(issued(&current, 5..=6)).await.unwrap();
        ledger.get(1).await.unwrap();
        assert_eq!(ledger.spent_count().await.unwrap(), 3);

        let keep = HashSet::from([current.public_key()]);
        ledger.remove_tokens_not_in(keep).await.unwrap();
        assert_eq!(ledger.spent_count().await.unwrap(), 1);
        // spent under a current key is still refused
        assert_eq!(ledger.add(issued(&current, 5..=5)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_tokens() {
        let storage = Arc::new(FaultyStorage::new());
        let ledger = TokenLedger::load(storage.clone()).await.unwrap();
        ledger.add(issued(&key(1), 1..=3)).await.unwrap();

        storage.fail_writes(storage_keys::UNBLINDED_TOKENS, 1);
        assert_matches!(ledger.get(2).await, Err(UmbraError::Storage { .. }));
        assert_eq!(ledger.count().await.unwrap(), 3);
        assert_eq!(ledger.spent_count().await.unwrap(), 0);

        let tokens = ledger.get(3).await.unwrap();
        assert_eq!(tokens.len(), 3);
    }

    #[tokio::test]
    async fn test_persists_across_reload() {
        let storage = Arc::new(MemoryStorageHandler::new());
        let ledger = TokenLedger::load(storage.clone()).await.unwrap();
        let tokens = issued(&key(1), 1..=3);
        ledger.add(tokens.clone()).await.unwrap();
        let spent = ledger.get(1).await.unwrap();

        let reloaded = TokenLedger::load(storage).await.unwrap();
        assert_eq!(reloaded.count().await.unwrap(), 2);
        assert_eq!(reloaded.add(spent).await.unwrap(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(Vec<u8>),
        Get(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(0u8..24, 0..6).prop_map(Op::Add),
            (0usize..4).prop_map(Op::Get),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_no_token_is_handed_out_twice(ops in prop::collection::vec(op(), 1..20)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let signer = key(9);
                let ledger =
                    TokenLedger::load(Arc::new(MemoryStorageHandler::new())).await.unwrap();
                let mut handed_out = HashSet::new();
                for op in ops {
                    match op {
                        Op::Add(seeds) => {
                            ledger.add(issued(&signer, seeds)).await.unwrap();
                        }
                        Op::Get(n) => {
                            if let Ok(tokens) = ledger.get(n).await {
                                for token in tokens {
                                    assert!(handed_out.insert(token.unblinded_token));
                                }
                            }
                        }
                    }
                }
            });
        }
    }
}
