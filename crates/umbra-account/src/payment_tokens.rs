//! Redeemed payment tokens awaiting payout
//!
//! Each successful opted-in redemption yields one unblinded payment token.
//! They are kept under [`storage_keys::UNBLINDED_PAYMENT_TOKENS`] until the
//! wallet reconciles them, and their per-format totals feed the user data
//! of later confirmations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use umbra_core::crypto::{PublicKey, UnblindedToken};
use umbra_core::effects::storage::{load_json, store_json};
use umbra_core::effects::{storage_keys, StorageEffects};
use umbra_core::{
    AdType, ConfirmationType, OwnedState, PhysicalTime, Result, StateOwner, TransactionId,
};

/// A payment token earned by one confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnblindedPaymentToken {
    /// Confirmation that earned it
    pub transaction_id: TransactionId,
    /// The token
    pub unblinded_token: UnblindedToken,
    /// Payments issuer key it was signed under
    pub public_key: PublicKey,
    /// Lifecycle event
    pub confirmation_type: ConfirmationType,
    /// Ad unit
    pub ad_type: AdType,
    /// When it was redeemed
    pub created_at: PhysicalTime,
}

/// Earned tokens for one ad format and confirmation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTokenTotal {
    /// Ad unit
    pub ad_type: AdType,
    /// Lifecycle event
    pub confirmation_type: ConfirmationType,
    /// Tokens held
    pub count: usize,
}

/// Owner-task state
pub struct PaymentTokensState {
    tokens: Vec<UnblindedPaymentToken>,
    storage: Arc<dyn StorageEffects>,
}

#[async_trait]
impl OwnedState for PaymentTokensState {
    type Checkpoint = Vec<UnblindedPaymentToken>;

    fn name(&self) -> &'static str {
        "unblinded_payment_tokens"
    }

    fn checkpoint(&self) -> Vec<UnblindedPaymentToken> {
        self.tokens.clone()
    }

    fn restore(&mut self, checkpoint: Vec<UnblindedPaymentToken>) {
        self.tokens = checkpoint;
    }

    async fn commit(&mut self) -> Result<()> {
        store_json(
            self.storage.as_ref(),
            storage_keys::UNBLINDED_PAYMENT_TOKENS,
            &self.tokens,
        )
        .await
    }
}

/// Handle to the payment token store
#[derive(Debug, Clone)]
pub struct PaymentTokens {
    owner: StateOwner<PaymentTokensState>,
}

impl PaymentTokens {
    /// Load persisted tokens and start the owner task
    pub async fn load(storage: Arc<dyn StorageEffects>) -> Result<Self> {
        let tokens: Vec<UnblindedPaymentToken> =
            load_json(storage.as_ref(), storage_keys::UNBLINDED_PAYMENT_TOKENS)
                .await?
                .unwrap_or_default();
        debug!(tokens = tokens.len(), "loaded payment tokens");
        Ok(Self {
            owner: StateOwner::spawn(PaymentTokensState { tokens, storage }),
        })
    }

    /// Store a token. A second token for the same transaction is ignored.
    pub async fn add(&self, token: UnblindedPaymentToken) -> Result<bool> {
        self.owner
            .mutate(move |state| {
                if state
                    .tokens
                    .iter()
                    .any(|t| t.transaction_id == token.transaction_id)
                {
                    return false;
                }
                state.tokens.push(token);
                true
            })
            .await
    }

    /// Every token, oldest first
    pub async fn list(&self) -> Result<Vec<UnblindedPaymentToken>> {
        self.owner.read(|state| state.tokens.clone()).await
    }

    /// Tokens held
    pub async fn count(&self) -> Result<usize> {
        self.owner.read(|state| state.tokens.len()).await
    }

    /// Totals by ad format and confirmation type, in a stable order
    pub async fn totals(&self) -> Result<Vec<PaymentTokenTotal>> {
        self.owner
            .read(|state| {
                let mut totals: BTreeMap<(AdType, ConfirmationType), usize> = BTreeMap::new();
                for token in &state.tokens {
                    *totals
                        .entry((token.ad_type, token.confirmation_type))
                        .or_default() += 1;
                }
                totals
                    .into_iter()
                    .map(|((ad_type, confirmation_type), count)| PaymentTokenTotal {
                        ad_type,
                        confirmation_type,
                        count,
                    })
                    .collect()
            })
            .await
    }

    /// Remove tokens the wallet has paid out, returning how many were removed
    pub async fn remove(&self, transaction_ids: Vec<TransactionId>) -> Result<usize> {
        self.owner
            .mutate(move |state| {
                let before = state.tokens.len();
                state
                    .tokens
                    .retain(|t| !transaction_ids.contains(&t.transaction_id));
                before - state.tokens.len()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::crypto::{SigningKey, Token};
    use umbra_effects::MemoryStorageHandler;

    fn payment_token(
        seed: u8,
        ad_type: AdType,
        confirmation_type: ConfirmationType,
    ) -> UnblindedPaymentToken {
        let key = SigningKey::from_random([200; 64]).unwrap();
        let token = Token::from_random([seed; 64], [seed + 1; 64]).unwrap();
        let signed = key.sign(&token.blind()).unwrap();
        UnblindedPaymentToken {
            transaction_id: TransactionId::from_random_bytes([seed; 16]),
            unblinded_token: token.unblind(&signed).unwrap(),
            public_key: key.public_key(),
            confirmation_type,
            ad_type,
            created_at: PhysicalTime::from_ms(u64::from(seed)),
        }
    }

    #[tokio::test]
    async fn test_totals_by_format_and_type() {
        let store = PaymentTokens::load(Arc::new(MemoryStorageHandler::new())).await.unwrap();
        store
            .add(payment_token(1, AdType::Notification, ConfirmationType::Viewed))
            .await
            .unwrap();
        store
            .add(payment_token(2, AdType::Notification, ConfirmationType::Viewed))
            .await
            .unwrap();
        store
            .add(payment_token(3, AdType::NewTabPage, ConfirmationType::Clicked))
            .await
            .unwrap();

        let totals = store.totals().await.unwrap();
        assert_eq!(
            totals,
            vec![
                PaymentTokenTotal {
                    ad_type: AdType::Notification,
                    confirmation_type: ConfirmationType::Viewed,
                    count: 2
                },
                PaymentTokenTotal {
                    ad_type: AdType::NewTabPage,
                    confirmation_type: ConfirmationType::Clicked,
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_one_token_per_transaction() {
        let storage = Arc::new(MemoryStorageHandler::new());
        let store = PaymentTokens::load(storage.clone()).await.unwrap();
        let token = payment_token(5, AdType::Notification, ConfirmationType::Viewed);
        assert!(store.add(token.clone()).await.unwrap());
        assert!(!store.add(token.clone()).await.unwrap());

        let reloaded = PaymentTokens::load(storage).await.unwrap();
        assert_eq!(reloaded.count().await.unwrap(), 1);
        assert_eq!(reloaded.remove(vec![token.transaction_id]).await.unwrap(), 1);
    }
}
