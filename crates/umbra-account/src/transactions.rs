//! Transaction history
//!
//! One [`TransactionInfo`] per redeemed opted-in confirmation, valued by
//! the payments issuer bucket of its payment token. Transactions start
//! unreconciled and are marked reconciled once the wallet confirms payout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use umbra_core::effects::storage::{load_json, store_json};
use umbra_core::effects::{storage_keys, StorageEffects};
use umbra_core::{
    AdType, ConfirmationType, CreativeInstanceId, OwnedState, PhysicalTime, Result, StateOwner,
    TransactionId,
};

/// One earned transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Confirmation transaction id
    pub id: TransactionId,
    /// Creative the confirmation was for
    pub creative_instance_id: CreativeInstanceId,
    /// Payout value
    pub value: f64,
    /// Ad unit
    pub ad_type: AdType,
    /// Lifecycle event
    pub confirmation_type: ConfirmationType,
    /// When it was earned
    pub created_at: PhysicalTime,
    /// When payout was confirmed
    pub reconciled_at: Option<PhysicalTime>,
}

impl TransactionInfo {
    /// Whether payout has been confirmed
    pub fn is_reconciled(&self) -> bool {
        self.reconciled_at.is_some()
    }
}

/// Owner-task state
pub struct TransactionsState {
    transactions: Vec<TransactionInfo>,
    storage: Arc<dyn StorageEffects>,
}

#[async_trait]
impl OwnedState for TransactionsState {
    type Checkpoint = Vec<TransactionInfo>;

    fn name(&self) -> &'static str {
        "transactions"
    }

    fn checkpoint(&self) -> Vec<TransactionInfo> {
        self.transactions.clone()
    }

    fn restore(&mut self, checkpoint: Vec<TransactionInfo>) {
        self.transactions = checkpoint;
    }

    async fn commit(&mut self) -> Result<()> {
        store_json(
            self.storage.as_ref(),
            storage_keys::TRANSACTIONS,
            &self.transactions,
        )
        .await
    }
}

/// Handle to the transaction history
#[derive(Debug, Clone)]
pub struct Transactions {
    owner: StateOwner<TransactionsState>,
}

impl Transactions {
    /// Load persisted history and start the owner task
    pub async fn load(storage: Arc<dyn StorageEffects>) -> Result<Self> {
        let transactions: Vec<TransactionInfo> =
            load_json(storage.as_ref(), storage_keys::TRANSACTIONS)
                .await?
                .unwrap_or_default();
        debug!(transactions = transactions.len(), "loaded transactions");
        Ok(Self {
            owner: StateOwner::spawn(TransactionsState {
                transactions,
                storage,
            }),
        })
    }

    /// Record a transaction; a repeated id is ignored
    pub async fn add(&self, transaction: TransactionInfo) -> Result<bool> {
        self.owner
            .mutate(move |state| {
                if state.transactions.iter().any(|t| t.id == transaction.id) {
                    return false;
                }
                state.transactions.push(transaction);
                true
            })
            .await
    }

    /// Every transaction, oldest first
    pub async fn list(&self) -> Result<Vec<TransactionInfo>> {
        self.owner.read(|state| state.transactions.clone()).await
    }

    /// Transactions awaiting payout
    pub async fn unreconciled(&self) -> Result<Vec<TransactionInfo>> {
        self.owner
            .read(|state| {
                state
                    .transactions
                    .iter()
                    .filter(|t| !t.is_reconciled())
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Mark transactions reconciled at `at`, returning how many changed
    pub async fn reconcile(&self, ids: Vec<TransactionId>, at: PhysicalTime) -> Result<usize> {
        self.owner
            .mutate(move |state| {
                let mut changed = 0;
                for transaction in state
                    .transactions
                    .iter_mut()
                    .filter(|t| !t.is_reconciled() && ids.contains(&t.id))
                {
                    transaction.reconciled_at = Some(at);
                    changed += 1;
                }
                changed
            })
            .await
    }

    /// Value earned in `[from, to)`
    pub async fn earnings_between(&self, from: PhysicalTime, to: PhysicalTime) -> Result<f64> {
        self.owner
            .read(move |state| {
                state
                    .transactions
                    .iter()
                    .filter(|t| t.created_at >= from && t.created_at < to)
                    .map(|t| t.value)
                    .sum()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_effects::MemoryStorageHandler;

    fn transaction(seed: u8, at: u64, value: f64) -> TransactionInfo {
        TransactionInfo {
            id: TransactionId::from_random_bytes([seed; 16]),
            creative_instance_id: CreativeInstanceId::new("creative"),
            value,
            ad_type: AdType::Notification,
            confirmation_type: ConfirmationType::Viewed,
            created_at: PhysicalTime::from_ms(at),
            reconciled_at: None,
        }
    }

    #[tokio::test]
    async fn test_reconcile_and_earnings() {
        let history = Transactions::load(Arc::new(MemoryStorageHandler::new())).await.unwrap();
        let first = transaction(1, 100, 0.5);
        history.add(first.clone()).await.unwrap();
        history.add(transaction(2, 200, 0.25)).await.unwrap();
        assert!(!history.add(first.clone()).await.unwrap());

        let earned = history
            .earnings_between(PhysicalTime::from_ms(0), PhysicalTime::from_ms(150))
            .await
            .unwrap();
        assert!((earned - 0.5).abs() < f64::EPSILON);

        let changed = history
            .reconcile(vec![first.id], PhysicalTime::from_ms(300))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(history.unreconciled().await.unwrap().len(), 1);
    }
}
