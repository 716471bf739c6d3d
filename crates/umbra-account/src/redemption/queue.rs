//! Persistent redemption queue
//!
//! Every queued confirmation gets its own task that sleeps until the next
//! attempt is due, claims the item (`Pending → InFlight`), runs one
//! attempt and records the outcome. The claim goes through the queue's
//! [`StateOwner`], so a confirmation never has two attempts in flight.
//!
//! Items are persisted under [`storage_keys::CONFIRMATION_QUEUE`] after
//! every transition. After a restart, [`RedemptionQueue::resume`] puts
//! items that were pending or mid-attempt back on the schedule; a
//! confirmation the ledger already accepted is not created again.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use umbra_core::effects::storage::{load_json, store_json};
use umbra_core::effects::{storage_keys, StorageEffects};
use umbra_core::{
    OwnedState, PhysicalTime, Result, RetryPolicy, StateOwner, TransactionId, UmbraConfig,
    UmbraEffects, UmbraError,
};

use super::protocol::Redeemer;
use crate::confirmations::ConfirmationInfo;
use crate::issuers::IssuerStore;
use crate::payment_tokens::{PaymentTokens, UnblindedPaymentToken};
use crate::transactions::{TransactionInfo, Transactions};

/// Where a queued confirmation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionState {
    /// Waiting for its next attempt
    Pending,
    /// An attempt is running
    InFlight,
    /// Finished; payment token stored for opted-in confirmations
    Redeemed,
    /// Given up after a fatal error or exhausted retries
    Dropped,
}

impl RedemptionState {
    /// Whether the item will never be attempted again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Redeemed | Self::Dropped)
    }
}

/// One queued confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// The confirmation being redeemed
    pub confirmation: ConfirmationInfo,
    /// Lifecycle state
    pub state: RedemptionState,
    /// Attempts started so far
    pub attempts: u32,
    /// Earliest time of the next attempt
    pub next_attempt_at: PhysicalTime,
    /// Error of the last failed attempt
    pub last_error: Option<String>,
}

/// Owner-task state
pub struct QueueState {
    items: Vec<QueueItem>,
    storage: Arc<dyn StorageEffects>,
}

impl QueueState {
    fn item_mut(&mut self, transaction_id: TransactionId) -> Option<&mut QueueItem> {
        self.items
            .iter_mut()
            .find(|item| item.confirmation.transaction_id == transaction_id)
    }

    fn claim(&mut self, transaction_id: TransactionId) -> Option<QueueItem> {
        let item = self.item_mut(transaction_id)?;
        if item.state != RedemptionState::Pending {
            return None;
        }
        item.state = RedemptionState::InFlight;
        item.attempts += 1;
        Some(item.clone())
    }
}

#[async_trait]
impl OwnedState for QueueState {
    type Checkpoint = Vec<QueueItem>;

    fn name(&self) -> &'static str {
        "confirmation_queue"
    }

    fn checkpoint(&self) -> Vec<QueueItem> {
        self.items.clone()
    }

    fn restore(&mut self, checkpoint: Vec<QueueItem>) {
        self.items = checkpoint;
    }

    async fn commit(&mut self) -> Result<()> {
        store_json(
            self.storage.as_ref(),
            storage_keys::CONFIRMATION_QUEUE,
            &self.items,
        )
        .await
    }
}

struct QueueInner {
    owner: StateOwner<QueueState>,
    redeemer: Redeemer,
    issuers: Arc<IssuerStore>,
    payment_tokens: PaymentTokens,
    transactions: Transactions,
    effects: UmbraEffects,
    policy: RetryPolicy,
    tasks: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
}

/// Handle to the redemption queue
#[derive(Clone)]
pub struct RedemptionQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for RedemptionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedemptionQueue")
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl RedemptionQueue {
    /// Load the persisted queue. Nothing is scheduled until
    /// [`resume`](Self::resume) or [`add`](Self::add) is called.
    pub async fn load(
        config: &UmbraConfig,
        effects: UmbraEffects,
        issuers: Arc<IssuerStore>,
        payment_tokens: PaymentTokens,
        transactions: Transactions,
    ) -> Result<Self> {
        let items: Vec<QueueItem> =
            load_json(effects.storage.as_ref(), storage_keys::CONFIRMATION_QUEUE)
                .await?
                .unwrap_or_default();
        debug!(items = items.len(), "loaded confirmation queue");

        let (shutdown, _) = watch::channel(false);
        let owner = StateOwner::spawn(QueueState {
            items,
            storage: effects.storage.clone(),
        });
        let redeemer = Redeemer::new(
            effects.network.clone(),
            issuers.clone(),
            config.endpoints.ledger_base_url.clone(),
        );

        Ok(Self {
            inner: Arc::new(QueueInner {
                owner,
                redeemer,
                issuers,
                payment_tokens,
                transactions,
                effects,
                policy: config.redemption.retry.clone(),
                tasks: Mutex::new(JoinSet::new()),
                shutdown,
            }),
        })
    }

    /// Queue a confirmation for redemption. Returns `false` if its
    /// transaction id is already queued, in any state.
    pub async fn add(&self, confirmation: ConfirmationInfo) -> Result<bool> {
        if *self.inner.shutdown.borrow() {
            return Err(UmbraError::internal("redemption queue is shut down"));
        }
        let transaction_id = confirmation.transaction_id;
        let now = self.inner.effects.now().await?;
        let added = self
            .inner
            .owner
            .mutate(move |state| {
                if state.item_mut(transaction_id).is_some() {
                    return false;
                }
                state.items.push(QueueItem {
                    confirmation,
                    state: RedemptionState::Pending,
                    attempts: 0,
                    next_attempt_at: now,
                    last_error: None,
                });
                true
            })
            .await?;

        if added {
            debug!(%transaction_id, "queued confirmation");
            self.schedule(transaction_id);
        } else {
            debug!(%transaction_id, "confirmation already queued");
        }
        Ok(added)
    }

    /// Reschedule every unfinished item, returning how many were scheduled.
    /// Items left mid-attempt by a previous run go back to pending, so call
    /// this once at startup, before new confirmations are added.
    pub async fn resume(&self) -> Result<usize> {
        let scheduled = self
            .inner
            .owner
            .mutate(|state| {
                state
                    .items
                    .iter_mut()
                    .filter(|item| !item.state.is_terminal())
                    .map(|item| {
                        item.state = RedemptionState::Pending;
                        item.confirmation.transaction_id
                    })
                    .collect::<Vec<_>>()
            })
            .await?;

        for transaction_id in &scheduled {
            self.schedule(*transaction_id);
        }
        info!(scheduled = scheduled.len(), "resumed redemption queue");
        Ok(scheduled.len())
    }

    /// The item for a transaction id
    pub async fn get(&self, transaction_id: TransactionId) -> Result<Option<QueueItem>> {
        self.inner
            .owner
            .read(move |state| {
                state
                    .items
                    .iter()
                    .find(|item| item.confirmation.transaction_id == transaction_id)
                    .cloned()
            })
            .await
    }

    /// Every item, in queue order
    pub async fn items(&self) -> Result<Vec<QueueItem>> {
        self.inner.owner.read(|state| state.items.clone()).await
    }

    /// Items not yet redeemed or dropped
    pub async fn pending_count(&self) -> Result<usize> {
        self.inner
            .owner
            .read(|state| {
                state
                    .items
                    .iter()
                    .filter(|item| !item.state.is_terminal())
                    .count()
            })
            .await
    }

    /// Forget redeemed and dropped items created before `cutoff`
    pub async fn purge_terminal_before(&self, cutoff: PhysicalTime) -> Result<usize> {
        self.inner
            .owner
            .mutate(move |state| {
                let before = state.items.len();
                state.items.retain(|item| {
                    !(item.state.is_terminal() && item.confirmation.created_at < cutoff)
                });
                before - state.items.len()
            })
            .await
    }

    /// Wait until every scheduled task has finished
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "redemption task failed");
                }
            }
        }
    }

    /// Stop scheduling, cancel waits and let in-flight attempts finish.
    /// Unfinished items stay persisted for the next [`resume`](Self::resume).
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        self.drain().await;
        info!("redemption queue stopped");
    }

    fn schedule(&self, transaction_id: TransactionId) {
        let inner = self.inner.clone();
        self.inner
            .tasks
            .lock()
            .spawn(async move { inner.run(transaction_id).await });
    }
}

impl QueueInner {
    async fn run(&self, transaction_id: TransactionId) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                return;
            }
            let item = match self
                .owner
                .read(move |state| {
                    state
                        .items
                        .iter()
                        .find(|item| item.confirmation.transaction_id == transaction_id)
                        .cloned()
                })
                .await
            {
                Ok(Some(item)) if item.state == RedemptionState::Pending => item,
                Ok(_) => return,
                Err(err) => {
                    warn!(%transaction_id, error = %err, "redemption queue unavailable");
                    return;
                }
            };

            let wait_ms = match self.effects.now().await {
                Ok(now) => item.next_attempt_at.since(now),
                Err(err) => {
                    warn!(%transaction_id, error = %err, "clock unavailable");
                    return;
                }
            };
            if !self.pause(&mut shutdown, wait_ms).await {
                return;
            }

            // A failed claim is rolled back to pending by the owner
            let claimed = match self
                .owner
                .mutate(move |state| state.claim(transaction_id))
                .await
            {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(err) => {
                    warn!(%transaction_id, error = %err, "could not claim confirmation");
                    if !self.storage_backoff(&mut shutdown, item.attempts).await {
                        return;
                    }
                    continue;
                }
            };

            let outcome = self.attempt_with_deadline(&claimed.confirmation).await;
            loop {
                match self.record(transaction_id, claimed.attempts, &outcome).await {
                    Ok(RedemptionState::Pending) => break,
                    Ok(_) => return,
                    // Left in flight on shutdown; resume puts it back to pending
                    Err(err) => {
                        warn!(%transaction_id, error = %err, "could not record attempt");
                        if !self.storage_backoff(&mut shutdown, claimed.attempts).await {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Sleep unless shutdown comes first. `false` means stop.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>, wait_ms: u64) -> bool {
        if wait_ms == 0 {
            return true;
        }
        tokio::select! {
            _ = shutdown.changed() => false,
            slept = self.effects.time.sleep_ms(wait_ms) => match slept {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "sleep failed");
                    false
                }
            },
        }
    }

    async fn storage_backoff(&self, shutdown: &mut watch::Receiver<bool>, retry: u32) -> bool {
        let draw = self.effects.random.random_unit().await;
        let delay_ms = self.policy.delay_ms(retry, draw);
        self.pause(shutdown, delay_ms).await
    }

    async fn attempt_with_deadline(&self, confirmation: &ConfirmationInfo) -> Result<()> {
        match self.policy.attempt_timeout_ms {
            Some(timeout_ms) => tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.attempt(confirmation),
            )
            .await
            .map_err(|_| UmbraError::timeout(timeout_ms))?,
            None => self.attempt(confirmation).await,
        }
    }

    async fn attempt(&self, confirmation: &ConfirmationInfo) -> Result<()> {
        let issuers = self.issuers.current();
        if issuers.value.issuers.is_empty() {
            return Err(UmbraError::network("issuers not fetched yet"));
        }
        confirmation.validate(&issuers.value)?;

        let transaction_id = confirmation.transaction_id;
        if !confirmation.was_created {
            self.redeemer.create(confirmation).await?;
            self.owner
                .mutate(move |state| {
                    if let Some(item) = state.item_mut(transaction_id) {
                        item.confirmation.was_created = true;
                    }
                })
                .await?;
            debug!(%transaction_id, "confirmation created");
        }

        if !confirmation.is_opted_in() {
            return Ok(());
        }

        let redeemed = self.redeemer.fetch_payment_token(confirmation).await?;
        let now = self.effects.now().await?;
        self.payment_tokens
            .add(UnblindedPaymentToken {
                transaction_id,
                unblinded_token: redeemed.unblinded_token,
                public_key: redeemed.public_key,
                confirmation_type: confirmation.confirmation_type,
                ad_type: confirmation.ad_type,
                created_at: now,
            })
            .await?;
        self.transactions
            .add(TransactionInfo {
                id: transaction_id,
                creative_instance_id: confirmation.creative_instance_id.clone(),
                value: redeemed.value,
                ad_type: confirmation.ad_type,
                confirmation_type: confirmation.confirmation_type,
                created_at: now,
                reconciled_at: None,
            })
            .await?;
        Ok(())
    }

    async fn record(
        &self,
        transaction_id: TransactionId,
        attempts: u32,
        outcome: &Result<()>,
    ) -> Result<RedemptionState> {
        let (next, next_attempt_at, last_error) = match outcome {
            Ok(()) => (RedemptionState::Redeemed, None, None),
            // Local storage failures are retried like transport failures
            Err(err)
                if (err.is_retryable() || matches!(err, UmbraError::Storage { .. }))
                    && self.policy.allows_another(attempts) =>
            {
                let draw = self.effects.random.random_unit().await;
                let delay_ms = self.policy.delay_ms(attempts.saturating_sub(1), draw);
                let at = self.effects.now().await?.add_ms(delay_ms);
                (RedemptionState::Pending, Some(at), Some(err.to_string()))
            }
            Err(err) => (RedemptionState::Dropped, None, Some(err.to_string())),
        };

        self.owner
            .mutate(move |state| {
                if let Some(item) = state.item_mut(transaction_id) {
                    item.state = next;
                    if let Some(at) = next_attempt_at {
                        item.next_attempt_at = at;
                    }
                    item.last_error = last_error;
                }
            })
            .await?;

        match (outcome, next) {
            (Ok(()), _) => info!(%transaction_id, attempts, "confirmation redeemed"),
            (Err(err), RedemptionState::Pending) => {
                debug!(%transaction_id, attempts, error = %err, "redemption will retry");
            }
            (Err(err), _) => {
                warn!(%transaction_id, attempts, error = %err, "confirmation dropped");
            }
        }
        Ok(next)
    }
}
