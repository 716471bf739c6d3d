//! Task-owned mutable state
//!
//! Each mutable resource (token ledger, ad event log, redemption queue,
//! payment tokens, transactions, bandit arms) is owned by exactly one tokio
//! task. Callers hold a cloneable [`StateOwner`] handle and submit closures;
//! the task applies them one at a time, persists after each mutation, and
//! only then answers the caller. No caller ever holds a lock on the state.
//! A mutation whose commit fails is rolled back, so memory never runs ahead
//! of storage.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::errors::{Result, UmbraError};

/// State that can be owned by a [`StateOwner`]
#[async_trait]
pub trait OwnedState: Send + 'static {
    /// Copy of the in-memory data taken before each mutation
    type Checkpoint: Send;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Capture the data a failed commit restores
    fn checkpoint(&self) -> Self::Checkpoint;

    /// Undo a mutation whose commit failed
    fn restore(&mut self, checkpoint: Self::Checkpoint);

    /// Persist the current state. Called after every mutation, before the
    /// mutating caller is answered.
    async fn commit(&mut self) -> Result<()>;
}

type Reply = Box<dyn FnOnce(Result<()>) + Send>;

enum Job<S> {
    Read(Box<dyn FnOnce(&S) + Send>),
    Mutate(Box<dyn FnOnce(&mut S) -> Reply + Send>),
}

/// Handle to a state-owning task
pub struct StateOwner<S> {
    sender: mpsc::UnboundedSender<Job<S>>,
}

impl<S> Clone for StateOwner<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<S> std::fmt::Debug for StateOwner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateOwner")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<S: OwnedState> StateOwner<S> {
    /// Move `state` into a new owner task. The task exits once every handle
    /// has been dropped.
    pub fn spawn(mut state: S) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job<S>>();

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                match job {
                    Job::Read(read) => read(&state),
                    Job::Mutate(mutate) => {
                        let checkpoint = state.checkpoint();
                        let reply = mutate(&mut state);
                        let committed = state.commit().await;
                        if let Err(err) = &committed {
                            tracing::error!(
                                owner = state.name(),
                                error = %err,
                                "commit failed, mutation rolled back"
                            );
                            state.restore(checkpoint);
                        }
                        reply(committed);
                    }
                }
            }
            tracing::debug!(owner = state.name(), "state owner stopped");
        });

        Self { sender }
    }

    /// Run a read-only query against the state
    pub async fn read<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&S) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = Job::Read(Box::new(move |state: &S| {
            let _ = tx.send(f(state));
        }));
        self.sender.send(job).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Apply a mutation, persist, and return the closure's result
    pub async fn mutate<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = Job::Mutate(Box::new(move |state: &mut S| -> Reply {
            let value = f(state);
            Box::new(move |committed: Result<()>| {
                let _ = tx.send(committed.map(|()| value));
            })
        }));
        self.sender.send(job).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Apply a fallible mutation and flatten its result
    pub async fn try_mutate<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> Result<R> + Send + 'static,
    {
        self.mutate(f).await?
    }
}

fn stopped() -> UmbraError {
    UmbraError::internal("state owner task stopped")
}
