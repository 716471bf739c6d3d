//! Immutable versioned snapshots
//!
//! Catalogs and resources are replaced wholesale. A [`SnapshotCell`]
//! publishes each fully validated value behind an `Arc` over a watch
//! channel; readers always see either the previous or the next complete
//! snapshot, never a partial one.

use std::sync::Arc;
use tokio::sync::watch;

/// A value tagged with its publish version
#[derive(Debug)]
pub struct Versioned<T> {
    /// Monotonic publish counter, 0 for the initial value
    pub version: u64,
    /// The snapshot
    pub value: T,
}

/// Single-writer, many-reader snapshot slot
#[derive(Debug)]
pub struct SnapshotCell<T> {
    sender: watch::Sender<Arc<Versioned<T>>>,
}

impl<T: Send + Sync + 'static> SnapshotCell<T> {
    /// Create a cell holding `initial` at version 0
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(Arc::new(Versioned {
            version: 0,
            value: initial,
        }));
        Self { sender }
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<Versioned<T>> {
        self.sender.borrow().clone()
    }

    /// Replace the snapshot, returning the new version
    pub fn publish(&self, value: T) -> u64 {
        let version = self.sender.borrow().version + 1;
        self.sender.send_replace(Arc::new(Versioned { version, value }));
        version
    }

    /// Receiver notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<Arc<Versioned<T>>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_keep_their_snapshot() {
        let cell = SnapshotCell::new(vec![1, 2]);
        let before = cell.current();
        assert_eq!(cell.publish(vec![3]), 1);

        assert_eq!(before.value, vec![1, 2]);
        assert_eq!(cell.current().value, vec![3]);
        assert_eq!(cell.current().version, 1);
    }

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let cell = SnapshotCell::new(0u32);
        let mut rx = cell.subscribe();
        cell.publish(7);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().value, 7);
    }
}
