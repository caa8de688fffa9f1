//! Aggregate "is anything busy" signal.
//!
//! Bracketed operations hold a [`BusyGuard`] for their whole duration. The
//! counter publishes `true` on the 0 to 1 transition and `false` on the 1 to 0
//! transition, and nothing in between.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Edge-triggered busy counter.
pub struct BusySignalCounter {
    count: AtomicUsize,
    /// Last published level. Serializes publication.
    published: Mutex<bool>,
    edges_tx: broadcast::Sender<bool>,
    level_tx: watch::Sender<bool>,
}

impl fmt::Debug for BusySignalCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusySignalCounter")
            .field("count", &self.count())
            .field("busy", &*self.level_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl BusySignalCounter {
    /// Creates an idle counter whose edge channel buffers `capacity` edges.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (edges_tx, _) = broadcast::channel(capacity);
        let (level_tx, _) = watch::channel(false);
        Self { count: AtomicUsize::new(0), published: Mutex::new(false), edges_tx, level_tx }
    }

    /// Starts a bracketed operation. The guard ends it on drop.
    #[must_use = "the operation ends as soon as the guard is dropped"]
    pub fn begin(self: &Arc<Self>) -> BusyGuard {
        self.increment();
        BusyGuard { counter: Arc::clone(self) }
    }

    /// Increments the counter.
    ///
    /// # Returns
    /// Returns `true` if this call moved the counter from 0 to 1.
    pub fn increment(&self) -> bool {
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        let crossed = previous == 0;
        if crossed {
            self.publish();
        }
        crossed
    }

    /// Decrements the counter, never going below zero.
    ///
    /// # Returns
    /// Returns `true` if this call moved the counter from 1 to 0.
    pub fn decrement(&self) -> bool {
        let crossed = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| current.checked_sub(1))
            .is_ok_and(|previous| previous == 1);
        if crossed {
            self.publish();
        }
        crossed
    }

    /// Number of bracketed operations in flight.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns `true` while any bracketed operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.count() > 0
    }

    /// Subscribes to busy edges published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.edges_tx.subscribe()
    }

    /// Watches the latest published level.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.level_tx.subscribe()
    }

    /// Publishes the current level if it differs from the last published one.
    fn publish(&self) {
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        let level = self.count() > 0;
        if *published == level {
            return;
        }
        *published = level;
        debug!(busy = level, "Busy signal changed");
        self.level_tx.send_replace(level);
        // No subscribers is not a failure.
        let _ = self.edges_tx.send(level);
    }
}

/// Ends one bracketed operation when dropped.
#[derive(Debug)]
pub struct BusyGuard {
    counter: Arc<BusySignalCounter>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Barrier;

    fn drain(rx: &mut broadcast::Receiver<bool>) -> Vec<bool> {
        let mut edges = Vec::new();
        while let Ok(edge) = rx.try_recv() {
            edges.push(edge);
        }
        edges
    }

    #[test]
    fn test_overlapping_operations_emit_one_edge_each_way() {
        let counter = Arc::new(BusySignalCounter::new(16));
        let mut rx = counter.subscribe();

        let a = counter.begin();
        assert_eq!(drain(&mut rx), vec![true]);

        let b = counter.begin();
        assert_eq!(counter.count(), 2);
        assert!(drain(&mut rx).is_empty());

        drop(a);
        assert_eq!(counter.count(), 1);
        assert!(drain(&mut rx).is_empty());

        drop(b);
        assert_eq!(drain(&mut rx), vec![false]);
        assert!(!counter.is_busy());
    }

    #[test]
    fn test_decrement_floors_at_zero() {
        let counter = BusySignalCounter::new(16);
        let mut rx = counter.subscribe();

        assert!(!counter.decrement());
        assert_eq!(counter.count(), 0);
        assert!(drain(&mut rx).is_empty());

        assert!(counter.increment());
        assert!(counter.decrement());
        assert!(!counter.decrement());
        assert_eq!(drain(&mut rx), vec![true, false]);
    }

    #[test]
    fn test_watch_tracks_level() {
        let counter = Arc::new(BusySignalCounter::new(16));
        let level = counter.watch();
        assert!(!*level.borrow());

        let guard = counter.begin();
        assert!(*level.borrow());
        drop(guard);
        assert!(!*level.borrow());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overlap_emits_exactly_one_true_and_one_false() {
        const OPERATIONS: usize = 32;
        let counter = Arc::new(BusySignalCounter::new(64));
        let mut rx = counter.subscribe();
        let started = Arc::new(Barrier::new(OPERATIONS));

        let handles: Vec<_> = (0..OPERATIONS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let started = Arc::clone(&started);
                tokio::spawn(async move {
                    let _guard = counter.begin();
                    started.wait().await;
                    tokio::task::yield_now().await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(drain(&mut rx), vec![true, false]);
        assert_eq!(counter.count(), 0);
    }
}
