//! Bounded handoff queue between acquisition and delivery.
//!
//! Pushing never blocks: when the queue is full the new item is discarded
//! and the push reports [`PushOutcome::Dropped`]. Popping blocks until an
//! item arrives or shutdown is signalled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc};

use crate::error::{BridgeError, Result};
use crate::shutdown::ShutdownSignal;

/// Result of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The item was queued.
    Queued,
    /// The queue was full (or the consumer is gone) and the item was discarded.
    Dropped,
}

/// Largest capacity a handoff queue can be created with.
pub const MAX_QUEUE_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// Create a bounded queue holding at most `capacity` items.
///
/// `capacity` must be in `1..=MAX_QUEUE_CAPACITY`.
pub fn handoff_queue<T>(capacity: usize) -> Result<(QueueProducer<T>, QueueConsumer<T>)> {
    if capacity == 0 {
        return Err(BridgeError::validation(
            "buffer size must be at least 1".to_string(),
        ));
    }
    if capacity > MAX_QUEUE_CAPACITY {
        return Err(BridgeError::validation(format!(
            "buffer size must be at most {}, got {}",
            MAX_QUEUE_CAPACITY, capacity
        )));
    }

    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    Ok((
        QueueProducer {
            tx,
            dropped: dropped.clone(),
        },
        QueueConsumer { rx, dropped },
    ))
}

/// Producer side of the handoff queue.
#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: mpsc::Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> QueueProducer<T> {
    /// Push an item without waiting.
    pub fn push(&self, item: T) -> PushOutcome {
        match self.tx.try_send(item) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
        }
    }

    /// Items currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of items discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side of the handoff queue.
#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: mpsc::Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> QueueConsumer<T> {
    /// Wait for the next item.
    ///
    /// Returns `None` once shutdown is signalled, or when the producer is
    /// gone and the queue has been drained.
    pub async fn pop(&mut self, shutdown: &mut ShutdownSignal) -> Option<T> {
        tokio::select! {
            biased;
            _ = shutdown.wait() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Take the next item if one is ready.
    pub fn try_pop(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Items currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Total number of items the producer discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
