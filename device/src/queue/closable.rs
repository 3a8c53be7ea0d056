//! A bounded queue that closes once every producer has completed.

use futures::{
    channel::mpsc::{self, Receiver, Sender},
    lock::Mutex as AsyncMutex,
    SinkExt, StreamExt,
};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};
use tracing::{debug, error, warn};

/// A bounded FIFO shared by a known number of producers and any number of consumers.
///
/// The queue is created with the number of producers expected to push into it. Each producer
/// calls [Self::complete] exactly once when it is done; the call that brings the count to zero
/// closes the queue. Consumers call [Self::pop] until it returns `None`.
///
/// # Liveness
///
/// The queue closes only after every registered producer has completed. A producer that exits
/// without calling [Self::complete] leaves consumers waiting forever.
///
/// # Contract
///
/// - Pushing after the queue has closed is a bug (panics in debug builds; the element is
///   dropped in release builds).
/// - Completions beyond the registered producer count are ignored.
pub struct ClosableQueue<T> {
    capacity: usize,
    /// The only sender that ever sends.
    sender: AsyncMutex<Sender<T>>,
    /// Clone of `sender`, taken once to close the channel.
    closer: Mutex<Option<Sender<T>>>,
    receiver: AsyncMutex<Receiver<T>>,
    /// Number of producers that have not yet completed.
    remaining: AtomicUsize,
}

impl<T> ClosableQueue<T> {
    /// Creates a queue holding at most `capacity` elements, closed after `producers` completions.
    ///
    /// # Panics
    ///
    /// Panics if `producers` is zero.
    pub fn new(capacity: NonZeroUsize, producers: usize) -> Self {
        assert!(producers > 0, "queue requires at least one producer");

        // A single sender may hold one message beyond the channel's buffer
        let (sender, receiver) = mpsc::channel(capacity.get() - 1);
        Self {
            capacity: capacity.get(),
            closer: Mutex::new(Some(sender.clone())),
            sender: AsyncMutex::new(sender),
            receiver: AsyncMutex::new(receiver),
            remaining: AtomicUsize::new(producers),
        }
    }

    /// Enqueues `element`, waiting while the queue is full.
    pub async fn push(&self, element: T) {
        let mut sender = self.sender.lock().await;

        // Feed rather than send: flushing would wait for space after the element is enqueued
        let result = sender.feed(element).await;
        if result.is_err() {
            error!("element pushed after queue closed");
        }
        debug_assert!(result.is_ok(), "element pushed after queue closed");
    }

    /// Dequeues the next element, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<T> {
        self.receiver.lock().await.next().await
    }

    /// Records that one producer is done, closing the queue if it was the last.
    pub fn complete(&self) {
        // If not the last completion, do nothing.
        match self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            }) {
            Ok(1) => self.close(),
            Ok(_) => {}
            Err(_) => warn!("queue completed more times than it has producers"),
        }
    }

    /// Registers `producers` additional producers that must complete before the queue closes.
    ///
    /// # Panics
    ///
    /// Panics if the queue has already closed or the producer count would overflow.
    pub fn add_producers(&self, producers: usize) {
        let result = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                if remaining == 0 {
                    return None;
                }
                remaining.checked_add(producers)
            });
        match result {
            Ok(_) => {}
            Err(0) => panic!("producers added after queue closed"),
            Err(_) => panic!("producer count overflowed"),
        }
    }

    /// Returns `true` once every producer has completed.
    pub fn is_closed(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Returns the number of producers that have not yet completed.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Returns the maximum number of buffered elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) {
        if let Some(mut closer) = self.closer.lock().unwrap().take() {
            closer.close_channel();
            debug!(capacity = self.capacity, "queue closed");
        }
    }
}

impl<T> std::fmt::Debug for ClosableQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosableQueue")
            .field("capacity", &self.capacity)
            .field("remaining", &self.remaining())
            .finish()
    }
}
