//! A bounded queue that returns its leftover elements to their owner when dropped.

use futures::{
    channel::mpsc::{self, Receiver, Sender},
    lock::Mutex as AsyncMutex,
    StreamExt,
};
use std::{num::NonZeroUsize, sync::Mutex};
use tracing::{debug, trace};

/// Receives elements that were still buffered when an [AutodrainingQueue] was dropped.
pub trait Flush<E> {
    /// Releases the resources held by `element` (for example, returning its buffer to a pool).
    fn flush(&self, element: E);
}

/// A bounded FIFO that is never closed and drains itself when dropped.
///
/// It is useful when it is hard to manage the lifetime of the queue: consumers may disappear
/// without a shutdown handshake, so instead of closing, the queue hands every element still
/// buffered to its owner's [Flush] implementation once the last handle (typically an `Arc`) is
/// dropped.
///
/// Because there may be no consumer at any given moment, all pushes are best-effort: a push to a
/// full queue is dropped rather than waiting. Producers signal the end of their stream with
/// [Self::push_sentinel], which consumers observe as `None` from [Self::pop].
pub struct AutodrainingQueue<E, F: Flush<E>> {
    owner: F,
    capacity: usize,
    sender: Mutex<Sender<Option<E>>>,
    receiver: AsyncMutex<Receiver<Option<E>>>,
}

impl<E, F: Flush<E>> AutodrainingQueue<E, F> {
    /// Creates a queue holding at most `capacity` elements, drained into `owner` when dropped.
    pub fn new(owner: F, capacity: NonZeroUsize) -> Self {
        // A single sender may hold one message beyond the channel's buffer
        let (sender, receiver) = mpsc::channel(capacity.get() - 1);
        Self {
            owner,
            capacity: capacity.get(),
            sender: Mutex::new(sender),
            receiver: AsyncMutex::new(receiver),
        }
    }

    /// Enqueues `element` without waiting.
    ///
    /// Returns `false` if the queue is full, in which case `element` is dropped.
    pub fn push(&self, element: E) -> bool {
        self.send(Some(element))
    }

    /// Enqueues the end-of-stream sentinel without waiting.
    ///
    /// Returns `false` if the queue is full.
    pub fn push_sentinel(&self) -> bool {
        self.send(None)
    }

    /// Dequeues the next element, waiting until one is available.
    ///
    /// Returns `None` when the sentinel is dequeued. The queue is never closed, so consumers must
    /// stop on the sentinel rather than wait for the end of the stream.
    pub async fn pop(&self) -> Option<E> {
        self.receiver.lock().await.next().await.flatten()
    }

    /// Dequeues the next element without waiting.
    ///
    /// Returns `None` if nothing is available (or another consumer is waiting), `Some(None)` for
    /// the sentinel, and `Some(Some(element))` otherwise.
    pub fn try_pop(&self) -> Option<Option<E>> {
        let mut receiver = self.receiver.try_lock()?;
        receiver.try_recv().ok()
    }

    /// Returns the maximum number of buffered elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn send(&self, item: Option<E>) -> bool {
        match self.sender.lock().unwrap().try_send(item) {
            Ok(()) => true,
            Err(err) => {
                trace!(full = err.is_full(), "dropped element");
                false
            }
        }
    }
}

impl<E, F: Flush<E>> Drop for AutodrainingQueue<E, F> {
    fn drop(&mut self) {
        let receiver = self.receiver.get_mut();
        let mut flushed = 0;
        while let Ok(item) = receiver.try_recv() {
            // Sentinels hold nothing to release
            if let Some(element) = item {
                self.owner.flush(element);
                flushed += 1;
            }
        }
        if flushed > 0 {
            debug!(flushed, "drained queue");
        }
    }
}

impl<E, F: Flush<E>> std::fmt::Debug for AutodrainingQueue<E, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutodrainingQueue")
            .field("capacity", &self.capacity)
            .finish()
    }
}
