//! Bounded queues connecting device stages.
//!
//! # Overview
//!
//! Every queue is a bounded FIFO: no more than `capacity` elements are ever buffered, and each
//! queue delivers elements in the order they were pushed (no ordering holds between distinct
//! queues). Queues are the only synchronization between stages.
//!
//! The two disciplines differ in how they shut down:
//!
//! | Queue                  | Push when full | End of stream                          | Leftover elements          |
//! |------------------------|----------------|----------------------------------------|----------------------------|
//! | [ClosableQueue]        | suspends       | last [ClosableQueue::complete] closes  | popped by consumers        |
//! | [AutodrainingQueue]    | dropped        | producer pushes a sentinel             | flushed when last handle drops |
//!
//! # Examples
//!
//! ```
//! use futures::executor::block_on;
//! use tunnel_device::{queue::ClosableQueue, NZUsize};
//!
//! block_on(async {
//!     let queue = ClosableQueue::new(NZUsize!(4), 2);
//!     queue.push(1).await;
//!     queue.complete();
//!     queue.push(2).await;
//!     queue.complete();
//!
//!     assert_eq!(queue.pop().await, Some(1));
//!     assert_eq!(queue.pop().await, Some(2));
//!     assert_eq!(queue.pop().await, None);
//! });
//! ```

use crate::{HandshakeElement, InboundElement, OutboundElement, Pooled, Pools};

mod autodraining;
pub use autodraining::{AutodrainingQueue, Flush};
mod closable;
pub use closable::ClosableQueue;

/// Queue feeding received handshake messages to the handshake workers.
pub type HandshakeQueue = ClosableQueue<HandshakeElement>;

/// Device-wide queue feeding outbound elements to the encryption workers.
pub type EncryptionQueue = ClosableQueue<Pooled<OutboundElement>>;

/// Device-wide queue feeding inbound elements to the decryption workers.
pub type DecryptionQueue = ClosableQueue<Pooled<InboundElement>>;

/// Per-peer queue of inbound elements, drained back into [Pools] when dropped.
pub type InboundQueue = AutodrainingQueue<Pooled<InboundElement>, Pools>;

/// Per-peer queue of outbound elements, drained back into [Pools] when dropped.
pub type OutboundQueue = AutodrainingQueue<Pooled<OutboundElement>, Pools>;
