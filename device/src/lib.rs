//! Manage the lifetime of pooled packet buffers and the queues that carry them between tunnel stages.
//!
//! A tunnel device moves packets through independently scheduled stages (handshake processing,
//! inbound decryption, outbound encryption). Each packet rides in a [MessageBuffer] drawn from a
//! shared [Pool] and travels between stages through bounded queues. This crate guarantees that
//! every buffer handed out by a pool is returned to it exactly once, regardless of how producers
//! and consumers are scheduled or torn down.
//!
//! # Queues
//!
//! Two queue disciplines are provided:
//!
//! - [queue::ClosableQueue]: a bounded FIFO that closes once every registered producer has called
//!   [queue::ClosableQueue::complete]. Pushes suspend while the queue is full. Used for the
//!   handshake queue and the device-wide encryption and decryption queues.
//! - [queue::AutodrainingQueue]: a bounded FIFO that is never closed. Pushes are best-effort and
//!   never suspend. When the last handle to the queue is dropped, any elements still buffered are
//!   handed back to their owner (typically [Pools]) so their buffers return to the pool. Used for
//!   per-peer inbound and outbound queues, whose consumers may disappear without a shutdown
//!   handshake.
//!
//! # Ownership
//!
//! Pooled objects are handed out as [Pooled] handles. A handle returns its object to the pool when
//! dropped, and [Pool::put] consumes the handle, so returning the same object twice cannot be
//! expressed.
//!
//! # Status
//!
//! `tunnel-device` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use thiserror::Error;

/// Construct a [std::num::NonZeroUsize] from a value, panicking (at compile time when used in a
/// `const` context) if the value is zero.
#[macro_export]
macro_rules! NZUsize {
    ($val:expr) => {
        match ::core::num::NonZeroUsize::new($val) {
            Some(value) => value,
            None => panic!("value must be non-zero"),
        }
    };
}

mod config;
pub use config::Config;
mod element;
pub use element::{HandshakeElement, InboundElement, MessageBuffer, MessageType, OutboundElement};
mod pool;
pub use pool::{Pool, Pooled, Reset};
mod pools;
pub use pools::Pools;
pub mod queue;

/// Capacity of the queue carrying handshake messages to the handshake workers.
pub const QUEUE_HANDSHAKE_SIZE: usize = 1024;

/// Capacity of each inbound (decryption) queue.
pub const QUEUE_INBOUND_SIZE: usize = 1024;

/// Capacity of each outbound (encryption) queue.
pub const QUEUE_OUTBOUND_SIZE: usize = 1024;

/// Largest segment the device will read from or write to the network.
pub const MAX_SEGMENT_SIZE: usize = (1 << 16) - 1;

/// Size of every [MessageBuffer].
pub const MAX_MESSAGE_SIZE: usize = MAX_SEGMENT_SIZE;

/// Number of slots in each pool (buffers beyond this are allocated untracked).
pub const PREALLOCATED_BUFFERS_PER_POOL: usize = 4096;

/// Errors that can occur when interacting with a [Pool].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("pool exhausted")]
    Exhausted,
}
