use crate::{
    PREALLOCATED_BUFFERS_PER_POOL, QUEUE_HANDSHAKE_SIZE, QUEUE_INBOUND_SIZE, QUEUE_OUTBOUND_SIZE,
};
use std::num::NonZeroUsize;

/// Configuration for the [Pools](crate::Pools) of a device and the queues created from them.
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the handshake queue.
    pub handshake_queue_size: NonZeroUsize,

    /// Capacity of inbound (decryption) queues.
    pub inbound_queue_size: NonZeroUsize,

    /// Capacity of outbound (encryption) queues.
    pub outbound_queue_size: NonZeroUsize,

    /// Maximum number of tracked objects per pool.
    ///
    /// Once this many objects are outstanding, [Pool::get](crate::Pool::get) falls back to
    /// untracked allocations and [Pool::try_get](crate::Pool::try_get) fails.
    pub pool_size: NonZeroUsize,

    /// Whether to allocate every pooled object when the pool is created.
    pub prefill: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handshake_queue_size: NZUsize!(QUEUE_HANDSHAKE_SIZE),
            inbound_queue_size: NZUsize!(QUEUE_INBOUND_SIZE),
            outbound_queue_size: NZUsize!(QUEUE_OUTBOUND_SIZE),
            pool_size: NZUsize!(PREALLOCATED_BUFFERS_PER_POOL),
            prefill: false,
        }
    }
}
