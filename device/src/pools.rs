//! The pools shared by every stage of a device.

use crate::{
    queue::{
        AutodrainingQueue, ClosableQueue, DecryptionQueue, EncryptionQueue, Flush, HandshakeQueue,
        InboundQueue, OutboundQueue,
    },
    Config, InboundElement, MessageBuffer, OutboundElement, Pool, Pooled,
};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::trace;

/// Prefix for pool metrics.
const METRICS_PREFIX: &str = "pools";

/// The message buffer and element pools of a device.
///
/// Cloning is cheap and every clone refers to the same pools.
#[derive(Clone, Debug)]
pub struct Pools {
    config: Config,
    message_buffers: Pool<MessageBuffer>,
    inbound_elements: Pool<InboundElement>,
    outbound_elements: Pool<OutboundElement>,
}

impl Pools {
    /// Creates the pools, registering their metrics with `registry`.
    pub fn new(config: Config, registry: &mut Registry) -> Self {
        let registry = registry.sub_registry_with_prefix(METRICS_PREFIX);
        let message_buffers = Pool::new(
            "message_buffers",
            config.pool_size,
            config.prefill,
            registry,
            MessageBuffer::new,
        );
        let inbound_elements = Pool::new(
            "inbound_elements",
            config.pool_size,
            config.prefill,
            registry,
            InboundElement::default,
        );
        let outbound_elements = Pool::new(
            "outbound_elements",
            config.pool_size,
            config.prefill,
            registry,
            OutboundElement::default,
        );
        Self {
            config,
            message_buffers,
            inbound_elements,
            outbound_elements,
        }
    }

    /// Returns the configuration the pools (and their queues) were created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Takes a message buffer.
    pub fn get_message_buffer(&self) -> Pooled<MessageBuffer> {
        self.message_buffers.get()
    }

    /// Returns a message buffer.
    pub fn put_message_buffer(&self, buffer: Pooled<MessageBuffer>) {
        self.message_buffers.put(buffer);
    }

    /// Takes an inbound element (with no buffer attached).
    pub fn get_inbound_element(&self) -> Pooled<InboundElement> {
        self.inbound_elements.get()
    }

    /// Returns an inbound element, along with any buffer still attached to it.
    pub fn put_inbound_element(&self, element: Pooled<InboundElement>) {
        self.inbound_elements.put(element);
    }

    /// Takes an outbound element (with no buffer attached).
    pub fn get_outbound_element(&self) -> Pooled<OutboundElement> {
        self.outbound_elements.get()
    }

    /// Returns an outbound element, along with any buffer still attached to it.
    pub fn put_outbound_element(&self, element: Pooled<OutboundElement>) {
        self.outbound_elements.put(element);
    }

    /// Returns the message buffer pool.
    pub fn message_buffers(&self) -> &Pool<MessageBuffer> {
        &self.message_buffers
    }

    /// Returns the inbound element pool.
    pub fn inbound_elements(&self) -> &Pool<InboundElement> {
        &self.inbound_elements
    }

    /// Returns the outbound element pool.
    pub fn outbound_elements(&self) -> &Pool<OutboundElement> {
        &self.outbound_elements
    }

    /// Creates the handshake queue, closed once `producers` producers have completed.
    pub fn handshake_queue(&self, producers: usize) -> Arc<HandshakeQueue> {
        Arc::new(ClosableQueue::new(
            self.config.handshake_queue_size,
            producers,
        ))
    }

    /// Creates the encryption queue, closed once `producers` producers have completed.
    pub fn encryption_queue(&self, producers: usize) -> Arc<EncryptionQueue> {
        Arc::new(ClosableQueue::new(
            self.config.outbound_queue_size,
            producers,
        ))
    }

    /// Creates the decryption queue, closed once `producers` producers have completed.
    pub fn decryption_queue(&self, producers: usize) -> Arc<DecryptionQueue> {
        Arc::new(ClosableQueue::new(
            self.config.inbound_queue_size,
            producers,
        ))
    }

    /// Creates an inbound queue drained back into these pools.
    pub fn inbound_queue(&self) -> Arc<InboundQueue> {
        Arc::new(AutodrainingQueue::new(
            self.clone(),
            self.config.inbound_queue_size,
        ))
    }

    /// Creates an outbound queue drained back into these pools.
    pub fn outbound_queue(&self) -> Arc<OutboundQueue> {
        Arc::new(AutodrainingQueue::new(
            self.clone(),
            self.config.outbound_queue_size,
        ))
    }
}

impl Flush<Pooled<InboundElement>> for Pools {
    fn flush(&self, mut element: Pooled<InboundElement>) {
        trace!(counter = element.counter, "flushing inbound element");
        if let Some(buffer) = element.buffer.take() {
            self.put_message_buffer(buffer);
        }
        self.put_inbound_element(element);
    }
}

impl Flush<Pooled<OutboundElement>> for Pools {
    fn flush(&self, mut element: Pooled<OutboundElement>) {
        trace!(nonce = element.nonce, "flushing outbound element");
        if let Some(buffer) = element.buffer.take() {
            self.put_message_buffer(buffer);
        }
        self.put_outbound_element(element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandshakeElement, MessageType};

    fn test_pools() -> Pools {
        let config = Config {
            pool_size: NZUsize!(8),
            ..Default::default()
        };
        Pools::new(config, &mut Registry::default())
    }

    #[test]
    fn test_flush_returns_buffer_and_element() {
        let pools = test_pools();

        let mut element = pools.get_inbound_element();
        element.buffer = Some(pools.get_message_buffer());
        element.packet = 0..64;
        assert_eq!(pools.message_buffers().outstanding(), 1);
        assert_eq!(pools.inbound_elements().outstanding(), 1);

        pools.flush(element);
        assert_eq!(pools.message_buffers().outstanding(), 0);
        assert_eq!(pools.message_buffers().available(), 1);
        assert_eq!(pools.inbound_elements().outstanding(), 0);
        assert_eq!(pools.inbound_elements().available(), 1);

        let mut element = pools.get_outbound_element();
        element.buffer = Some(pools.get_message_buffer());
        pools.flush(element);
        assert_eq!(pools.message_buffers().outstanding(), 0);
        assert_eq!(pools.outbound_elements().available(), 1);
    }

    #[test]
    fn test_put_element_releases_attached_buffer() {
        let pools = test_pools();

        let mut element = pools.get_outbound_element();
        element.buffer = Some(pools.get_message_buffer());
        pools.put_outbound_element(element);

        // The element's reset released the buffer exactly once
        assert_eq!(pools.message_buffers().outstanding(), 0);
        assert_eq!(pools.message_buffers().available(), 1);

        // A recycled element carries nothing over
        let element = pools.get_outbound_element();
        assert!(element.buffer.is_none());
        assert!(element.packet().is_empty());
    }

    #[test]
    fn test_handshake_queue_returns_buffers() {
        let pools = test_pools();
        let queue = pools.handshake_queue(2);
        assert_eq!(queue.capacity(), pools.config().handshake_queue_size.get());

        let endpoint = "10.0.0.1:51820".parse().unwrap();
        futures::executor::block_on(async {
            for msg_type in [1u32, 2] {
                let mut buffer = pools.get_message_buffer();
                buffer[..4].copy_from_slice(&msg_type.to_le_bytes());
                let element = HandshakeElement::new(buffer, 148, endpoint).unwrap();
                queue.push(element).await;
                queue.complete();
            }

            let mut types = Vec::new();
            while let Some(element) = queue.pop().await {
                types.push(element.msg_type);
            }
            assert_eq!(types, [MessageType::Initiation, MessageType::Response]);
        });

        // Consumed elements released their buffers
        assert_eq!(pools.message_buffers().outstanding(), 0);
    }

    #[test]
    fn test_closed_queue_drop_releases_buffers() {
        let pools = test_pools();
        let queue = pools.encryption_queue(1);
        futures::executor::block_on(async {
            for _ in 0..3 {
                let mut element = pools.get_outbound_element();
                element.buffer = Some(pools.get_message_buffer());
                queue.push(element).await;
            }
        });
        queue.complete();
        assert_eq!(pools.message_buffers().outstanding(), 3);

        // Unconsumed elements are released with the queue
        drop(queue);
        assert_eq!(pools.message_buffers().outstanding(), 0);
        assert_eq!(pools.outbound_elements().outstanding(), 0);
        assert_eq!(pools.message_buffers().available(), 3);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_push_after_close_releases_buffer() {
        crate::test_utils::init_logging();
        let pools = test_pools();
        let queue = pools.encryption_queue(1);
        queue.complete();

        let mut element = pools.get_outbound_element();
        element.buffer = Some(pools.get_message_buffer());
        futures::executor::block_on(queue.push(element));

        // The rejected element was dropped along with its buffer
        assert_eq!(pools.message_buffers().outstanding(), 0);
        assert_eq!(pools.outbound_elements().outstanding(), 0);
        assert!(futures::executor::block_on(queue.pop()).is_none());
    }

    #[test]
    fn test_buffer_reuse_round_trip() {
        let pools = test_pools();
        let queue = pools.outbound_queue();

        let mut element = pools.get_outbound_element();
        let mut buffer = pools.get_message_buffer();
        buffer[..4].copy_from_slice(b"ping");
        element.buffer = Some(buffer);
        element.packet = 0..4;
        assert!(queue.push(element));

        let mut element = futures::executor::block_on(queue.pop()).unwrap();
        assert_eq!(element.packet(), b"ping");
        let buffer = element.buffer.take().unwrap();
        pools.put_message_buffer(buffer);
        pools.put_outbound_element(element);

        // The buffer is available again with no owner attached
        assert_eq!(pools.message_buffers().outstanding(), 0);
        assert_eq!(pools.message_buffers().available(), 1);
        let buffer = pools.get_message_buffer();
        assert!(buffer.is_tracked());
        assert_eq!(pools.message_buffers().outstanding(), 1);
    }
}
