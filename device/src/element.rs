//! Queue elements passed between device stages.

use crate::{pool::Reset, Pooled, MAX_MESSAGE_SIZE};
use std::{
    net::SocketAddr,
    ops::{Deref, DerefMut, Range},
};

/// A fixed-size block holding one message read from (or destined for) the network.
pub struct MessageBuffer(Box<[u8]>);

impl MessageBuffer {
    /// Allocates a zeroed buffer of [MAX_MESSAGE_SIZE] bytes.
    pub fn new() -> Self {
        Self(vec![0; MAX_MESSAGE_SIZE].into_boxed_slice())
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for MessageBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for MessageBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl std::fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("capacity", &self.0.len())
            .finish()
    }
}

// Contents are left in place; every user writes before it reads.
impl Reset for MessageBuffer {
    fn reset(&mut self) {}
}

/// The kind of a tunnel message, read from its little-endian header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    Initiation = 1,
    Response = 2,
    CookieReply = 3,
    Transport = 4,
}

impl MessageType {
    /// Reads the message type from the first four bytes of `packet`.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let header: [u8; 4] = packet.get(..4)?.try_into().ok()?;
        Self::try_from(u32::from_le_bytes(header)).ok()
    }

    /// Returns `true` for the message kinds processed by the handshake stage.
    pub const fn is_handshake(self) -> bool {
        !matches!(self, Self::Transport)
    }
}

impl TryFrom<u32> for MessageType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Initiation),
            2 => Ok(Self::Response),
            3 => Ok(Self::CookieReply),
            4 => Ok(Self::Transport),
            other => Err(other),
        }
    }
}

/// A handshake message awaiting the handshake stage.
///
/// Passed through the queue by value; its buffer returns to the pool when the element is dropped.
#[derive(Debug)]
pub struct HandshakeElement {
    pub msg_type: MessageType,
    pub buffer: Pooled<MessageBuffer>,
    /// Number of bytes of `buffer` holding the message.
    pub len: usize,
    pub endpoint: SocketAddr,
}

impl HandshakeElement {
    /// Wraps the first `len` bytes of `buffer`, if they hold a handshake message.
    ///
    /// Transport messages and unknown types are rejected (and the buffer is dropped).
    pub fn new(buffer: Pooled<MessageBuffer>, len: usize, endpoint: SocketAddr) -> Option<Self> {
        let msg_type = MessageType::parse(buffer.get(..len)?)?;
        if !msg_type.is_handshake() {
            return None;
        }
        Some(Self {
            msg_type,
            buffer,
            len,
            endpoint,
        })
    }

    /// Returns the message bytes.
    pub fn packet(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
}

/// A transport message awaiting decryption.
#[derive(Debug, Default)]
pub struct InboundElement {
    pub buffer: Option<Pooled<MessageBuffer>>,
    /// Range of `buffer` holding the packet.
    pub packet: Range<usize>,
    pub counter: u64,
    pub endpoint: Option<SocketAddr>,
}

impl InboundElement {
    /// Returns the packet bytes.
    ///
    /// Empty if no buffer is attached or `packet` does not lie within the buffer.
    pub fn packet(&self) -> &[u8] {
        self.buffer
            .as_ref()
            .and_then(|buffer| buffer.get(self.packet.clone()))
            .unwrap_or_default()
    }

    /// Returns the packet bytes mutably (empty under the same conditions as `packet`).
    pub fn packet_mut(&mut self) -> &mut [u8] {
        let range = self.packet.clone();
        self.buffer
            .as_mut()
            .and_then(|buffer| buffer.get_mut(range))
            .unwrap_or_default()
    }
}

impl Reset for InboundElement {
    fn reset(&mut self) {
        // Dropping the buffer hands it back to its own pool
        self.buffer = None;
        self.packet = 0..0;
        self.counter = 0;
        self.endpoint = None;
    }
}

/// A plaintext packet awaiting encryption.
#[derive(Debug, Default)]
pub struct OutboundElement {
    pub buffer: Option<Pooled<MessageBuffer>>,
    /// Range of `buffer` holding the packet.
    pub packet: Range<usize>,
    pub nonce: u64,
}

impl OutboundElement {
    /// Returns the packet bytes.
    ///
    /// Empty if no buffer is attached or `packet` does not lie within the buffer.
    pub fn packet(&self) -> &[u8] {
        self.buffer
            .as_ref()
            .and_then(|buffer| buffer.get(self.packet.clone()))
            .unwrap_or_default()
    }

    /// Returns the packet bytes mutably (empty under the same conditions as `packet`).
    pub fn packet_mut(&mut self) -> &mut [u8] {
        let range = self.packet.clone();
        self.buffer
            .as_mut()
            .and_then(|buffer| buffer.get_mut(range))
            .unwrap_or_default()
    }
}

impl Reset for OutboundElement {
    fn reset(&mut self) {
        self.buffer = None;
        self.packet = 0..0;
        self.nonce = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pool;
    use prometheus_client::registry::Registry;

    fn buffers() -> Pool<MessageBuffer> {
        let mut registry = Registry::default();
        Pool::new("buffers", NZUsize!(4), false, &mut registry, MessageBuffer::new)
    }

    fn endpoint() -> SocketAddr {
        "127.0.0.1:51820".parse().unwrap()
    }

    #[test]
    fn test_message_buffer_size() {
        let buffer = MessageBuffer::new();
        assert_eq!(buffer.len(), MAX_MESSAGE_SIZE);
        assert!(buffer.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn test_message_type_parse() {
        assert_eq!(MessageType::parse(&[1, 0, 0, 0]), Some(MessageType::Initiation));
        assert_eq!(MessageType::parse(&[4, 0, 0, 0, 9]), Some(MessageType::Transport));
        assert_eq!(MessageType::parse(&[5, 0, 0, 0]), None);
        assert_eq!(MessageType::parse(&[1, 0, 0]), None);
        assert!(MessageType::CookieReply.is_handshake());
        assert!(!MessageType::Transport.is_handshake());
    }

    #[test]
    fn test_handshake_element_rejects_transport() {
        let pool = buffers();

        let mut buffer = pool.get();
        buffer[..4].copy_from_slice(&2u32.to_le_bytes());
        let element = HandshakeElement::new(buffer, 32, endpoint()).unwrap();
        assert_eq!(element.msg_type, MessageType::Response);
        assert_eq!(element.packet().len(), 32);
        drop(element);

        let mut buffer = pool.get();
        buffer[..4].copy_from_slice(&4u32.to_le_bytes());
        assert!(HandshakeElement::new(buffer, 32, endpoint()).is_none());

        // Both buffers made it back
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_inbound_element_reset_releases_buffer() {
        let pool = buffers();
        let mut element = InboundElement {
            buffer: Some(pool.get()),
            packet: 16..48,
            counter: 7,
            endpoint: Some(endpoint()),
        };
        element.packet_mut().fill(0xaa);
        assert_eq!(element.packet(), &[0xaa; 32][..]);
        assert_eq!(pool.outstanding(), 1);

        element.reset();
        assert!(element.buffer.is_none());
        assert!(element.packet().is_empty());
        assert_eq!(element.counter, 0);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_packet_outside_buffer_is_empty() {
        let pool = buffers();
        let mut element = InboundElement {
            buffer: Some(pool.get()),
            packet: 0..MAX_MESSAGE_SIZE + 1,
            ..Default::default()
        };
        assert!(element.packet().is_empty());
        assert!(element.packet_mut().is_empty());

        #[allow(clippy::reversed_empty_ranges)]
        let inverted = 48..16;
        let mut element = OutboundElement {
            buffer: Some(pool.get()),
            packet: inverted,
            nonce: 1,
        };
        assert!(element.packet().is_empty());
        assert!(element.packet_mut().is_empty());

        // The full buffer is still addressable
        element.packet = 0..MAX_MESSAGE_SIZE;
        assert_eq!(element.packet().len(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_outbound_element_reset_releases_buffer() {
        let pool = buffers();
        let mut element = OutboundElement {
            buffer: Some(pool.get()),
            packet: 0..8,
            nonce: 3,
        };
        assert_eq!(element.packet().len(), 8);
        element.reset();
        assert_eq!(element.nonce, 0);
        assert_eq!(pool.outstanding(), 0);
    }
}
