//! The message payload format carried inside Message frames.
//!
//! ```text
//! ┌───────────┬──────────┬──────────┬──────────────┐
//! │ Timestamp │ Attempts │ ID       │ Body         │
//! │ 8 bytes   │ 2 bytes  │ 16 bytes │ remaining    │
//! │ i64 BE    │ u16 BE   │ ASCII    │              │
//! └───────────┴──────────┴──────────┴──────────────┘
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NsqError, Result};

/// Message IDs are always exactly 16 bytes.
pub const MESSAGE_ID_LENGTH: usize = 16;

/// Fixed-size prefix before the body: timestamp + attempts + id.
pub const MESSAGE_HEADER_LENGTH: usize = 8 + 2 + MESSAGE_ID_LENGTH;

/// The fixed 16-byte message token assigned by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub [u8; MESSAGE_ID_LENGTH]);

impl MessageId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    /// Broker-assigned IDs are printable ASCII; render them that way for
    /// logs and wire commands.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A message delivered by the broker.
#[derive(Debug, Clone)]
pub struct Message {
    /// Nanosecond timestamp assigned by the broker.
    pub timestamp: i64,
    /// Delivery attempt counter, authoritative from the broker and only
    /// increasing.
    pub attempts: u16,
    pub id: MessageId,
    pub body: Bytes,
}

impl Message {
    /// Decode a message from a Message frame's payload.
    pub fn decode(mut data: Bytes) -> Result<Self> {
        if data.len() < MESSAGE_HEADER_LENGTH {
            return Err(NsqError::Protocol(format!(
                "message payload too short: {} bytes, need at least {}",
                data.len(),
                MESSAGE_HEADER_LENGTH
            )));
        }

        let timestamp = data.get_i64();
        let attempts = data.get_u16();

        let mut id = [0u8; MESSAGE_ID_LENGTH];
        data.copy_to_slice(&mut id);

        Ok(Self {
            timestamp,
            attempts,
            id: MessageId(id),
            body: data,
        })
    }

    /// Encode back to the frame payload layout. The client never sends
    /// messages in this shape; this exists for the round-trip property
    /// and for test brokers.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_LENGTH + self.body.len());
        buf.put_i64(self.timestamp);
        buf.put_u16(self.attempts);
        buf.put_slice(&self.id.0);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Body interpreted as UTF-8.
    pub fn body_utf8(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
