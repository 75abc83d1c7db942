//! Client-to-broker commands and their wire encoding.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::Result;
use crate::protocol::message::MessageId;

/// Magic preamble written once per connection, before any framed
/// traffic. Unframed, no response expected.
pub const MAGIC_V2: &[u8] = b"  V2";

/// The JSON document sent with IDENTIFY.
///
/// Field names match the broker's handshake schema, so this serializes
/// directly.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyBody {
    pub client_id: String,
    pub hostname: String,
    pub feature_negotiation: bool,
    /// Desired heartbeat interval in milliseconds.
    pub heartbeat_interval: u64,
    /// Broker-side in-flight timeout in milliseconds.
    pub msg_timeout: u64,
    pub user_agent: String,
}

/// Every request the client can issue.
///
/// [`wants_response`](Command::wants_response) marks the commands that
/// must be followed by reading exactly one Response/Error frame.
#[derive(Debug, Clone)]
pub enum Command {
    /// `IDENTIFY\n` + 4-byte length + JSON options document.
    Identify(IdentifyBody),
    /// `SUB <topic> <channel>\n`
    Subscribe { topic: String, channel: String },
    /// `RDY <count>\n`: how many additional undelivered messages this
    /// consumer is willing to accept.
    Ready(u32),
    /// `FIN <id>\n`
    Finish(MessageId),
    /// `REQ <id> <defer_ms>\n`
    Requeue { id: MessageId, defer_ms: u32 },
    /// `TOUCH <id>\n`: reset the broker-side in-flight timeout.
    Touch(MessageId),
    /// `PUB <topic>\n` + 4-byte length + raw body.
    Publish { topic: String, body: Bytes },
    /// `CLS\n`
    Close,
    /// `NOP\n`, the heartbeat reply.
    Nop,
}

impl Command {
    /// Whether the broker answers this command with a Response/Error
    /// frame that the sender must consume.
    pub fn wants_response(&self) -> bool {
        matches!(
            self,
            Command::Identify(_) | Command::Subscribe { .. } | Command::Publish { .. }
        )
    }

    /// Command verb, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Identify(_) => "IDENTIFY",
            Command::Subscribe { .. } => "SUB",
            Command::Ready(_) => "RDY",
            Command::Finish(_) => "FIN",
            Command::Requeue { .. } => "REQ",
            Command::Touch(_) => "TOUCH",
            Command::Publish { .. } => "PUB",
            Command::Close => "CLS",
            Command::Nop => "NOP",
        }
    }

    /// Encode to wire bytes.
    ///
    /// Only IDENTIFY can fail, if the options document does not
    /// serialize.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();

        match self {
            Command::Identify(body) => {
                let json = serde_json::to_vec(body)?;
                buf.put_slice(b"IDENTIFY\n");
                buf.put_u32(json.len() as u32);
                buf.put_slice(&json);
            }
            Command::Subscribe { topic, channel } => {
                buf.put_slice(b"SUB ");
                buf.put_slice(topic.as_bytes());
                buf.put_u8(b' ');
                buf.put_slice(channel.as_bytes());
                buf.put_u8(b'\n');
            }
            Command::Ready(count) => {
                buf.put_slice(b"RDY ");
                buf.put_slice(count.to_string().as_bytes());
                buf.put_u8(b'\n');
            }
            Command::Finish(id) => {
                buf.put_slice(b"FIN ");
                buf.put_slice(id.as_bytes());
                buf.put_u8(b'\n');
            }
            Command::Requeue { id, defer_ms } => {
                buf.put_slice(b"REQ ");
                buf.put_slice(id.as_bytes());
                buf.put_u8(b' ');
                buf.put_slice(defer_ms.to_string().as_bytes());
                buf.put_u8(b'\n');
            }
            Command::Touch(id) => {
                buf.put_slice(b"TOUCH ");
                buf.put_slice(id.as_bytes());
                buf.put_u8(b'\n');
            }
            Command::Publish { topic, body } => {
                buf.put_slice(b"PUB ");
                buf.put_slice(topic.as_bytes());
                buf.put_u8(b'\n');
                buf.put_u32(body.len() as u32);
                buf.put_slice(body);
            }
            Command::Close => buf.put_slice(b"CLS\n"),
            Command::Nop => buf.put_slice(b"NOP\n"),
        }

        Ok(buf.freeze())
    }
}
