//! Frame types and the decoded response wrapper.

use bytes::Bytes;

use crate::error::NsqError;

/// Combined length of the size and type fields preceding every payload.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Payload the broker pushes inside a Response frame to probe liveness.
pub const HEARTBEAT: &[u8] = b"_heartbeat_";

/// The three frame types the broker emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Reply to the most recent response-expecting command (or a
    /// heartbeat probe).
    Response = 0,
    /// Broker-reported error for the most recent command.
    Error = 1,
    /// An asynchronously pushed message for a subscribed channel.
    Message = 2,
}

impl TryFrom<u32> for FrameType {
    type Error = NsqError;

    fn try_from(value: u32) -> Result<Self, NsqError> {
        match value {
            0 => Ok(FrameType::Response),
            1 => Ok(FrameType::Error),
            2 => Ok(FrameType::Message),
            other => Err(NsqError::Protocol(format!(
                "unknown frame type: {other}"
            ))),
        }
    }
}

/// A complete decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub data: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, data: Bytes) -> Self {
        Self { frame_type, data }
    }

    /// Whether this is a heartbeat probe from the broker.
    ///
    /// Heartbeats arrive as Response frames carrying the literal
    /// `_heartbeat_` payload and must be answered with NOP ahead of any
    /// other queued work.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self.frame_type, FrameType::Response | FrameType::Error)
            && self.data.as_ref() == HEARTBEAT
    }

    /// Payload interpreted as UTF-8, lossily, for logging and error
    /// strings.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Encode this frame to wire bytes. Used by the publisher-facing
    /// tests and fake brokers; the client itself only decodes frames.
    pub fn encode(&self) -> Vec<u8> {
        let size = 4 + self.data.len() as u32;
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + self.data.len());
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&(self.frame_type as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// A Response/Error frame normalized for the pending-response channel.
///
/// The read loop folds both frame types into this shape: an Error frame
/// (or a Response whose payload carries the conventional `E_` prefix)
/// becomes a response with `error` populated.
#[derive(Debug, Clone)]
pub struct ProtocolResponse {
    pub data: Bytes,
    pub error: Option<String>,
}

impl ProtocolResponse {
    pub fn from_frame(frame: &Frame) -> Self {
        let text = frame.text();
        let error = match frame.frame_type {
            FrameType::Error => Some(text),
            _ if text.starts_with("E_") => Some(text),
            _ => None,
        };

        Self {
            data: frame.data.clone(),
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
