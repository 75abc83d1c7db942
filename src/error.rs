//! Error types for nsqling.

use thiserror::Error;

/// Main error type for all client operations.
///
/// The variants mirror the failure modes of the protocol:
/// [`Socket`](NsqError::Socket) and [`Connection`](NsqError::Connection)
/// are transport failures the reconnection layer may retry;
/// [`Protocol`](NsqError::Protocol) and [`Request`](NsqError::Request)
/// are terminal for the request that triggered them;
/// [`RequeueLimitExceeded`](NsqError::RequeueLimitExceeded) is a local
/// policy violation that never reaches the wire.
#[derive(Debug, Error)]
pub enum NsqError {
    /// The host could not be reached at all (TCP connect failed).
    ///
    /// When this happens on the very first connection attempt it is
    /// treated as "host unreachable" and surfaces immediately, without
    /// going through the backoff schedule.
    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),

    /// An established session dropped mid-flight, including the stream
    /// closing before a pending response arrived.
    #[error("connection error: {0}")]
    Connection(String),

    /// The peer violated the wire protocol: unexpected handshake frame,
    /// unknown frame type, or a frame declaring an oversized payload.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The broker reported an application-level error for the last
    /// request (conventionally an `E_`-prefixed payload).
    #[error("broker returned an error: {0}")]
    Request(String),

    /// Requeue was called on a message whose attempt counter already
    /// exceeds the configured ceiling. Nothing was sent; the caller must
    /// make a final disposition (typically `finish`).
    #[error("requeue limit exceeded: message attempted {attempts} times, max is {max}")]
    RequeueLimitExceeded { attempts: u16, max: u16 },

    /// The IDENTIFY options document could not be serialized.
    #[error("identify serialization error: {0}")]
    Identify(#[from] serde_json::Error),
}

impl NsqError {
    /// Whether the reconnection layer may retry after this error.
    ///
    /// Only transport-level failures qualify; protocol violations and
    /// broker-reported errors would fail identically on a fresh socket.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NsqError::Socket(_) | NsqError::Connection(_))
    }
}

/// Result type alias using NsqError.
pub type Result<T> = std::result::Result<T, NsqError>;

/// Error returned from a message handler, classified at the dispatch
/// boundary.
///
/// The consumer reacts to the two variants differently: a recognized
/// [`Nsq`](HandlerError::Nsq) failure only reaches the connection-error
/// callback, while an [`Other`](HandlerError::Other) failure additionally
/// advises `RDY 0` so the broker stops pushing messages on the affected
/// connection. Making the distinction explicit data keeps the policy out
/// of type-downcasting.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A failure from a client operation inside the handler
    /// (finish/requeue/touch or any other `NsqError`).
    #[error(transparent)]
    Nsq(#[from] NsqError),

    /// Any other failure raised by user code.
    #[error("handler error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Build an unrecognized handler error from a plain message.
    pub fn other(msg: impl Into<String>) -> Self {
        HandlerError::Other(msg.into().into())
    }
}
