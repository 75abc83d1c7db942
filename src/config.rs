//! Connection and subscriber configuration.
//!
//! Parsing of connection strings is out of scope for this crate; callers
//! hand over already-resolved endpoints and values. The structs here only
//! carry them and supply the protocol's conventional defaults.

use std::fmt;
use std::time::Duration;

/// Default nsqd TCP port.
pub const DEFAULT_TCP_PORT: u16 = 4150;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(8);
const DEFAULT_MAX_RECONNECTION_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_FRAME_SIZE: u32 = 2 * 1024 * 1024;
const DEFAULT_MAX_IN_FLIGHT: usize = 1;
const DEFAULT_MAX_RETRY_ATTEMPTS: u16 = 3;
const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// A resolved broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-connection settings shared by publishers and consumers.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Hostname reported in the IDENTIFY handshake.
    pub hostname: String,

    /// Client identifier reported in the IDENTIFY handshake.
    pub client_id: String,

    /// How often the broker should push heartbeat frames.
    pub heartbeat_interval: Duration,

    /// Broker-side in-flight timeout for a delivered message.
    pub message_timeout: Duration,

    /// Upper bound on retries performed by the reconnection layer.
    pub max_reconnection_attempts: u32,

    /// Base delay for the linear reconnect backoff. The wait before
    /// attempt `n` is `initial_backoff * n`, so the first attempt never
    /// waits.
    pub initial_backoff: Duration,

    /// How long a sender waits for the Response/Error frame of a
    /// response-expecting command before treating the silence as a
    /// protocol error.
    pub response_timeout: Duration,

    /// Frames declaring a payload larger than this are rejected before
    /// the payload is read.
    pub max_frame_size: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let client_id = format!("nsqling-{}@{}", std::process::id(), hostname);

        Self {
            hostname,
            client_id,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            max_reconnection_attempts: DEFAULT_MAX_RECONNECTION_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Settings for a subscribing topology: where to find brokers and how
/// aggressively to consume from them.
#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    /// Connection-level settings applied to every consumer connection.
    pub connection: ConnectionOptions,

    /// Statically configured broker endpoints, always part of the
    /// resolved set.
    pub nsqd_endpoints: Vec<Endpoint>,

    /// Base URIs of discovery-service (lookupd) instances queried for
    /// additional producers of the topic.
    pub lookupd_endpoints: Vec<String>,

    /// Maximum number of concurrently executing message handlers per
    /// consumer, and the initial RDY count advised to the broker.
    pub max_in_flight: usize,

    /// Requeue ceiling: once a message's broker-maintained attempt
    /// counter exceeds this, further requeues fail locally.
    pub max_retry_attempts: u16,

    /// How often the topology manager re-resolves endpoints and
    /// reconciles its consumer set.
    pub reconcile_interval: Duration,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            nsqd_endpoints: Vec::new(),
            lookupd_endpoints: Vec::new(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}
