//! A live session with a single broker.
//!
//! [`Connection::connect`] dials the endpoint, performs the magic +
//! IDENTIFY handshake, and spawns two background tasks: the writer task
//! (see [`crate::writer`]) and a read loop that routes every inbound
//! frame. Heartbeats are answered with NOP directly from the read loop,
//! message frames are handed to the registered callback, and
//! Response/Error frames are delivered to whichever sender is currently
//! awaiting one.
//!
//! At most one response-expecting command is in flight at a time: the
//! receiver side of the response channel doubles as the lock that
//! serializes request/response exchanges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionOptions, Endpoint};
use crate::error::{NsqError, Result};
use crate::protocol::{
    read_frame, Command, Frame, FrameType, IdentifyBody, Message, ProtocolResponse, MAGIC_V2,
};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Invoked once per decoded message frame.
///
/// Each invocation runs on its own task, so a slow callback delays only
/// its own message; the read loop keeps draining frames and answering
/// heartbeats.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Invoked by the read loop whenever a broker heartbeat arrives, after
/// the NOP reply has been queued. Unlike [`MessageCallback`] this runs
/// on the read loop task itself and must not block.
pub type HeartbeatCallback = Arc<dyn Fn() + Send + Sync>;

/// Observers attached to a session at connect time.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_message: Option<MessageCallback>,
    pub on_heartbeat: Option<HeartbeatCallback>,
}

/// How long `close` waits for the broker to acknowledge CLS before
/// tearing the session down anyway.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// An established, identified session with one broker.
#[derive(Debug)]
pub struct Connection {
    endpoint: Endpoint,
    options: ConnectionOptions,
    writer: WriterHandle,
    /// Receiver for Response/Error frames. Locking it claims the
    /// request/response slot; capacity 1 because the protocol never has
    /// more than one response outstanding per connection.
    response_rx: Mutex<mpsc::Receiver<ProtocolResponse>>,
    cancel: CancellationToken,
    closing: Arc<AtomicBool>,
}

impl Connection {
    /// Dial `endpoint` and complete the handshake.
    ///
    /// `callbacks.on_message` receives every message frame for the
    /// lifetime of the session; publish-only connections pass
    /// `Callbacks::default()`.
    pub async fn connect(
        endpoint: &Endpoint,
        options: &ConnectionOptions,
        callbacks: Callbacks,
    ) -> Result<Self> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(NsqError::Socket)?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (writer, _writer_task) = spawn_writer_task(write_half);
        let (response_tx, response_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let closing = Arc::new(AtomicBool::new(false));

        let nop = Command::Nop.encode()?;
        tokio::spawn(read_loop(ReadLoop {
            reader: read_half,
            writer: writer.clone(),
            response_tx,
            callbacks,
            cancel: cancel.clone(),
            closing: closing.clone(),
            max_frame_size: options.max_frame_size,
            endpoint: endpoint.to_string(),
            nop,
        }));

        let conn = Self {
            endpoint: endpoint.clone(),
            options: options.clone(),
            writer,
            response_rx: Mutex::new(response_rx),
            cancel,
            closing,
        };
        conn.handshake().await?;

        tracing::debug!(endpoint = %conn.endpoint, "connection established");
        Ok(conn)
    }

    /// Write the magic preamble and exchange IDENTIFY.
    async fn handshake(&self) -> Result<()> {
        self.writer.send(Bytes::from_static(MAGIC_V2)).await?;

        let identify = Command::Identify(IdentifyBody {
            client_id: self.options.client_id.clone(),
            hostname: self.options.hostname.clone(),
            feature_negotiation: false,
            heartbeat_interval: self.options.heartbeat_interval.as_millis() as u64,
            msg_timeout: self.options.message_timeout.as_millis() as u64,
            user_agent: concat!("nsqling/", env!("CARGO_PKG_VERSION")).to_string(),
        });
        let response = self.exchange(identify.encode()?).await?;
        if let Some(error) = response.error {
            return Err(NsqError::Request(error));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the session is still usable (read loop alive and not
    /// deliberately closed).
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.closing.load(Ordering::SeqCst)
    }

    /// Send a command, awaiting the broker's Response/Error frame for
    /// the commands that produce one.
    ///
    /// Fire-and-forget commands (RDY, FIN, REQ, TOUCH, NOP) return
    /// `Ok(None)` as soon as the bytes are queued. For IDENTIFY, SUB
    /// and PUB, a
    /// broker Error frame or `E_` response surfaces as
    /// [`NsqError::Request`]. Silence past the configured response
    /// timeout is [`NsqError::Protocol`]: the broker owes a frame, and
    /// not sending one is a violation, not a transport hiccup.
    pub async fn send(&self, command: Command) -> Result<Option<ProtocolResponse>> {
        // CLS itself goes through the writer directly in close().
        if !self.is_open() {
            return Err(NsqError::Connection(format!(
                "connection to {} is closed",
                self.endpoint
            )));
        }

        let wants_response = command.wants_response();
        tracing::trace!(endpoint = %self.endpoint, command = command.name(), "send");
        let bytes = command.encode()?;

        if !wants_response {
            self.writer.send(bytes).await?;
            return Ok(None);
        }

        let response = self.exchange(bytes).await?;
        match response.error {
            Some(error) => Err(NsqError::Request(error)),
            None => Ok(Some(response)),
        }
    }

    /// One request/response exchange. Holding the receiver lock across
    /// the write keeps a concurrent sender from stealing our response.
    async fn exchange(&self, bytes: Bytes) -> Result<ProtocolResponse> {
        let mut rx = self.response_rx.lock().await;
        // Drop any response left over from an exchange that timed out.
        while rx.try_recv().is_ok() {}

        self.writer.send(bytes).await?;
        match tokio::time::timeout(self.options.response_timeout, rx.recv()).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(NsqError::Connection(
                "connection closed before the response arrived".into(),
            )),
            Err(_) => Err(NsqError::Protocol(format!(
                "no response from {} within {:?}",
                self.endpoint, self.options.response_timeout
            ))),
        }
    }

    /// Graceful shutdown: best-effort CLS, a short grace period for the
    /// broker to drop the session, then cancellation of both tasks.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(endpoint = %self.endpoint, "closing connection");

        if let Ok(bytes) = Command::Close.encode() {
            if self.writer.send(bytes).await.is_ok() {
                // The broker answers CLS by closing the stream, which
                // ends the read loop and trips the token.
                let _ = tokio::time::timeout(CLOSE_GRACE, self.cancel.cancelled()).await;
            }
        }
        self.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ReadLoop {
    reader: OwnedReadHalf,
    writer: WriterHandle,
    response_tx: mpsc::Sender<ProtocolResponse>,
    callbacks: Callbacks,
    cancel: CancellationToken,
    closing: Arc<AtomicBool>,
    max_frame_size: u32,
    endpoint: String,
    nop: Bytes,
}

/// Routes inbound frames until the stream ends or the token is
/// cancelled. Cancels the token on exit so the rest of the session
/// observes the death of the read loop.
async fn read_loop(mut ctx: ReadLoop) {
    loop {
        let frame = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = read_frame(&mut ctx.reader, ctx.max_frame_size) => match result {
                Ok(frame) => frame,
                Err(e) => {
                    if !ctx.closing.load(Ordering::SeqCst) {
                        tracing::warn!(endpoint = %ctx.endpoint, "read loop stopped: {e}");
                    }
                    break;
                }
            },
        };

        if frame.is_heartbeat() {
            tracing::trace!(endpoint = %ctx.endpoint, "heartbeat");
            if ctx.writer.send(ctx.nop.clone()).await.is_err() {
                break;
            }
            if let Some(on_heartbeat) = &ctx.callbacks.on_heartbeat {
                on_heartbeat();
            }
            continue;
        }

        if !dispatch_frame(&ctx, frame) {
            break;
        }
    }
    ctx.cancel.cancel();
}

/// Returns false when the frame is unusable and the session must end.
fn dispatch_frame(ctx: &ReadLoop, frame: Frame) -> bool {
    match frame.frame_type {
        FrameType::Message => match Message::decode(frame.data) {
            Ok(message) => {
                if let Some(callback) = &ctx.callbacks.on_message {
                    // Fan out on a fresh task so a slow callback cannot
                    // hold up heartbeat replies or later frames.
                    let callback = callback.clone();
                    tokio::spawn(async move { callback(message) });
                } else {
                    tracing::warn!(
                        endpoint = %ctx.endpoint,
                        id = %message.id,
                        "dropping message frame on a connection with no consumer",
                    );
                }
                true
            }
            Err(e) => {
                tracing::error!(endpoint = %ctx.endpoint, "undecodable message frame: {e}");
                false
            }
        },
        FrameType::Response | FrameType::Error => {
            let response = ProtocolResponse::from_frame(&frame);
            if let Some(error) = &response.error {
                tracing::warn!(endpoint = %ctx.endpoint, "broker error frame: {error}");
            }
            // A response nobody is waiting for is stale (the exchange
            // that requested it already timed out); dropping it is the
            // right disposition.
            if ctx.response_tx.try_send(response).is_err() {
                tracing::warn!(endpoint = %ctx.endpoint, "dropping response with no awaiting sender");
            }
            true
        }
    }
}
