//! Bounded-concurrency message consumer for one topic/channel on one
//! broker.
//!
//! Every received message is dispatched onto its own task, gated by a
//! semaphore with `max_in_flight` permits: under a burst the read loop
//! keeps draining frames while dispatch tasks queue on the semaphore,
//! so no message is ever dropped and no more than `max_in_flight`
//! handlers run at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::{Endpoint, SubscriberOptions};
use crate::context::MessageContext;
use crate::error::{HandlerError, Result};
use crate::protocol::{Command, Message};
use crate::reconnect::ReconnectingConnection;

/// Boxed future returned by a message handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<(), HandlerError>> + Send>>;

/// The application's message processing function. Settling the message
/// (finish/requeue) is the handler's responsibility, via the context.
pub type MessageHandler = Arc<dyn Fn(MessageContext) -> HandlerFuture + Send + Sync>;

/// Observer invoked after the failure policy has been applied to a
/// handler error.
pub type ErrorCallback = Arc<dyn Fn(&HandlerError) + Send + Sync>;

/// A subscription to one topic/channel over one (self-healing) broker
/// connection.
pub struct Consumer {
    topic: String,
    channel: String,
    connection: Arc<ReconnectingConnection>,
    max_in_flight: usize,
    max_retry_attempts: u16,
    ready: AtomicBool,
}

impl Consumer {
    pub fn new(endpoint: Endpoint, topic: String, channel: String, options: &SubscriberOptions) -> Self {
        let connection = Arc::new(ReconnectingConnection::new(
            endpoint,
            options.connection.clone(),
        ));
        Self {
            topic,
            channel,
            connection,
            max_in_flight: options.max_in_flight,
            max_retry_attempts: options.max_retry_attempts,
            ready: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Identity key of the underlying broker endpoint.
    pub fn connection_id(&self) -> &str {
        self.connection.id()
    }

    /// Whether `start` has completed and `stop` has not been called.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Connect, subscribe, and advise an initial RDY of `max_in_flight`.
    ///
    /// The handler runs once per delivered message, on its own task.
    /// Failures flow through the policy in [`HandlerError`]: recognized
    /// errors are logged and reported to `on_error`; unrecognized ones
    /// additionally force `RDY 0`, pausing delivery on this connection
    /// without closing it, so an operator can intervene while the
    /// session stays alive.
    pub async fn start(&self, handler: MessageHandler, on_error: Option<ErrorCallback>) -> Result<()> {
        let dispatch = Arc::new(Dispatch {
            connection: self.connection.clone(),
            topic: self.topic.clone(),
            channel: self.channel.clone(),
            max_retry_attempts: self.max_retry_attempts,
            semaphore: Arc::new(Semaphore::new(self.max_in_flight)),
            handler,
            on_error,
        });
        self.connection.set_message_callback(Arc::new(move |message| {
            let dispatch = dispatch.clone();
            tokio::spawn(dispatch.run(message));
        }));

        self.connection.connect().await?;
        self.connection
            .send(Command::Subscribe {
                topic: self.topic.clone(),
                channel: self.channel.clone(),
            })
            .await?;
        self.connection
            .send(Command::Ready(self.max_in_flight as u32))
            .await?;

        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(
            topic = %self.topic,
            channel = %self.channel,
            endpoint = %self.connection.endpoint(),
            max_in_flight = self.max_in_flight,
            "consumer started",
        );
        Ok(())
    }

    /// Advise the broker of a new ready count, without touching the
    /// local handler bound.
    pub async fn advise_ready(&self, count: u32) -> Result<()> {
        self.connection.send(Command::Ready(count)).await?;
        Ok(())
    }

    /// Close the connection. Handlers already running finish on their
    /// own tasks. Idempotent.
    pub async fn stop(&self) {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            topic = %self.topic,
            channel = %self.channel,
            endpoint = %self.connection.endpoint(),
            "consumer stopping",
        );
        self.connection.close().await;
    }
}

/// Everything a dispatch task needs, shared behind one Arc so the
/// message callback stays a cheap clone.
struct Dispatch {
    connection: Arc<ReconnectingConnection>,
    topic: String,
    channel: String,
    max_retry_attempts: u16,
    semaphore: Arc<Semaphore>,
    handler: MessageHandler,
    on_error: Option<ErrorCallback>,
}

impl Dispatch {
    async fn run(self: Arc<Self>, message: Message) {
        // Waits for a free slot instead of shedding load; the permit is
        // the in-flight bound.
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let context = MessageContext::new(
            self.connection.clone(),
            message,
            self.topic.clone(),
            self.channel.clone(),
            self.max_retry_attempts,
        );
        let id = context.id();

        if let Err(error) = (self.handler)(context).await {
            match &error {
                HandlerError::Nsq(e) => {
                    tracing::error!(topic = %self.topic, %id, "handler failed: {e}");
                }
                HandlerError::Other(e) => {
                    tracing::error!(
                        topic = %self.topic,
                        %id,
                        "unrecognized handler failure, advising RDY 0: {e}",
                    );
                    if let Err(rdy_err) = self.connection.send(Command::Ready(0)).await {
                        tracing::warn!(topic = %self.topic, "failed to advise RDY 0: {rdy_err}");
                    }
                }
            }
            if let Some(on_error) = &self.on_error {
                on_error(&error);
            }
        }
        drop(permit);
    }
}
