//! Per-delivery handle given to message handlers.
//!
//! A [`MessageContext`] pairs one decoded message with the connection
//! it arrived on, so a handler can settle it (FIN), push it back (REQ),
//! or extend its broker-side timeout (TOUCH) without ever seeing the
//! connection machinery.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{NsqError, Result};
use crate::protocol::{Command, Message, MessageId};
use crate::reconnect::ReconnectingConnection;

/// One delivered message plus everything needed to settle it.
pub struct MessageContext {
    connection: Arc<ReconnectingConnection>,
    message: Message,
    topic: String,
    channel: String,
    max_retry_attempts: u16,
}

impl MessageContext {
    pub(crate) fn new(
        connection: Arc<ReconnectingConnection>,
        message: Message,
        topic: String,
        channel: String,
        max_retry_attempts: u16,
    ) -> Self {
        Self {
            connection,
            message,
            topic,
            channel,
            max_retry_attempts,
        }
    }

    pub fn id(&self) -> MessageId {
        self.message.id
    }

    /// Broker-maintained delivery attempt counter, starting at 1 for
    /// the first delivery.
    pub fn attempts(&self) -> u16 {
        self.message.attempts
    }

    pub fn body(&self) -> &[u8] {
        &self.message.body
    }

    pub fn body_utf8(&self) -> Cow<'_, str> {
        self.message.body_utf8()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Settle the message successfully. The broker forgets it.
    pub async fn finish(&self) -> Result<()> {
        self.connection
            .send(Command::Finish(self.message.id))
            .await?;
        Ok(())
    }

    /// Push the message back for immediate redelivery.
    ///
    /// Refused locally once the attempt counter has passed the
    /// configured ceiling; in that case nothing reaches the wire and
    /// the caller must settle the message another way (normally
    /// [`finish`](Self::finish) after parking the body somewhere).
    pub async fn requeue(&self) -> Result<()> {
        self.requeue_after(Duration::ZERO).await
    }

    /// Push the message back for redelivery after `delay`.
    pub async fn requeue_after(&self, delay: Duration) -> Result<()> {
        if self.message.attempts > self.max_retry_attempts {
            return Err(NsqError::RequeueLimitExceeded {
                attempts: self.message.attempts,
                max: self.max_retry_attempts,
            });
        }
        self.connection
            .send(Command::Requeue {
                id: self.message.id,
                defer_ms: delay.as_millis() as u32,
            })
            .await?;
        Ok(())
    }

    /// Reset the broker-side in-flight timeout for this message.
    pub async fn touch(&self) -> Result<()> {
        self.connection
            .send(Command::Touch(self.message.id))
            .await?;
        Ok(())
    }
}
