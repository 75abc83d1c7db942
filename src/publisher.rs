//! TCP publisher.

use std::sync::Arc;

use bytes::Bytes;

use crate::config::{ConnectionOptions, Endpoint};
use crate::error::{NsqError, Result};
use crate::protocol::Command;
use crate::reconnect::ReconnectingConnection;

/// Publishes messages to one broker over a self-healing connection.
///
/// The first `publish` dials lazily; [`connect`](Publisher::connect)
/// forces the dial up front for callers that want connection errors
/// before they have traffic.
pub struct Publisher {
    connection: Arc<ReconnectingConnection>,
}

impl Publisher {
    pub fn new(endpoint: Endpoint, options: ConnectionOptions) -> Self {
        Self {
            connection: Arc::new(ReconnectingConnection::new(endpoint, options)),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Publish `body` to `topic` and await the broker's acknowledgment.
    ///
    /// Empty topic or body never reaches the wire; the broker would
    /// reject both, so they fail locally as protocol violations.
    pub async fn publish(&self, topic: &str, body: impl Into<Bytes>) -> Result<()> {
        let body = body.into();
        if topic.is_empty() {
            return Err(NsqError::Protocol("publish topic is empty".into()));
        }
        if body.is_empty() {
            return Err(NsqError::Protocol("publish body is empty".into()));
        }

        self.connection
            .send(Command::Publish {
                topic: topic.to_string(),
                body,
            })
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}
