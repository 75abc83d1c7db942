//! Self-healing wrapper around [`Connection`].
//!
//! A [`ReconnectingConnection`] owns at most one live session at a time
//! and rebuilds it on demand: when a command hits a recoverable error,
//! the dead session is discarded and a bounded retry loop redials with
//! linear backoff before resending. Unrecoverable errors (protocol
//! violations, broker `E_` responses, local policy failures) pass
//! straight through.
//!
//! All of that happens under one async mutex, so concurrent senders
//! queue behind a reconnect instead of racing to dial the same broker.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::backoff::Backoff;
use crate::config::{ConnectionOptions, Endpoint};
use crate::connection::{Callbacks, Connection, HeartbeatCallback, MessageCallback};
use crate::error::{NsqError, Result};
use crate::protocol::{Command, ProtocolResponse};

/// Stable identity for a broker endpoint, used as the key when a
/// topology reconciles its connection set.
pub fn endpoint_id(endpoint: &Endpoint) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.host.as_bytes());
    hasher.update(b"|");
    hasher.update(endpoint.port.to_string().as_bytes());
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
            out
        })
}

struct State {
    connection: Option<Arc<Connection>>,
    backoff: Backoff,
    /// Set after the first successful dial. Until then a socket-level
    /// failure means "host unreachable" and is not retried.
    ever_connected: bool,
}

/// A connection to one broker that transparently redials after
/// transport failures.
pub struct ReconnectingConnection {
    endpoint: Endpoint,
    options: ConnectionOptions,
    id: String,
    state: Mutex<State>,
    callbacks: std::sync::Mutex<Callbacks>,
}

impl ReconnectingConnection {
    pub fn new(endpoint: Endpoint, options: ConnectionOptions) -> Self {
        let id = endpoint_id(&endpoint);
        let backoff = Backoff::new(options.initial_backoff);
        Self {
            endpoint,
            options,
            id,
            state: Mutex::new(State {
                connection: None,
                backoff,
                ever_connected: false,
            }),
            callbacks: std::sync::Mutex::new(Callbacks::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Register the message callback attached to every session this
    /// wrapper dials, including redials. Must be set before `connect`
    /// for a consuming connection; sessions dialed earlier do not see
    /// it.
    pub fn set_message_callback(&self, callback: MessageCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .on_message = Some(callback);
    }

    /// Register a heartbeat observer with the same re-attachment
    /// behavior as [`set_message_callback`](Self::set_message_callback).
    pub fn set_heartbeat_callback(&self, callback: HeartbeatCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .on_heartbeat = Some(callback);
    }

    fn callbacks(&self) -> Callbacks {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Dial now if no live session exists.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !has_live_connection(&state) {
            self.redial(&mut state).await?;
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        has_live_connection(&*self.state.lock().await)
    }

    /// Send a command, redialing and resending on recoverable failures.
    ///
    /// Two bounds apply: `max_reconnection_attempts` consecutive failed
    /// dials per redial, and the same number of resends of this command
    /// across successful redials.
    pub async fn send(&self, command: Command) -> Result<Option<ProtocolResponse>> {
        let mut state = self.state.lock().await;
        // Resend budget, separate from the dial budget inside redial:
        // a broker that accepts dials but kills every send must not
        // keep us looping.
        let mut resends_left = self.options.max_reconnection_attempts;
        loop {
            let connection = match &state.connection {
                Some(conn) if conn.is_open() => conn.clone(),
                _ => self.redial(&mut state).await?,
            };

            match connection.send(command.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        command = command.name(),
                        "command failed on a dead session, redialing: {e}",
                    );
                    state.connection = None;
                    if resends_left == 0 {
                        return Err(e);
                    }
                    resends_left -= 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Gracefully close the current session. A later `send` or
    /// `connect` starts a fresh one.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(connection) = state.connection.take() {
            connection.close().await;
        }
        state.backoff.reset();
    }

    /// Bounded dial loop. Holds the state lock for its whole duration,
    /// including backoff sleeps.
    async fn redial(&self, state: &mut State) -> Result<Arc<Connection>> {
        let max_attempts = self.options.max_reconnection_attempts;
        loop {
            let delay = state.backoff.next_delay();
            let attempt = state.backoff.attempt();
            if !delay.is_zero() {
                tracing::info!(
                    endpoint = %self.endpoint,
                    attempt,
                    "waiting {delay:?} before reconnecting",
                );
                tokio::time::sleep(delay).await;
            }

            match Connection::connect(&self.endpoint, &self.options, self.callbacks()).await {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    state.connection = Some(connection.clone());
                    state.ever_connected = true;
                    state.backoff.reset();
                    return Ok(connection);
                }
                Err(e) => {
                    // A host that never answered at all is unreachable,
                    // not flaky; surface that immediately.
                    if !state.ever_connected && matches!(e, NsqError::Socket(_)) {
                        return Err(e);
                    }
                    if attempt > max_attempts {
                        tracing::error!(
                            endpoint = %self.endpoint,
                            "giving up after {attempt} connection attempts: {e}",
                        );
                        return Err(e);
                    }
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        "connection attempt failed: {e}",
                    );
                }
            }
        }
    }
}

fn has_live_connection(state: &State) -> bool {
    matches!(&state.connection, Some(conn) if conn.is_open())
}
