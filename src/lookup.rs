//! Discovery-service collaborator.
//!
//! Querying lookupd over HTTP is deliberately outside this crate; the
//! topology only needs something that answers "which brokers produce
//! this topic". Applications plug in their own transport behind
//! [`LookupService`].

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{Endpoint, DEFAULT_TCP_PORT};
use crate::error::Result;

/// One producer entry from a lookupd topic query.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerEndpoint {
    pub hostname: String,
    /// Address other hosts should dial; falls back to `hostname` when
    /// absent.
    #[serde(default)]
    pub broadcast_address: Option<String>,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

impl ProducerEndpoint {
    /// The dialable endpoint this producer advertises.
    pub fn endpoint(&self) -> Endpoint {
        let host = self
            .broadcast_address
            .as_deref()
            .filter(|addr| !addr.is_empty())
            .unwrap_or(&self.hostname);
        Endpoint::new(host, self.tcp_port)
    }
}

/// Asks one discovery endpoint for the producers of a topic.
#[async_trait]
pub trait LookupService: Send + Sync {
    /// `endpoint` is the discovery service's base URI as configured in
    /// `SubscriberOptions::lookupd_endpoints`.
    async fn producers(&self, endpoint: &str, topic: &str) -> Result<Vec<ProducerEndpoint>>;
}
