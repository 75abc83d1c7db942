//! Keeps one consumer per live broker for a topic/channel.
//!
//! The resolved endpoint set is the union of the statically configured
//! brokers and whatever every discovery endpoint currently advertises,
//! deduplicated by endpoint identity. A periodic reconcile pass diffs
//! that set against the running consumers: vanished brokers get their
//! consumer stopped and removed, new brokers get a consumer built and
//! started, and consumers whose start failed last pass are tried again.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{Endpoint, SubscriberOptions};
use crate::consumer::{Consumer, ErrorCallback, MessageHandler};
use crate::error::HandlerError;
use crate::lookup::LookupService;
use crate::reconnect::endpoint_id;

/// Manages the consumer set for one topic/channel across a changing set
/// of brokers.
pub struct TopologyManager {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

struct Inner {
    topic: String,
    channel: String,
    options: SubscriberOptions,
    lookup: Option<Arc<dyn LookupService>>,
    handler: MessageHandler,
    on_error: Option<ErrorCallback>,
    /// Consumer per endpoint identity key. The lock also serializes
    /// reconcile passes; running handlers are not behind it.
    consumers: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    endpoint: Endpoint,
    consumer: Arc<Consumer>,
    /// False until `start` succeeds; retried on the next pass.
    started: bool,
}

impl TopologyManager {
    pub fn new(
        topic: String,
        channel: String,
        options: SubscriberOptions,
        lookup: Option<Arc<dyn LookupService>>,
        handler: MessageHandler,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                topic,
                channel,
                options,
                lookup,
                handler,
                on_error,
                consumers: Mutex::new(HashMap::new()),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Reconcile once now, then keep reconciling on the configured
    /// interval until [`stop`](Self::stop).
    pub async fn start(&self) {
        self.inner.reconcile().await;

        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        let period = self.inner.options.reconcile_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // Consume the immediate first tick; the initial pass above
            // already covered it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => inner.reconcile().await,
                }
            }
        });
    }

    /// Run one reconcile pass outside the schedule.
    pub async fn reconcile(&self) {
        self.inner.reconcile().await;
    }

    /// Number of consumers currently mapped (started or pending retry).
    pub async fn consumer_count(&self) -> usize {
        self.inner.consumers.lock().await.len()
    }

    /// Number of consumers that are started and connected.
    pub async fn live_consumer_count(&self) -> usize {
        let consumers = self.inner.consumers.lock().await;
        let mut live = 0;
        for entry in consumers.values() {
            if entry.started && entry.consumer.is_connected().await {
                live += 1;
            }
        }
        live
    }

    /// Cancel the schedule and stop every consumer.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut consumers = self.inner.consumers.lock().await;
        for (_, entry) in consumers.drain() {
            entry.consumer.stop().await;
        }
        tracing::info!(
            topic = %self.inner.topic,
            channel = %self.inner.channel,
            "topology stopped",
        );
    }
}

impl Inner {
    /// Resolve the current endpoint set, deduplicated by identity key.
    ///
    /// One unreachable discovery endpoint only loses its own answers:
    /// the failure is logged and the remaining sources still count.
    async fn resolve(&self) -> HashMap<String, Endpoint> {
        let mut resolved = HashMap::new();
        for endpoint in &self.options.nsqd_endpoints {
            resolved.insert(endpoint_id(endpoint), endpoint.clone());
        }

        if !self.options.lookupd_endpoints.is_empty() {
            let Some(lookup) = &self.lookup else {
                tracing::warn!(
                    topic = %self.topic,
                    "lookupd endpoints configured but no lookup service installed",
                );
                return resolved;
            };
            for lookupd in &self.options.lookupd_endpoints {
                match lookup.producers(lookupd, &self.topic).await {
                    Ok(producers) => {
                        for producer in producers {
                            let endpoint = producer.endpoint();
                            resolved.insert(endpoint_id(&endpoint), endpoint);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            topic = %self.topic,
                            lookupd = %lookupd,
                            "lookup query failed, skipping: {e}",
                        );
                    }
                }
            }
        }
        resolved
    }

    async fn reconcile(&self) {
        let resolved = self.resolve().await;
        let mut consumers = self.consumers.lock().await;

        // Brokers that disappeared from the resolved set.
        let gone: Vec<String> = consumers
            .keys()
            .filter(|id| !resolved.contains_key(*id))
            .cloned()
            .collect();
        for id in gone {
            if let Some(entry) = consumers.remove(&id) {
                tracing::info!(
                    topic = %self.topic,
                    endpoint = %entry.endpoint,
                    "broker left the topology, stopping its consumer",
                );
                entry.consumer.stop().await;
            }
        }

        // Brokers that appeared.
        for (id, endpoint) in &resolved {
            if !consumers.contains_key(id) {
                tracing::info!(
                    topic = %self.topic,
                    endpoint = %endpoint,
                    "broker joined the topology",
                );
                let consumer = Arc::new(Consumer::new(
                    endpoint.clone(),
                    self.topic.clone(),
                    self.channel.clone(),
                    &self.options,
                ));
                consumers.insert(
                    id.clone(),
                    Entry {
                        endpoint: endpoint.clone(),
                        consumer,
                        started: false,
                    },
                );
            }
        }

        // Start everything not running: fresh entries, earlier start
        // failures, and started consumers whose connection has died
        // (restarting re-subscribes on a fresh session).
        for entry in consumers.values_mut() {
            if entry.started && entry.consumer.is_connected().await {
                continue;
            }
            if entry.started {
                tracing::warn!(
                    topic = %self.topic,
                    endpoint = %entry.endpoint,
                    "consumer connection died, restarting",
                );
                entry.started = false;
            }
            match entry
                .consumer
                .start(self.handler.clone(), self.on_error.clone())
                .await
            {
                Ok(()) => entry.started = true,
                Err(e) => {
                    tracing::warn!(
                        topic = %self.topic,
                        endpoint = %entry.endpoint,
                        "consumer start failed, will retry next pass: {e}",
                    );
                    if let Some(on_error) = &self.on_error {
                        on_error(&HandlerError::Nsq(e));
                    }
                }
            }
        }
    }
}
