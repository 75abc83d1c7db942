//! # nsqling
//!
//! Rust client for an NSQ-style distributed pub/sub broker.
//!
//! Publishes byte messages to named topics over TCP and consumes them
//! on topic/channel subscriptions with explicit per-message Finish /
//! Requeue / Touch semantics.
//!
//! ## Architecture
//!
//! - **Protocol** (`protocol`): length-prefixed binary frames down,
//!   ASCII commands up, one codec shared by every component
//! - **Connection** (`connection`, `reconnect`): one writer task and
//!   one read loop per socket, wrapped in bounded redial-with-backoff
//! - **Consumption** (`consumer`, `topology`): semaphore-bounded
//!   handler dispatch per broker, reconciled against discovery
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nsqling::{Consumer, Endpoint, SubscriberOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let consumer = Consumer::new(
//!         Endpoint::new("127.0.0.1", 4150),
//!         "orders".into(),
//!         "billing".into(),
//!         &SubscriberOptions::default(),
//!     );
//!     consumer
//!         .start(
//!             Arc::new(|ctx| {
//!                 Box::pin(async move {
//!                     println!("got {}", ctx.body_utf8());
//!                     ctx.finish().await?;
//!                     Ok(())
//!                 })
//!             }),
//!             None,
//!         )
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod config;
pub mod connection;
pub mod consumer;
pub mod context;
pub mod error;
pub mod lookup;
pub mod protocol;
pub mod publisher;
pub mod reconnect;
pub mod topology;

mod backoff;
mod writer;

pub use config::{ConnectionOptions, Endpoint, SubscriberOptions, DEFAULT_TCP_PORT};
pub use consumer::{Consumer, ErrorCallback, HandlerFuture, MessageHandler};
pub use context::MessageContext;
pub use error::{HandlerError, NsqError, Result};
pub use lookup::{LookupService, ProducerEndpoint};
pub use publisher::Publisher;
pub use reconnect::ReconnectingConnection;
pub use topology::TopologyManager;
