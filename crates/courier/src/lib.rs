//! # Courier
//!
//! A lightweight message bus over a key-value store's pub/sub channels.
//!
//! Processes sharing a store talk to each other through one named channel.
//! Every message is an id plus a JSON-object payload, sent as the text
//! envelope `<id>;<payload>`. Listeners register handlers per id; every
//! process that subscribed receives every message and runs its own
//! handlers for it.
//!
//! Delivery is best-effort, at-most-once: no persistence, no replay, no
//! acknowledgements, no ordering across publishers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courier::prelude::*;
//!
//! struct Pong;
//!
//! impl Pong {
//!     fn on_ping(&self, payload: &Payload) -> Result<(), ListenerError> {
//!         println!("ping {:?}", payload.get("n"));
//!         Ok(())
//!     }
//! }
//!
//! impl MessageListener for Pong {
//!     fn handlers(self: Arc<Self>) -> HandlerTable {
//!         HandlerTable::for_owner::<Self>().method("ping", &self, Pong::on_ping)
//!     }
//! }
//!
//! # async fn run() -> Result<(), CourierError> {
//! let bus = BusBuilder::new()
//!     .channel("game")
//!     .listener(Arc::new(Pong))
//!     .build(InMemoryTransport::new())
//!     .await?;
//!
//! bus.publish(&Message::new("ping", Payload::new().with("n", 1))?).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `redis`: `RedisTransport`, a Redis pub/sub transport

mod bus;
mod config;
mod dispatch;
mod error;
mod listener;
mod registry;

pub use bus::{Bus, BusBuilder};
pub use config::{BusConfig, ReconnectPolicy, SubscribeMode};
pub use dispatch::{DispatchOutcome, Dispatcher, SubscriptionState};
pub use error::{CourierError, ErrorReporter, ListenerError, log_publish_failure};
pub use listener::{Handler, HandlerTable, MessageListener};
pub use registry::{ListenerRegistry, Registration};

pub use courier_protocol::{
    Codec, EnvelopeCodec, JsonCodec, Message, MessageId, Payload, ProtocolError,
};
#[cfg(feature = "redis")]
pub use courier_transport::RedisTransport;
pub use courier_transport::{
    InMemoryTransport, MessageHandler, RedisConfig, Transport, TransportError, Unsubscriber,
};

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::{
        Bus, BusBuilder, BusConfig, CourierError, HandlerTable, InMemoryTransport,
        ListenerError, Message, MessageId, MessageListener, Payload, ReconnectPolicy,
        SubscribeMode, SubscriptionState, Transport,
    };

    #[cfg(feature = "redis")]
    pub use crate::{RedisConfig, RedisTransport};
}
