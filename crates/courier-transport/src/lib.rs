//! Transport abstraction layer for Courier.
//!
//! Provides the [`Transport`] trait over a pub/sub store and the
//! [`MessageHandler`] trait the store calls back into for every inbound
//! message.
//!
//! # Implementations
//!
//! - [`InMemoryTransport`]: in-process broker (always available)
//! - `RedisTransport`: Redis pub/sub, behind the `redis` feature
//!
//! # Feature Flags
//!
//! - `redis`: Redis transport via the `redis` crate

mod config;
mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod signal;

pub use config::RedisConfig;
pub use error::TransportError;
pub use memory::InMemoryTransport;
#[cfg(feature = "redis")]
pub use redis_store::RedisTransport;
pub use signal::{UnsubscribeSignal, Unsubscriber, unsubscribe_channel};

use std::future::Future;

/// Receives raw message bodies from a live subscription.
///
/// The transport calls these methods inline, on the task that drives the
/// subscription, one message at a time and in the order received. A slow
/// handler therefore delays every message behind it.
pub trait MessageHandler: Send + Sync {
    /// Called once the subscription is live and messages can arrive.
    fn on_subscribed(&self, channel: &str) {
        let _ = channel;
    }

    /// Called for every message received on the subscribed channel.
    fn on_message(&self, channel: &str, body: &str);
}

/// A pub/sub store: publish text bodies to a channel, subscribe to one.
///
/// The futures are `Send` so a bus can drive its subscription on a spawned
/// Tokio task. Implementations may still be written with `async fn`.
pub trait Transport: Send + Sync + 'static {
    /// Publishes `body` to `channel`.
    ///
    /// Delivery is best-effort: succeeding only means the store accepted
    /// the message, not that anyone received it.
    fn publish(
        &self,
        channel: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Subscribes to `channel` and feeds every inbound message to
    /// `handler` until `signal` fires.
    ///
    /// Resolves with `Ok(())` after an unsubscribe, or with an error if the
    /// subscription can't be established or its connection is lost.
    fn subscribe<H: MessageHandler>(
        &self,
        channel: &str,
        handler: &H,
        signal: UnsubscribeSignal,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Releases pooled connections. Later publishes and subscribes fail
    /// with [`TransportError::Closed`].
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
