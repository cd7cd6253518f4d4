//! In-process pub/sub broker, used for tests and single-process setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::sync::broadcast::error::RecvError;

use crate::{MessageHandler, Transport, TransportError, UnsubscribeSignal};

/// Default number of in-flight messages a slow subscriber may fall behind.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Delivery {
    channel: Arc<str>,
    body: Arc<str>,
}

/// State shared by every handle connected to the same broker.
struct Broker {
    tx: broadcast::Sender<Delivery>,
    /// `false` simulates an unreachable store.
    reachable: watch::Sender<bool>,
    /// Live subscriptions per channel.
    subscribers: Mutex<HashMap<String, usize>>,
}

/// An in-memory [`Transport`] that behaves like a pub/sub store.
///
/// - Every subscription on a channel receives every message published to
///   that channel after it became live; earlier messages are gone.
/// - Delivery is at-most-once. A subscriber that falls more than the
///   broker capacity behind loses the oldest messages.
/// - `Clone` shares the connection pool, so closing one clone closes them
///   all. [`connect`](Self::connect) opens an independent handle on the
///   same broker, like a second process talking to the same store.
///
/// ## Example
///
/// ```rust
/// use courier_transport::{InMemoryTransport, Transport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let transport = InMemoryTransport::new();
/// // Nobody is subscribed: the message is simply dropped.
/// transport.publish("events", "ping;{}").await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryTransport {
    broker: Arc<Broker>,
    closed: Arc<AtomicBool>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Creates a transport on a fresh broker.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a transport on a fresh broker with a custom lag capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (reachable, _) = watch::channel(true);
        Self {
            broker: Arc::new(Broker {
                tx,
                reachable,
                subscribers: Mutex::new(HashMap::new()),
            }),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens another, independently closable handle on the same broker.
    pub fn connect(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulates the store going down (`false`) or coming back (`true`).
    ///
    /// While unreachable, publish and subscribe fail with
    /// `ConnectionFailed`, and live subscriptions end with
    /// `ConnectionClosed`.
    pub fn set_reachable(&self, reachable: bool) {
        self.broker.reachable.send_replace(reachable);
        tracing::debug!(reachable, "in-memory broker reachability changed");
    }

    /// Returns the number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock_subscribers().get(channel).copied().unwrap_or(0)
    }

    /// Returns `true` once [`close`](Transport::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !*self.broker.reachable.borrow() {
            return Err(TransportError::ConnectionFailed(
                "in-memory broker is unreachable".into(),
            ));
        }
        Ok(())
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.broker
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps `subscriber_count` accurate however the receive loop exits.
struct SubscriberGuard<'a> {
    transport: &'a InMemoryTransport,
    channel: &'a str,
}

impl<'a> SubscriberGuard<'a> {
    fn register(transport: &'a InMemoryTransport, channel: &'a str) -> Self {
        *transport
            .lock_subscribers()
            .entry(channel.to_string())
            .or_insert(0) += 1;
        Self { transport, channel }
    }
}

impl Drop for SubscriberGuard<'_> {
    fn drop(&mut self) {
        let mut subscribers = self.transport.lock_subscribers();
        if let Some(count) = subscribers.get_mut(self.channel) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subscribers.remove(self.channel);
            }
        }
    }
}

impl Transport for InMemoryTransport {
    async fn publish(&self, channel: &str, body: &str) -> Result<(), TransportError> {
        self.check_available()?;
        let delivery = Delivery {
            channel: Arc::from(channel),
            body: Arc::from(body),
        };
        // Err only means nobody is listening; the message is dropped,
        // exactly like PUBLISH to a channel without subscribers.
        let receivers = self.broker.tx.send(delivery).unwrap_or(0);
        tracing::trace!(channel, receivers, "in-memory publish");
        Ok(())
    }

    async fn subscribe<H: MessageHandler>(
        &self,
        channel: &str,
        handler: &H,
        mut signal: UnsubscribeSignal,
    ) -> Result<(), TransportError> {
        if signal.is_unsubscribed() {
            return Ok(());
        }
        self.check_available()?;

        let mut rx = self.broker.tx.subscribe();
        let mut reachable = self.broker.reachable.subscribe();
        let _guard = SubscriberGuard::register(self, channel);
        handler.on_subscribed(channel);

        loop {
            tokio::select! {
                biased;

                _ = signal.unsubscribed() => return Ok(()),

                _ = reachable.wait_for(|up| !*up) => {
                    return Err(TransportError::ConnectionClosed(
                        "in-memory broker became unreachable".into(),
                    ));
                }

                received = rx.recv() => match received {
                    Ok(delivery) if &*delivery.channel == channel => {
                        handler.on_message(&delivery.channel, &delivery.body);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => {
                        return Err(TransportError::ConnectionClosed(
                            "in-memory broker shut down".into(),
                        ));
                    }
                },
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::unsubscribe_channel;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let transport = InMemoryTransport::new();
        assert!(transport.publish("events", "ping;{}").await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let transport = InMemoryTransport::new();
        transport.close().await.unwrap();
        assert!(matches!(
            transport.publish("events", "ping;{}").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connect_has_independent_close() {
        let a = InMemoryTransport::new();
        let b = a.connect();
        a.close().await.unwrap();
        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert!(b.publish("events", "ping;{}").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_publish_fails() {
        let transport = InMemoryTransport::new();
        transport.set_reachable(false);
        assert!(matches!(
            transport.publish("events", "x;{}").await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_returns_immediately_when_already_unsubscribed() {
        struct Nothing;
        impl MessageHandler for Nothing {
            fn on_message(&self, _channel: &str, _body: &str) {}
        }

        let transport = InMemoryTransport::new();
        let (unsubscriber, signal) = unsubscribe_channel();
        unsubscriber.unsubscribe();

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            transport.subscribe("events", &Nothing, signal),
        )
        .await
        .expect("should not block");
        assert!(result.is_ok());
        assert_eq!(transport.subscriber_count("events"), 0);
    }
}
