//! `Bus` builder, handle, and the subscription worker.
//!
//! This is the entry point for using Courier. It ties the layers together:
//! transport → envelope codec → registry → listeners.
//!
//! A bus owns one channel. Outbound, [`Bus::publish`] wraps a message in
//! its envelope and hands it to the transport. Inbound, a worker keeps a
//! subscription on the channel open and feeds every body to the
//! [`Dispatcher`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use courier_protocol::{Codec, EnvelopeCodec, JsonCodec, Message};
use courier_transport::{Transport, UnsubscribeSignal, Unsubscriber, unsubscribe_channel};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{BusConfig, ReconnectPolicy, SubscribeMode};
use crate::dispatch::{DispatchOutcome, Dispatcher, SubscriptionState};
use crate::listener::{HandlerTable, MessageListener};
use crate::registry::ListenerRegistry;
use crate::{CourierError, ErrorReporter};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a [`Bus`].
///
/// # Example
///
/// ```rust
/// use courier::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), CourierError> {
/// let bus = BusBuilder::new()
///     .channel("orders")
///     .register(HandlerTable::new().on("order.created", |payload| {
///         println!("new order: {payload:?}");
///         Ok(())
///     }))
///     .build(InMemoryTransport::new())
///     .await?;
///
/// bus.publish(&Message::new("order.created", Payload::new())?).await;
/// bus.close().await;
/// # Ok(())
/// # }
/// ```
pub struct BusBuilder<C: Codec = JsonCodec> {
    config: BusConfig,
    codec: EnvelopeCodec<C>,
    reporter: Option<ErrorReporter>,
    tables: Vec<HandlerTable>,
    unsubscriber: Unsubscriber,
    signal: UnsubscribeSignal,
}

impl BusBuilder<JsonCodec> {
    /// Creates a builder with default settings and the JSON codec.
    pub fn new() -> Self {
        Self::from_config(BusConfig::default())
    }

    /// Creates a builder from a loaded [`BusConfig`].
    pub fn from_config(config: BusConfig) -> Self {
        let (unsubscriber, signal) = unsubscribe_channel();
        Self {
            config,
            codec: EnvelopeCodec::json(),
            reporter: None,
            tables: Vec::new(),
            unsubscriber,
            signal,
        }
    }
}

impl Default for BusBuilder<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> BusBuilder<C> {
    /// Sets the channel to publish to and listen on.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.config.channel = channel.into();
        self
    }

    pub fn subscribe_mode(mut self, mode: SubscribeMode) -> Self {
        self.config.subscribe_mode = mode;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Swaps the payload codec.
    pub fn codec<D: Codec>(self, codec: D) -> BusBuilder<D> {
        BusBuilder {
            config: self.config,
            codec: EnvelopeCodec::new(codec),
            reporter: self.reporter,
            tables: self.tables,
            unsubscriber: self.unsubscriber,
            signal: self.signal,
        }
    }

    /// Registers a callback for errors the bus handles on its own:
    /// dropped inbound messages, failing listeners, subscription failures.
    pub fn on_error<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&CourierError) + Send + Sync + 'static,
    {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Queues a handler table for registration before the subscription
    /// starts, so no early message can miss it.
    pub fn register(mut self, table: HandlerTable) -> Self {
        self.tables.push(table);
        self
    }

    /// Queues a listener instance's handlers.
    pub fn listener<L: MessageListener>(self, listener: Arc<L>) -> Self {
        self.register(listener.handlers())
    }

    /// Returns a handle that ends the subscription.
    ///
    /// This is how an [`Inline`](SubscribeMode::Inline) bus is stopped,
    /// since `build` doesn't return until it is.
    pub fn unsubscriber(&self) -> Unsubscriber {
        self.unsubscriber.clone()
    }

    /// Registers the queued listeners and starts the subscription.
    ///
    /// In [`Background`](SubscribeMode::Background) mode this returns as
    /// soon as the worker is spawned; use [`Bus::wait_for_state`] to wait
    /// for the subscription to go live. In [`Inline`](SubscribeMode::Inline)
    /// mode it returns once the subscription has ended.
    ///
    /// Failing to subscribe is NOT an error here: the worker logs it,
    /// reports it, and follows the reconnect policy. Publishing works
    /// either way.
    ///
    /// # Errors
    /// Returns [`CourierError::Configuration`] if the channel is empty or a
    /// queued table holds an invalid id.
    pub async fn build<T: Transport>(self, transport: T) -> Result<Bus<T, C>, CourierError> {
        let channel = self.config.channel;
        if channel.trim().is_empty() {
            return Err(CourierError::Configuration(
                "channel must not be empty".to_string(),
            ));
        }

        let registry = Arc::new(ListenerRegistry::new());
        for table in self.tables {
            registry.register(table)?;
        }

        let mut dispatcher = Dispatcher::new(channel, Arc::clone(&registry), self.codec);
        if let Some(reporter) = self.reporter {
            dispatcher = dispatcher.with_reporter(reporter);
        }
        let dispatcher = Arc::new(dispatcher);
        let transport = Arc::new(transport);

        let worker = SubscriptionWorker {
            transport: Arc::clone(&transport),
            dispatcher: Arc::clone(&dispatcher),
            policy: self.config.reconnect,
            signal: self.signal,
        };

        tracing::info!(
            channel = dispatcher.channel(),
            listeners = registry.len(),
            mode = ?self.config.subscribe_mode,
            "starting bus"
        );

        let handle = match self.config.subscribe_mode {
            SubscribeMode::Background => Some(tokio::spawn(worker.run())),
            SubscribeMode::Inline => {
                worker.run().await;
                None
            }
        };

        Ok(Bus {
            transport,
            dispatcher,
            unsubscriber: self.unsubscriber,
            worker: Mutex::new(handle),
            closed: AtomicBool::new(false),
        })
    }
}

// ---------------------------------------------------------------------------
// Subscription worker
// ---------------------------------------------------------------------------

/// Keeps the inbound subscription alive according to the reconnect policy.
struct SubscriptionWorker<T: Transport, C: Codec> {
    transport: Arc<T>,
    dispatcher: Arc<Dispatcher<C>>,
    policy: ReconnectPolicy,
    signal: UnsubscribeSignal,
}

impl<T: Transport, C: Codec> SubscriptionWorker<T, C> {
    async fn run(self) {
        let channel = self.dispatcher.channel().to_string();
        let mut attempt: u32 = 0;

        while !self.signal.is_unsubscribed() {
            self.dispatcher.set_state(SubscriptionState::Subscribing);
            tracing::debug!(%channel, "subscribing");

            let result = self
                .transport
                .subscribe(&channel, &*self.dispatcher, self.signal.clone())
                .await;

            let error = match result {
                Ok(()) => {
                    tracing::info!(%channel, "unsubscribed");
                    break;
                }
                // Errors racing an unsubscribe are just the connection
                // going away underneath it.
                Err(_) if self.signal.is_unsubscribed() => break,
                Err(e) => CourierError::from(e),
            };

            // A subscription that went live earns a fresh retry budget.
            if self.dispatcher.state() == SubscriptionState::Subscribed {
                attempt = 0;
            }
            attempt = attempt.saturating_add(1);

            tracing::error!(%channel, attempt, error = %error, "subscription failed");
            self.dispatcher.report(&error);

            let Some(delay) = self.policy.delay_for(attempt) else {
                tracing::warn!(%channel, "giving up on subscription; inbound messages will not be dispatched");
                break;
            };
            tracing::info!(%channel, attempt, delay_ms = delay.as_millis() as u64, "resubscribing after backoff");

            let mut signal = self.signal.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = signal.unsubscribed() => break,
            }
        }

        self.dispatcher.set_state(SubscriptionState::Unsubscribed);
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// A message bus bound to one channel of a pub/sub store.
///
/// Share it behind an `Arc` to publish from several tasks. Dropping the
/// bus ends its subscription; call [`close`](Self::close) to also release
/// the transport's connections.
pub struct Bus<T: Transport, C: Codec = JsonCodec> {
    transport: Arc<T>,
    dispatcher: Arc<Dispatcher<C>>,
    unsubscriber: Unsubscriber,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<T: Transport, C: Codec> Bus<T, C> {
    pub fn channel(&self) -> &str {
        self.dispatcher.channel()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &ListenerRegistry {
        self.dispatcher.registry()
    }

    /// Current state of the inbound subscription.
    pub fn state(&self) -> SubscriptionState {
        self.dispatcher.state()
    }

    /// Waits until the subscription reaches `target`.
    ///
    /// Returns `false` if `target` can no longer be reached because the
    /// subscription already ended. Wrap it in `tokio::time::timeout` when
    /// the store might never answer.
    pub async fn wait_for_state(&self, target: SubscriptionState) -> bool {
        let mut states = self.dispatcher.watch_state();
        match states
            .wait_for(|state| *state == target || state.is_terminal())
            .await
        {
            Ok(state) => *state == target,
            Err(_) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Registers a listener instance's handlers.
    ///
    /// Safe while the subscription is live: the next message for one of
    /// the ids already sees the new handlers.
    ///
    /// # Errors
    /// Returns [`CourierError::Configuration`] if any id is invalid; none
    /// of the listener's handlers are registered in that case.
    pub fn register_listener<L: MessageListener>(
        &self,
        listener: Arc<L>,
    ) -> Result<usize, CourierError> {
        self.register(listener.handlers())
    }

    /// Registers a handler table. See [`register_listener`](Self::register_listener).
    pub fn register(&self, table: HandlerTable) -> Result<usize, CourierError> {
        self.dispatcher.registry().register(table)
    }

    /// Publishes `message` and returns whatever went wrong.
    pub async fn try_publish(&self, message: &Message) -> Result<(), CourierError> {
        let body = self.dispatcher.codec().encode(message)?;
        self.transport.publish(self.channel(), &body).await?;
        tracing::trace!(channel = self.channel(), id = %message.id, "published");
        Ok(())
    }

    /// Publishes `message`, fire-and-forget.
    ///
    /// Failures are logged at debug level and otherwise dropped. Use
    /// [`publish_or_else`](Self::publish_or_else) or
    /// [`try_publish`](Self::try_publish) to observe them.
    pub async fn publish(&self, message: &Message) {
        if let Err(error) = self.try_publish(message).await {
            tracing::debug!(id = %message.id, error = %error, "publish failed, message dropped");
        }
    }

    /// Publishes `message`, passing any failure to `on_error`.
    pub async fn publish_or_else<F>(&self, message: &Message, on_error: F)
    where
        F: FnOnce(CourierError),
    {
        if let Err(error) = self.try_publish(message).await {
            on_error(error);
        }
    }

    /// Runs the inbound pipeline on a body directly, as if it had arrived
    /// on `channel`. Useful for replaying captured traffic and in tests.
    pub fn dispatch(&self, channel: &str, body: &str) -> DispatchOutcome {
        self.dispatcher.dispatch(channel, body)
    }

    /// Ends the subscription and closes the transport.
    ///
    /// Idempotent; later calls return immediately. Never fails: problems
    /// while shutting down are logged.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.unsubscriber.unsubscribe();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(channel = self.channel(), error = %e, "subscription task ended abnormally");
            }
        }

        if let Err(e) = self.transport.close().await {
            tracing::warn!(channel = self.channel(), error = %e, "error closing transport");
        }
        self.dispatcher.set_state(SubscriptionState::Unsubscribed);
        tracing::info!(channel = self.channel(), "bus closed");
    }
}

impl<T: Transport, C: Codec> Drop for Bus<T, C> {
    fn drop(&mut self) {
        self.unsubscriber.unsubscribe();
    }
}

impl<T: Transport, C: Codec> std::fmt::Debug for Bus<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("dispatcher", &self.dispatcher)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
