//! Redis pub/sub transport using the `redis` crate.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;

use crate::{MessageHandler, RedisConfig, Transport, TransportError, UnsubscribeSignal};

/// A [`Transport`] backed by Redis `PUBLISH` / `SUBSCRIBE`.
///
/// Publishing goes through one cached multiplexed connection (the pool),
/// opened on first use and reopened after it drops. Each subscription gets
/// its own dedicated pub/sub connection, as Redis requires.
pub struct RedisTransport {
    client: redis::Client,
    config: RedisConfig,
    pooled: Mutex<Option<MultiplexedConnection>>,
    closed: AtomicBool,
}

impl RedisTransport {
    /// Creates a transport without connecting yet.
    ///
    /// # Errors
    /// Returns `ConnectionFailed` if the client rejects the settings.
    pub fn open(config: RedisConfig) -> Result<Self, TransportError> {
        let client = redis::Client::open(config.connection_info()).map_err(|e| {
            TransportError::ConnectionFailed(format!("{}: {e}", config.connection_url()))
        })?;
        Ok(Self {
            client,
            config,
            pooled: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Creates a transport and opens the pooled connection right away, so
    /// an unreachable store or bad credentials surface immediately.
    pub async fn connect(config: RedisConfig) -> Result<Self, TransportError> {
        let transport = Self::open(config)?;
        transport.connection().await.inspect_err(|e| {
            tracing::warn!(
                host = %transport.config.host,
                port = transport.config.port,
                error = %e,
                "couldn't connect to redis"
            );
        })?;
        Ok(transport)
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Returns the pooled connection for running arbitrary commands.
    ///
    /// # Errors
    /// `Closed` after [`close`](Transport::close), `ConnectionFailed` if
    /// the store can't be reached within the connect timeout.
    pub async fn connection(&self) -> Result<MultiplexedConnection, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut pooled = self.pooled.lock().await;
        if let Some(conn) = pooled.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(
            self.config.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| TransportError::ConnectionFailed("connect timed out".into()))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        tracing::debug!(host = %self.config.host, port = self.config.port, "redis connection opened");
        *pooled = Some(conn.clone());
        Ok(conn)
    }

    /// Drops the cached connection so the next call reconnects.
    async fn evict(&self) {
        self.pooled.lock().await.take();
    }
}

impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, body: &str) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;
        match conn.publish::<_, _, i64>(channel, body).await {
            Ok(receivers) => {
                tracing::trace!(channel, receivers, "redis publish");
                Ok(())
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    self.evict().await;
                }
                Err(TransportError::PublishFailed(e.to_string()))
            }
        }
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
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut pubsub = tokio::time::timeout(
            self.config.connect_timeout,
            self.client.get_async_pubsub(),
        )
        .await
        .map_err(|_| TransportError::ConnectionFailed("connect timed out".into()))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        handler.on_subscribed(channel);

        let outcome = {
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    biased;

                    _ = signal.unsubscribed() => break Ok(()),

                    next = messages.next() => match next {
                        Some(msg) => match msg.get_payload::<String>() {
                            Ok(body) => handler.on_message(msg.get_channel_name(), &body),
                            Err(e) => {
                                tracing::warn!(channel, error = %e, "dropping non-text message");
                            }
                        },
                        None => {
                            break Err(TransportError::ConnectionClosed(
                                "redis pub/sub stream ended".into(),
                            ));
                        }
                    },
                }
            }
        };

        if outcome.is_ok() {
            if let Err(e) = pubsub.unsubscribe(channel).await {
                tracing::debug!(channel, error = %e, "unsubscribe failed, dropping connection");
            }
        }
        outcome
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        self.evict().await;
        tracing::debug!(host = %self.config.host, port = self.config.port, "redis transport closed");
        Ok(())
    }
}
