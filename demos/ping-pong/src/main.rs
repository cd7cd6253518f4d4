use std::sync::Arc;
use std::time::Duration;

use courier::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const CHANNEL: &str = "ping-pong";
const ROUNDS: u32 = 3;
const WAIT: Duration = Duration::from_secs(5);

type DemoResult<T> = Result<T, Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Ping {
    n: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Pong {
    n: u32,
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Answers every ping with a pong carrying the same number.
///
/// Handlers are synchronous, so the reply is queued and a task publishes it.
struct Responder {
    replies: mpsc::UnboundedSender<Pong>,
}

impl Responder {
    fn on_ping(&self, payload: &Payload) -> Result<(), ListenerError> {
        let ping: Ping = payload.decode()?;
        tracing::info!(n = ping.n, "ping received");
        self.replies.send(Pong { n: ping.n })?;
        Ok(())
    }
}

impl MessageListener for Responder {
    fn handlers(self: Arc<Self>) -> HandlerTable {
        HandlerTable::for_owner::<Self>().method("ping", &self, Responder::on_ping)
    }
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// Two independent connections to the same store, one per side.
#[cfg(feature = "redis")]
fn transports() -> DemoResult<(RedisTransport, RedisTransport)> {
    let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
    let config = RedisConfig::default().host(host);
    Ok((RedisTransport::open(config.clone())?, RedisTransport::open(config)?))
}

#[cfg(not(feature = "redis"))]
fn transports() -> DemoResult<(InMemoryTransport, InMemoryTransport)> {
    let broker = InMemoryTransport::new();
    Ok((broker.connect(), broker.connect()))
}

async fn wait_until_subscribed<T: Transport>(bus: &Bus<T>) -> DemoResult<()> {
    let live = tokio::time::timeout(WAIT, bus.wait_for_state(SubscriptionState::Subscribed))
        .await
        .unwrap_or(false);
    if !live {
        return Err(format!("could not subscribe to {}", bus.channel()).into());
    }
    Ok(())
}

async fn play<T: Transport>(server_side: T, client_side: T) -> DemoResult<()> {
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let server = Arc::new(
        BusBuilder::new()
            .channel(CHANNEL)
            .reconnect(ReconnectPolicy::backoff())
            .listener(Arc::new(Responder { replies: reply_tx }))
            .build(server_side)
            .await?,
    );

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel();
    let client = BusBuilder::new()
        .channel(CHANNEL)
        .register(HandlerTable::named("Client").typed("pong", move |pong: Pong| {
            pong_tx.send(pong)?;
            Ok(())
        }))
        .build(client_side)
        .await?;

    wait_until_subscribed(&server).await?;
    wait_until_subscribed(&client).await?;

    let responder = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            while let Some(pong) = reply_rx.recv().await {
                match Message::from_serialize("pong", &pong) {
                    Ok(message) => {
                        server
                            .publish_or_else(&message, courier::log_publish_failure)
                            .await;
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to build pong"),
                }
            }
        })
    };

    for n in 1..=ROUNDS {
        client
            .try_publish(&Message::from_serialize("ping", &Ping { n })?)
            .await?;
        match tokio::time::timeout(WAIT, pong_rx.recv()).await {
            Ok(Some(pong)) => tracing::info!(n = pong.n, "pong received"),
            _ => tracing::warn!(n, "no pong in time"),
        }
    }

    client.close().await;
    server.close().await;
    responder.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> DemoResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (server_side, client_side) = transports()?;
    play(server_side, client_side).await
}
