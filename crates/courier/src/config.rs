//! Bus configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SubscribeMode
// ---------------------------------------------------------------------------

/// Where the subscription loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubscribeMode {
    /// On a spawned Tokio task; building the bus returns right away.
    #[default]
    Background,
    /// On the task that builds the bus. `build` only returns once the
    /// subscription has ended, so the bus effectively owns that task.
    Inline,
}

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

/// What the subscription worker does when subscribing fails or a live
/// subscription loses its connection.
///
/// Reconnecting never replays anything: messages published while the bus
/// was disconnected are simply not delivered to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReconnectPolicy {
    /// Give up. The bus stays usable for publishing, but nothing is
    /// dispatched anymore.
    #[default]
    Never,
    /// Retry with exponential backoff.
    Backoff {
        /// Consecutive failed attempts before giving up. 0 = retry forever.
        max_attempts: u32,
        /// Delay before the first retry; doubled after each failure.
        initial_backoff: Duration,
        /// Upper bound for the delay.
        max_backoff: Duration,
        /// Random extra delay (0..jitter) so a fleet of processes doesn't
        /// reconnect in lockstep after the store comes back.
        jitter: Duration,
    },
}

impl ReconnectPolicy {
    /// Backoff starting at 100 ms, capped at 30 s, retrying forever.
    pub fn backoff() -> Self {
        Self::Backoff {
            max_attempts: 0,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            jitter: Duration::from_millis(100),
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` if the
    /// policy gives up at that point.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Never => None,
            Self::Backoff {
                max_attempts,
                initial_backoff,
                max_backoff,
                jitter,
            } => {
                if attempt == 0 || (max_attempts != 0 && attempt > max_attempts) {
                    return None;
                }
                // 2^(attempt-1), saturating well before overflow.
                let factor = 1u32 << (attempt - 1).min(16);
                let base = initial_backoff.saturating_mul(factor).min(max_backoff);
                Some(base + random_jitter(jitter))
            }
        }
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_us = max.as_micros() as u64;
    if max_us == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(rand::rng().random_range(0..max_us))
}

// ---------------------------------------------------------------------------
// BusConfig
// ---------------------------------------------------------------------------

/// Settings for one bus instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// The single pub/sub channel this bus publishes to and listens on.
    pub channel: String,
    pub subscribe_mode: SubscribeMode,
    pub reconnect: ReconnectPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel: "courier".to_string(),
            subscribe_mode: SubscribeMode::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl BusConfig {
    /// Creates a config for `channel` with default settings.
    pub fn for_channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }
}
