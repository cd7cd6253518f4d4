//! Unsubscribe signalling between a bus and a running subscription.
//!
//! `Transport::subscribe` blocks (awaits) for as long as the subscription
//! lives. The only way to end it from the outside is to flip the flag in
//! this module: the [`Unsubscriber`] side sets it, the transport's receive
//! loop watches the [`UnsubscribeSignal`] side and returns.

use std::sync::Arc;

use tokio::sync::watch;

/// Creates a connected unsubscriber / signal pair.
pub fn unsubscribe_channel() -> (Unsubscriber, UnsubscribeSignal) {
    let (tx, rx) = watch::channel(false);
    (Unsubscriber { tx: Arc::new(tx) }, UnsubscribeSignal { rx })
}

/// The sending half: call [`unsubscribe`](Self::unsubscribe) to end every
/// subscription watching a signal from this pair.
///
/// Cheap to clone. When the last clone is dropped the signals fire too,
/// so a subscription never outlives whoever owns it.
#[derive(Debug, Clone)]
pub struct Unsubscriber {
    tx: Arc<watch::Sender<bool>>,
}

impl Unsubscriber {
    /// Requests the subscription to end. Idempotent.
    pub fn unsubscribe(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` once [`unsubscribe`](Self::unsubscribe) was called.
    pub fn is_unsubscribed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Creates another signal connected to this unsubscriber.
    pub fn signal(&self) -> UnsubscribeSignal {
        UnsubscribeSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// The receiving half, handed to `Transport::subscribe`.
#[derive(Debug, Clone)]
pub struct UnsubscribeSignal {
    rx: watch::Receiver<bool>,
}

impl UnsubscribeSignal {
    /// Returns `true` if unsubscribe was already requested or every
    /// `Unsubscriber` is gone.
    pub fn is_unsubscribed(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once unsubscribe is requested (or every `Unsubscriber`
    /// was dropped). Cancel-safe, so it can sit in a `tokio::select!` loop.
    pub async fn unsubscribed(&mut self) {
        // Err means the sender is gone, which counts as unsubscribed.
        let _ = self.rx.wait_for(|done| *done).await;
    }
}
