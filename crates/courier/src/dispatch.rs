//! Inbound dispatch: turns one raw channel message into listener calls.
//!
//! The pipeline for a single body, in order:
//!
//! 1. ignore messages from other channels (compared ASCII case-insensitively)
//! 2. ignore empty bodies
//! 3. split the envelope at the first `;`, dropping bodies without one
//! 4. look up the id; no listeners means nothing else happens, not even
//!    payload decoding
//! 5. decode the payload once, dropping the message if it isn't an object
//! 6. call every listener in registration order
//!
//! Step 6 isolates listeners from each other: an error or a panic in one
//! is logged and reported, and the next listener still runs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use courier_protocol::{Codec, EnvelopeCodec, JsonCodec, Payload};
use courier_transport::MessageHandler;
use tokio::sync::watch;

use crate::registry::{ListenerRegistry, Registration};
use crate::{CourierError, ErrorReporter};

// ---------------------------------------------------------------------------
// SubscriptionState
// ---------------------------------------------------------------------------

/// Lifecycle of a bus's inbound subscription.
///
/// ```text
/// Pending → Subscribing → Subscribed → Unsubscribed
///                ↑             │
///                └─────────────┘  (reconnect, if the policy allows)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// The worker hasn't started yet.
    Pending,
    /// Connecting to the store and issuing the subscribe.
    Subscribing,
    /// Live: inbound messages are being dispatched.
    Subscribed,
    /// Ended for good, by unsubscribe or by giving up after a failure.
    Unsubscribed,
}

impl SubscriptionState {
    /// Returns `true` once no further transitions will happen.
    pub fn is_terminal(self) -> bool {
        self == Self::Unsubscribed
    }
}

// ---------------------------------------------------------------------------
// DispatchOutcome
// ---------------------------------------------------------------------------

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The message arrived on another channel.
    WrongChannel,
    /// The body was empty.
    Empty,
    /// The body had no `;` separator.
    Malformed,
    /// Nobody listens for this id.
    Unrouted { id: String },
    /// Listeners exist but the payload wasn't a JSON object.
    PayloadRejected { id: String },
    /// Every listener for `id` was called; `failed` of them errored or
    /// panicked.
    Delivered {
        id: String,
        invoked: usize,
        failed: usize,
    },
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes inbound messages on one channel to the registered listeners.
///
/// Implements [`MessageHandler`], so a transport can feed it directly.
/// All state it touches is behind `Arc`/locks, which makes it safe to
/// share between the subscription task and the bus handle.
pub struct Dispatcher<C: Codec = JsonCodec> {
    channel: String,
    registry: Arc<ListenerRegistry>,
    codec: EnvelopeCodec<C>,
    state: watch::Sender<SubscriptionState>,
    reporter: Option<ErrorReporter>,
}

impl<C: Codec> Dispatcher<C> {
    pub fn new(
        channel: impl Into<String>,
        registry: Arc<ListenerRegistry>,
        codec: EnvelopeCodec<C>,
    ) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Pending);
        Self {
            channel: channel.into(),
            registry,
            codec,
            state,
            reporter: None,
        }
    }

    /// Sends every error the dispatcher swallows to `reporter` as well.
    pub fn with_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &EnvelopeCodec<C> {
        &self.codec
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, next: SubscriptionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::trace!(channel = %self.channel, ?previous, ?next, "subscription state");
        }
    }

    pub(crate) fn report(&self, error: &CourierError) {
        if let Some(reporter) = &self.reporter {
            reporter(error);
        }
    }

    /// Runs the full inbound pipeline for one message.
    ///
    /// Never fails: everything that goes wrong is logged, reported, and
    /// reflected in the returned outcome.
    pub fn dispatch(&self, channel: &str, body: &str) -> DispatchOutcome {
        if !self.channel.eq_ignore_ascii_case(channel) {
            tracing::trace!(expected = %self.channel, channel, "ignoring message for another channel");
            return DispatchOutcome::WrongChannel;
        }
        if body.is_empty() {
            tracing::trace!(channel, "ignoring empty message");
            return DispatchOutcome::Empty;
        }

        let raw = match self.codec.decode(body) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(channel, error = %e, "dropping malformed message");
                self.report(&e.into());
                return DispatchOutcome::Malformed;
            }
        };

        let registrations = self.registry.lookup(raw.id);
        if registrations.is_empty() {
            tracing::debug!(channel, id = raw.id, "no listeners for message");
            return DispatchOutcome::Unrouted {
                id: raw.id.to_string(),
            };
        }

        let payload = match self.codec.decode_payload(raw.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(channel, id = raw.id, error = %e, "dropping message with bad payload");
                self.report(&e.into());
                return DispatchOutcome::PayloadRejected {
                    id: raw.id.to_string(),
                };
            }
        };

        tracing::trace!(channel, id = raw.id, listeners = registrations.len(), "dispatching");
        let mut failed = 0;
        for registration in &registrations {
            if let Err(error) = invoke(registration, &payload) {
                failed += 1;
                tracing::error!(
                    id = raw.id,
                    owner = registration.owner(),
                    error = %error,
                    "listener failed"
                );
                self.report(&error);
            }
        }

        DispatchOutcome::Delivered {
            id: raw.id.to_string(),
            invoked: registrations.len(),
            failed,
        }
    }
}

impl<C: Codec> MessageHandler for Dispatcher<C> {
    fn on_subscribed(&self, channel: &str) {
        tracing::info!(channel, "subscribed");
        self.set_state(SubscriptionState::Subscribed);
    }

    fn on_message(&self, channel: &str, body: &str) {
        self.dispatch(channel, body);
    }
}

impl<C: Codec> std::fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channel", &self.channel)
            .field("state", &self.state())
            .field("listeners", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Calls one listener, turning both errors and panics into `CourierError`.
fn invoke(registration: &Registration, payload: &Payload) -> Result<(), CourierError> {
    let handler = registration.handler();
    match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(CourierError::Listener {
            id: registration.id().to_string(),
            owner: registration.owner(),
            source,
        }),
        Err(panic) => Err(CourierError::ListenerPanicked {
            id: registration.id().to_string(),
            owner: registration.owner(),
            message: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
