//! Unified error type for Courier.

use std::sync::Arc;

use courier_protocol::ProtocolError;
use courier_transport::TransportError;

/// What a listener returns when it fails to handle a message.
///
/// Any error type works: `?` on an `io::Error`, a `serde_json::Error`,
/// or a `String` converts into it.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback that observes errors the bus handles on its own (dropped
/// messages, failing listeners, subscription failures).
pub type ErrorReporter = Arc<dyn Fn(&CourierError) + Send + Sync>;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on the wrapping variants generates `From`
/// impls, so `?` converts protocol and transport errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// A transport-level error (connect, publish, subscribe, closed).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, malformed envelope, bad id).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The bus or a listener registration is misconfigured. Nothing was
    /// changed when this is returned.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A listener returned an error for a message.
    #[error("listener {owner} failed on {id:?}: {source}")]
    Listener {
        id: String,
        owner: &'static str,
        #[source]
        source: ListenerError,
    },

    /// A listener panicked while handling a message.
    #[error("listener {owner} panicked on {id:?}: {message}")]
    ListenerPanicked {
        id: String,
        owner: &'static str,
        message: String,
    },
}

/// A publish failure handler that logs the failure and moves on.
///
/// Pass it to [`Bus::publish_or_else`](crate::Bus::publish_or_else) when
/// failures should be visible in the logs but not handled otherwise.
pub fn log_publish_failure(error: CourierError) {
    tracing::warn!(error = %error, "failed to publish a message");
}
