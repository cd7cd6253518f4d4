/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The store could not be reached (refused, timed out, bad credentials).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Publishing a message body failed.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Establishing the subscription failed after connecting.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// A live subscription lost its connection.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The transport was closed and its pooled resources released.
    #[error("transport closed")]
    Closed,
}
