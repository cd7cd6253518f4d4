//! Error types for the protocol layer.
//!
//! Each crate in Courier defines its own error enum. When you see a
//! `ProtocolError`, the problem is in the envelope or the payload, never
//! in the connection to the store or in a listener.

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a payload failed.
    ///
    /// With `JsonCodec` this only happens for values JSON cannot
    /// represent, such as a map with non-string keys.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload part of an envelope is not a valid JSON object.
    ///
    /// Common causes: truncated text, a bare JSON scalar or array instead
    /// of an object, or a payload that doesn't match the type a listener
    /// asked for.
    #[error("payload decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The envelope has no `;` separating the id from the payload.
    ///
    /// The offending text is kept (truncated) so it shows up in logs.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A message-kind identifier is empty or contains the separator.
    #[error("invalid message id {0:?}: ids must be non-empty and must not contain ';'")]
    InvalidMessageId(String),
}
