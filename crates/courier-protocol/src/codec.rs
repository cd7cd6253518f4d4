//! Structural codec trait and the JSON implementation.
//!
//! A "codec" converts between Rust values and the text that sits after the
//! `;` in an envelope. The envelope layer doesn't care HOW payloads are
//! serialized; it just needs something that implements [`Codec`]. Swapping
//! the codec changes the payload encoding without touching the bus.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust values to text and decode text back.
///
/// ## Trait bounds
///
/// - `Send + Sync` → the codec is shared between the publishing tasks and
///   the subscription task.
/// - `'static` → the codec owns everything it needs, so it can live inside
///   the long-running subscription worker.
///
/// Envelopes are text on the wire (pub/sub message bodies are strings), so
/// unlike a byte-oriented codec both directions work on `String` / `&str`.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into text.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented
    /// in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes text back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the text is malformed or doesn't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// This is the encoding every Courier process on a channel must agree on:
/// payloads are JSON objects, values follow standard JSON typing.
///
/// ## Example
///
/// ```rust
/// use courier_protocol::{Codec, JsonCodec, Payload};
/// use serde_json::json;
///
/// let codec = JsonCodec;
/// let payload = Payload::try_from(json!({ "n": 1 })).unwrap();
///
/// let text = codec.encode(&payload).unwrap();
/// assert_eq!(text, r#"{"n":1}"#);
///
/// let decoded: Payload = codec.decode(&text).unwrap();
/// assert_eq!(payload, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_json_codec_encodes_compactly() {
        let mut map = HashMap::new();
        map.insert("orderId", "abc123");
        let text = JsonCodec.encode(&map).unwrap();
        assert_eq!(text, r#"{"orderId":"abc123"}"#);
    }

    #[test]
    fn test_json_codec_rejects_non_string_map_keys() {
        // JSON object keys must be strings; a tuple key can't be encoded.
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");
        let result = JsonCodec.encode(&map);
        assert!(matches!(result, Err(ProtocolError::Encode(_))));
    }

    #[test]
    fn test_json_codec_decode_garbage_is_decode_error() {
        let result: Result<serde_json::Value, _> = JsonCodec.decode("not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
