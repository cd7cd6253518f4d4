//! The wire envelope: `<message-id>;<payload>`.
//!
//! Every message on a channel travels as a single text body:
//!
//! ```text
//! order.created;{"orderId":"abc123","total":42.5}
//! └─────┬─────┘│└──────────────┬───────────────┘
//!      id   separator       payload (JSON object)
//! ```
//!
//! The FIRST `;` is the delimiter. Ids can't contain `;` (see
//! [`MessageId`](crate::MessageId)), but payloads can, so `"a;b;c"` splits
//! into id `"a"` and payload `"b;c"`. There is no escaping scheme.

use crate::{Codec, JsonCodec, Message, MessageId, Payload, ProtocolError};

/// The character separating the id from the payload.
pub const SEPARATOR: char = ';';

/// How much of a bad envelope is kept in a `MalformedEnvelope` error.
const MAX_ERROR_PREVIEW: usize = 64;

/// An envelope split into its two parts, borrowing from the wire text.
///
/// The id is NOT validated here: a receiving process has to cope with
/// whatever other processes put on the channel, and an id it doesn't know
/// simply has no listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEnvelope<'a> {
    /// Everything before the first `;`.
    pub id: &'a str,
    /// Everything after the first `;`, still encoded.
    pub payload: &'a str,
}

/// Encodes messages into envelopes and decodes envelopes back.
///
/// Generic over the structural [`Codec`] used for payloads; defaults to
/// [`JsonCodec`], which is what the wire format specifies.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec<C: Codec = JsonCodec> {
    codec: C,
}

impl EnvelopeCodec<JsonCodec> {
    /// Creates an envelope codec with JSON payloads.
    pub fn json() -> Self {
        Self { codec: JsonCodec }
    }
}

impl<C: Codec> EnvelopeCodec<C> {
    /// Creates an envelope codec around a payload codec.
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    /// Returns the payload codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Encodes a message as `id;payload`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the payload can't be encoded.
    pub fn encode(&self, message: &Message) -> Result<String, ProtocolError> {
        self.encode_parts(&message.id, &message.data)
    }

    /// Encodes an id and a payload without building a [`Message`] first.
    pub fn encode_parts(&self, id: &MessageId, data: &Payload) -> Result<String, ProtocolError> {
        let body = self.codec.encode(data)?;
        let mut envelope = String::with_capacity(id.as_str().len() + 1 + body.len());
        envelope.push_str(id.as_str());
        envelope.push(SEPARATOR);
        envelope.push_str(&body);
        Ok(envelope)
    }

    /// Splits an envelope at the first `;`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedEnvelope`] if there is no `;`.
    pub fn decode<'a>(&self, text: &'a str) -> Result<RawEnvelope<'a>, ProtocolError> {
        match text.split_once(SEPARATOR) {
            Some((id, payload)) => Ok(RawEnvelope { id, payload }),
            None => Err(ProtocolError::MalformedEnvelope(preview(text))),
        }
    }

    /// Decodes the payload part of an envelope.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the text isn't a valid object.
    pub fn decode_payload(&self, raw: &str) -> Result<Payload, ProtocolError> {
        self.codec.decode(raw)
    }

    /// Fully decodes an envelope into a [`Message`].
    ///
    /// Unlike [`decode`](Self::decode), this validates the id, so it fails
    /// on an envelope like `";{}"`.
    pub fn decode_message(&self, text: &str) -> Result<Message, ProtocolError> {
        let raw = self.decode(text)?;
        let data = self.decode_payload(raw.payload)?;
        Ok(Message {
            id: MessageId::new(raw.id)?,
            data,
        })
    }
}

/// Truncates text for error messages, respecting char boundaries.
fn preview(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_PREVIEW) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
