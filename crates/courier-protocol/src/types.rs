//! Core message types.
//!
//! A [`Message`] is what producers hand to the bus: a [`MessageId`] that
//! selects which listeners receive it, and a [`Payload`] carrying the data.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::ProtocolError;
use crate::envelope::SEPARATOR;

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// The message-kind identifier, e.g. `"order.created"`.
///
/// A newtype over `String` that can only be constructed through
/// [`MessageId::new`], which enforces the two wire invariants:
///
/// 1. the id is non-empty, and
/// 2. the id doesn't contain the envelope separator `;`.
///
/// An id with a `;` in it would be split in the wrong place on the
/// receiving side, so it is rejected here instead of being escaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Validates and wraps a message-kind identifier.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessageId`] if `id` is empty or
    /// contains `;`.
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if id.is_empty() || id.contains(SEPARATOR) {
            return Err(ProtocolError::InvalidMessageId(id));
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id, returning the inner `String`.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets a `HashMap<MessageId, _>` be queried with a plain `&str`.
impl Borrow<str> for MessageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for MessageId {
    type Error = ProtocolError;

    fn try_from(id: &str) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl TryFrom<String> for MessageId {
    type Error = ProtocolError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The structured data carried by a message: a JSON object.
///
/// Keys are field names, values are any JSON value (numbers, strings,
/// booleans, nested objects/arrays, null). Key order carries no meaning;
/// equality is structural.
///
/// `#[serde(transparent)]` makes a `Payload` serialize as the bare object,
/// and deserializing one fails for anything that isn't an object, so a
/// payload of `42` or `[1,2]` is a decode error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds a payload from any value that serializes to a JSON object.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if `value` can't be serialized or
    /// serializes to something other than an object.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(value).map_err(ProtocolError::Encode)?;
        Self::try_from(value).map_err(ProtocolError::Encode)
    }

    /// Decodes the payload into a typed value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the fields don't match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(ProtocolError::Decode)
    }

    /// Inserts a field, returning `self` so calls can be chained.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts a field, returning the previous value if there was one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Looks up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the payload, returning the underlying JSON object.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Payload {
    type Error = serde_json::Error;

    /// Accepts `Value::Object` only.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(serde::de::Error::invalid_type(
                unexpected(&other),
                &"a JSON object",
            )),
        }
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        Value::Object(payload.0)
    }
}

fn unexpected(value: &Value) -> serde::de::Unexpected<'_> {
    use serde::de::Unexpected;
    match value {
        Value::Null => Unexpected::Unit,
        Value::Bool(b) => Unexpected::Bool(*b),
        Value::Number(_) => Unexpected::Other("number"),
        Value::String(s) => Unexpected::Str(s),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A logical unit exchanged over the bus.
///
/// Constructed by the producer right before publishing and never changed
/// afterwards. Messages have no identity of their own; publishing the same
/// message twice sends two independent envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub data: Payload,
}

impl Message {
    /// Creates a message, validating the id.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessageId`] for an empty id or one
    /// containing `;`.
    pub fn new(id: impl Into<String>, data: Payload) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: MessageId::new(id)?,
            data,
        })
    }

    /// Creates a message whose payload is built from a serializable value.
    ///
    /// ```rust
    /// use courier_protocol::Message;
    ///
    /// #[derive(serde::Serialize)]
    /// struct OrderCreated { order_id: String, total: f64 }
    ///
    /// let msg = Message::from_serialize(
    ///     "order.created",
    ///     &OrderCreated { order_id: "abc123".into(), total: 42.5 },
    /// ).unwrap();
    /// assert_eq!(msg.data.get("total"), Some(&serde_json::json!(42.5)));
    /// ```
    pub fn from_serialize<T: Serialize>(
        id: impl Into<String>,
        value: &T,
    ) -> Result<Self, ProtocolError> {
        Self::new(id, Payload::from_serialize(value)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // =====================================================================
    // MessageId
    // =====================================================================

    #[test]
    fn test_message_id_accepts_dotted_names() {
        let id = MessageId::new("order.created").unwrap();
        assert_eq!(id.as_str(), "order.created");
        assert_eq!(id.to_string(), "order.created");
    }

    #[test]
    fn test_message_id_rejects_empty() {
        assert!(matches!(
            MessageId::new(""),
            Err(ProtocolError::InvalidMessageId(_))
        ));
    }

    #[test]
    fn test_message_id_rejects_separator() {
        assert!(matches!(
            MessageId::new("a;b"),
            Err(ProtocolError::InvalidMessageId(id)) if id == "a;b"
        ));
    }

    #[test]
    fn test_message_id_deserialize_validates() {
        let ok: MessageId = serde_json::from_str(r#""ping""#).unwrap();
        assert_eq!(ok.as_str(), "ping");

        let bad: Result<MessageId, _> = serde_json::from_str(r#""pi;ng""#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_message_id_borrows_as_str_for_map_lookup() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(MessageId::new("ping").unwrap(), 1);
        assert_eq!(map.get("ping"), Some(&1));
    }

    // =====================================================================
    // Payload
    // =====================================================================

    #[test]
    fn test_payload_try_from_object() {
        let payload = Payload::try_from(json!({ "n": 1, "tags": ["a"] })).unwrap();
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.get("n"), Some(&json!(1)));
    }

    #[test]
    fn test_payload_try_from_scalar_fails() {
        assert!(Payload::try_from(json!(42)).is_err());
        assert!(Payload::try_from(json!([1, 2])).is_err());
        assert!(Payload::try_from(json!(null)).is_err());
    }

    #[test]
    fn test_payload_with_chains_fields() {
        let payload = Payload::new().with("orderId", "abc123").with("total", 42.5);
        assert_eq!(
            Value::from(payload),
            json!({ "orderId": "abc123", "total": 42.5 })
        );
    }

    #[test]
    fn test_payload_decode_into_struct() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Ping {
            n: u32,
        }

        let payload = Payload::new().with("n", 7);
        let ping: Ping = payload.decode().unwrap();
        assert_eq!(ping, Ping { n: 7 });
    }

    #[test]
    fn test_payload_decode_wrong_shape_is_decode_error() {
        #[derive(Deserialize, Debug)]
        #[allow(dead_code)]
        struct Ping {
            n: u32,
        }

        let payload = Payload::new().with("n", "seven");
        assert!(matches!(
            payload.decode::<Ping>(),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_payload_from_serialize_rejects_non_object() {
        let result = Payload::from_serialize(&vec![1, 2, 3]);
        assert!(matches!(result, Err(ProtocolError::Encode(_))));
    }

    #[test]
    fn test_payload_equality_ignores_key_order() {
        let a = Payload::new().with("x", 1).with("y", 2);
        let b = Payload::new().with("y", 2).with("x", 1);
        assert_eq!(a, b);
    }

    // =====================================================================
    // Message
    // =====================================================================

    #[test]
    fn test_message_new_validates_id() {
        assert!(Message::new("ping", Payload::new()).is_ok());
        assert!(Message::new("", Payload::new()).is_err());
        assert!(Message::new("bad;id", Payload::new()).is_err());
    }

    #[test]
    fn test_message_from_serialize() {
        #[derive(Serialize)]
        struct Joined {
            player: String,
        }

        let msg = Message::from_serialize("lobby.joined", &Joined { player: "ana".into() })
            .unwrap();
        assert_eq!(msg.id.as_str(), "lobby.joined");
        assert_eq!(msg.data.get("player"), Some(&json!("ana")));
    }
}
