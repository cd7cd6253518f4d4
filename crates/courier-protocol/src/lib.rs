//! Wire protocol for Courier.
//!
//! This crate defines what travels over a Courier channel:
//!
//! - **Types** ([`Message`], [`MessageId`], [`Payload`]): what producers
//!   publish and listeners receive.
//! - **Envelope** ([`EnvelopeCodec`], [`RawEnvelope`]): the
//!   `<id>;<payload>` text form of a message.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how payloads are
//!   converted to/from text.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! # Architecture
//!
//! The protocol layer sits between the transport (raw text bodies) and the
//! bus (listeners). It doesn't know about connections or handlers.
//!
//! ```text
//! Transport (text) → Protocol (Message) → Bus (listeners)
//! ```

mod codec;
mod envelope;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use envelope::{EnvelopeCodec, RawEnvelope, SEPARATOR};
pub use error::ProtocolError;
pub use types::{Message, MessageId, Payload};
