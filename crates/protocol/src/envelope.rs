//! Message envelope and typed payload
//!
//! The [`Envelope`] is the only unit that crosses the wire: one envelope per
//! TCP connection, per UDP datagram or per WebSocket binary frame. It carries
//! the event name, an optional [`Payload`] and the callback port the sender
//! listens on so the receiver can route a reply.

use bytes::Bytes;
use serde::de::value::UnitDeserializer;
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};

use crate::codec_type::CodecType;
use crate::error::{ProtocolError, Result};

/// Encoded payload together with the type name it was produced from
///
/// The body is encoded with the codec of the socket that emitted it, so both
/// peers must agree on the codec. `type_name` is the concrete type the sender
/// serialized, kept for diagnostics when the receiver cannot coerce the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Concrete type name of the value at the sending site
    pub type_name: String,

    /// Codec-encoded value
    pub body: Bytes,
}

impl Payload {
    /// Encodes `value` with `codec`, recording its concrete type name
    pub fn encode<T: Serialize + ?Sized>(codec: &CodecType, value: &T) -> Result<Self> {
        Ok(Self {
            type_name: std::any::type_name::<T>().to_string(),
            body: codec.encode(value)?,
        })
    }

    /// Decodes the body into `T` with `codec`
    pub fn decode<T: DeserializeOwned>(&self, codec: &CodecType) -> Result<T> {
        codec.decode(&self.body)
    }
}

/// Decodes an optional payload into `T`
///
/// A missing payload is coerced from a unit value, which succeeds for `()` and
/// `Option<_>` and fails for everything else.
pub fn decode_optional<T: DeserializeOwned>(
    payload: Option<&Payload>,
    codec: &CodecType,
) -> Result<T> {
    match payload {
        Some(payload) => payload.decode(codec),
        None => {
            let unit: UnitDeserializer<serde::de::value::Error> = ().into_deserializer();
            T::deserialize(unit)
                .map_err(|e| ProtocolError::CodecError(format!("missing payload: {}", e)))
        }
    }
}

/// Network message envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Event name, case-sensitive
    pub event: String,

    /// Optional payload; absent for bodiless events
    pub payload: Option<Payload>,

    /// Port the sender is listening on (0 = no reply path)
    pub callback_port: u16,
}

impl Envelope {
    /// Creates an envelope without a payload
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: None,
            callback_port: 0,
        }
    }

    /// Creates an envelope carrying `payload`
    pub fn with_payload(event: impl Into<String>, payload: Payload) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
            callback_port: 0,
        }
    }

    /// Overwrites the callback port
    ///
    /// Transports call this at send time with their own receive port, replacing
    /// whatever the caller set.
    pub fn stamp(&mut self, callback_port: u16) {
        self.callback_port = callback_port;
    }

    /// Validates the envelope
    pub fn validate(&self) -> Result<()> {
        if self.event.is_empty() {
            return Err(ProtocolError::InvalidEnvelope(
                "event name must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Returns true if the envelope carries a payload
    #[inline]
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Returns true if the sender can be replied to
    #[inline]
    pub fn has_reply_path(&self) -> bool {
        self.callback_port != 0
    }
}
