//! Codec abstraction for envelope and payload serialization
//!
//! A codec turns both halves of a message into bytes: the payload value a
//! handler sees, and the [`Envelope`] that wraps it on the wire. Encoding the
//! envelope through the codec (rather than just the payload) keeps the event
//! name and callback port travelling together with the body.
//!
//! # Codec IDs
//!
//! - `1`: JSON (serde_json), self-describing, the default
//! - `2`: Postcard (serde postcard), compact binary
//!
//! # Usage
//!
//! ```
//! use eventsock_protocol::codec::{Codec, JsonCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Login {
//!     name: String,
//! }
//!
//! let codec = JsonCodec;
//! let message = Login { name: "juanlu".into() };
//!
//! let bytes = codec.encode(&message).unwrap();
//! let decoded: Login = codec.decode(&bytes).unwrap();
//! assert_eq!(message, decoded);
//! ```

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::envelope::{Envelope, Payload};
use crate::error::{ProtocolError, Result};

/// Codec trait for serializing/deserializing payloads and envelopes
///
/// Implementations must be thread-safe (Send + Sync) as they are shared by
/// the send path and every concurrent dispatch task.
pub trait Codec: Send + Sync {
    /// Returns the codec ID (1=JSON, 2=Postcard)
    fn id(&self) -> u8;

    /// Returns a human-readable name for this codec
    fn name(&self) -> &'static str;

    /// Encodes a serializable value into bytes
    fn encode<T: Serialize + ?Sized>(&self, message: &T) -> Result<Bytes>;

    /// Decodes bytes into a deserializable value
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Encodes a whole envelope into one wire frame
    fn encode_envelope(&self, envelope: &Envelope) -> Result<Bytes>;

    /// Decodes one wire frame into an envelope
    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope>;
}

/// JSON codec (codec_id = 1)
///
/// Payload values are embedded verbatim in the envelope, next to the type
/// name they were produced from:
///
/// ```text
/// {"event":"ping","payload":{"type":"i32","value":42},"callback_port":9001}
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Serialize)]
struct JsonEnvelopeRef<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<JsonPayloadRef<'a>>,
    callback_port: u16,
}

#[derive(Serialize)]
struct JsonPayloadRef<'a> {
    #[serde(rename = "type")]
    type_name: &'a str,
    value: &'a RawValue,
}

#[derive(Deserialize)]
struct JsonEnvelopeOwned {
    event: String,
    #[serde(default)]
    payload: Option<JsonPayloadOwned>,
    #[serde(default)]
    callback_port: u16,
}

#[derive(Deserialize)]
struct JsonPayloadOwned {
    #[serde(rename = "type")]
    type_name: String,
    value: Box<RawValue>,
}

impl Codec for JsonCodec {
    fn id(&self) -> u8 {
        1
    }

    fn name(&self) -> &'static str {
        "JSON"
    }

    fn encode<T: Serialize + ?Sized>(&self, message: &T) -> Result<Bytes> {
        let vec = serde_json::to_vec(message)
            .map_err(|e| ProtocolError::CodecError(format!("JSON encode failed: {}", e)))?;
        Ok(Bytes::from(vec))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::CodecError(format!("JSON decode failed: {}", e)))
    }

    fn encode_envelope(&self, envelope: &Envelope) -> Result<Bytes> {
        envelope.validate()?;

        let payload = match &envelope.payload {
            Some(payload) => {
                let value: &RawValue = serde_json::from_slice(&payload.body).map_err(|e| {
                    ProtocolError::CodecError(format!("payload is not JSON: {}", e))
                })?;
                Some((payload.type_name.as_str(), value))
            }
            None => None,
        };

        let wire = JsonEnvelopeRef {
            event: &envelope.event,
            payload: payload.map(|(type_name, value)| JsonPayloadRef { type_name, value }),
            callback_port: envelope.callback_port,
        };

        self.encode(&wire)
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope> {
        let wire: JsonEnvelopeOwned = self.decode(bytes)?;

        let envelope = Envelope {
            event: wire.event,
            payload: wire.payload.map(|payload| Payload {
                type_name: payload.type_name,
                body: Bytes::from(payload.value.get().to_owned()),
            }),
            callback_port: wire.callback_port,
        };

        envelope.validate()?;
        Ok(envelope)
    }
}

/// Postcard codec (codec_id = 2)
///
/// Uses postcard for compact binary serialization. Postcard is not
/// self-describing, so the receiving handler's declared type must match the
/// layout the sender encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

// Field order is the wire layout; both structs must stay in sync.
#[derive(Serialize)]
struct PostcardEnvelopeRef<'a> {
    event: &'a str,
    payload: Option<&'a Payload>,
    callback_port: u16,
}

#[derive(Deserialize)]
struct PostcardEnvelope {
    event: String,
    payload: Option<Payload>,
    callback_port: u16,
}

impl Codec for PostcardCodec {
    fn id(&self) -> u8 {
        2
    }

    fn name(&self) -> &'static str {
        "Postcard"
    }

    fn encode<T: Serialize + ?Sized>(&self, message: &T) -> Result<Bytes> {
        let vec = postcard::to_allocvec(message)
            .map_err(|e| ProtocolError::CodecError(format!("Postcard encode failed: {}", e)))?;
        Ok(Bytes::from(vec))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        postcard::from_bytes(bytes)
            .map_err(|e| ProtocolError::CodecError(format!("Postcard decode failed: {}", e)))
    }

    fn encode_envelope(&self, envelope: &Envelope) -> Result<Bytes> {
        envelope.validate()?;

        let wire = PostcardEnvelopeRef {
            event: &envelope.event,
            payload: envelope.payload.as_ref(),
            callback_port: envelope.callback_port,
        };

        self.encode(&wire)
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope> {
        let wire: PostcardEnvelope = self.decode(bytes)?;

        let envelope = Envelope {
            event: wire.event,
            payload: wire.payload,
            callback_port: wire.callback_port,
        };

        envelope.validate()?;
        Ok(envelope)
    }
}
