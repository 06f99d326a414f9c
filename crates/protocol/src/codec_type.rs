//! Codec selection
//!
//! [`CodecType`] is the "serializer kind" a socket is configured with. It
//! stores the concrete codec by value so it can be copied into every transport
//! and dispatch task without trait objects.
//!
//! ```
//! use eventsock_protocol::CodecType;
//!
//! let codec = CodecType::from_id(1).unwrap();
//! assert_eq!(codec.name(), "JSON");
//! assert!(CodecType::from_id(99).is_err());
//! ```

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::{Codec, JsonCodec, PostcardCodec};
use crate::envelope::Envelope;
use crate::error::{ProtocolError, Result};

/// Codec ID of the default, self-describing JSON codec
pub const JSON_CODEC_ID: u8 = 1;

/// Codec ID of the compact postcard codec
pub const POSTCARD_CODEC_ID: u8 = 2;

/// Enumeration of all supported codec types
#[derive(Debug, Clone, Copy)]
pub enum CodecType {
    Json(JsonCodec),
    Postcard(PostcardCodec),
}

impl CodecType {
    /// Creates a CodecType from a codec ID
    ///
    /// Returns an error if the codec ID is not recognized.
    pub fn from_id(codec_id: u8) -> Result<Self> {
        match codec_id {
            JSON_CODEC_ID => Ok(CodecType::Json(JsonCodec)),
            POSTCARD_CODEC_ID => Ok(CodecType::Postcard(PostcardCodec)),
            _ => Err(ProtocolError::CodecError(format!(
                "Unknown codec ID: {}",
                codec_id
            ))),
        }
    }

    /// Returns the codec ID
    pub fn id(&self) -> u8 {
        match self {
            CodecType::Json(c) => c.id(),
            CodecType::Postcard(c) => c.id(),
        }
    }

    /// Returns the codec name
    pub fn name(&self) -> &'static str {
        match self {
            CodecType::Json(c) => c.name(),
            CodecType::Postcard(c) => c.name(),
        }
    }

    /// Encodes a value using the selected codec
    pub fn encode<T: Serialize + ?Sized>(&self, message: &T) -> Result<Bytes> {
        match self {
            CodecType::Json(c) => c.encode(message),
            CodecType::Postcard(c) => c.encode(message),
        }
    }

    /// Decodes a value using the selected codec
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecType::Json(c) => c.decode(bytes),
            CodecType::Postcard(c) => c.decode(bytes),
        }
    }

    /// Encodes an envelope into one wire frame
    pub fn encode_envelope(&self, envelope: &Envelope) -> Result<Bytes> {
        match self {
            CodecType::Json(c) => c.encode_envelope(envelope),
            CodecType::Postcard(c) => c.encode_envelope(envelope),
        }
    }

    /// Decodes one wire frame into an envelope
    pub fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope> {
        match self {
            CodecType::Json(c) => c.decode_envelope(bytes),
            CodecType::Postcard(c) => c.decode_envelope(bytes),
        }
    }
}

impl Default for CodecType {
    fn default() -> Self {
        CodecType::Json(JsonCodec)
    }
}

impl PartialEq for CodecType {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for CodecType {}

impl std::fmt::Display for CodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
