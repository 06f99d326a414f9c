//! # eventsock protocol
//!
//! Core protocol definitions shared by every eventsock transport.
//!
//! This crate provides:
//! - `Envelope` / `Payload`: the on-wire message unit
//! - `Codec` and `CodecType`: pluggable envelope serialization (JSON, Postcard)
//! - `TransportKind`, `Transport`: the capability interface transports implement
//! - `TransportState`: handler lifecycle state machine
//! - Error types for encoding, decoding and validation
//!
//! ## Example
//!
//! ```
//! use eventsock_protocol::{CodecType, Envelope, Payload};
//!
//! let codec = CodecType::default();
//!
//! let mut envelope = Envelope::with_payload("ping", Payload::encode(&codec, &42).unwrap());
//! envelope.stamp(9001);
//!
//! let bytes = codec.encode_envelope(&envelope).unwrap();
//! let received = codec.decode_envelope(&bytes).unwrap();
//!
//! assert_eq!(received.event, "ping");
//! assert_eq!(received.callback_port, 9001);
//! let value: i32 = received.payload.unwrap().decode(&codec).unwrap();
//! assert_eq!(value, 42);
//! ```

pub mod codec;
pub mod codec_type;
pub mod envelope;
pub mod error;
pub mod state;
pub mod transport;

pub use codec_type::{CodecType, JSON_CODEC_ID, POSTCARD_CODEC_ID};
pub use envelope::{decode_optional, Envelope, Payload};
pub use error::{ProtocolError, Result};
pub use state::TransportState;
pub use transport::{Inbound, Transport, TransportError, TransportKind, TransportSettings};
