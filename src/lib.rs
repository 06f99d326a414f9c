//! # eventsock
//!
//! Event-driven messaging between processes over TCP, UDP or WebSocket:
//! - One `on` / `emit` API regardless of transport
//! - Typed payloads with a self-describing JSON codec or compact Postcard
//! - Handler replies routed back to the sender through an explicit context
//! - Sockets that can be reconfigured in place with `reset`
//!
//! ## Components
//!
//! - `eventsock-protocol`: envelope format, codecs and the transport contract
//! - `eventsock-socket`: the event socket, transports and construction helpers
//!
//! ## Example
//!
//! See `demos/ping_pong.rs` for a runnable UDP ping/ack exchange.

pub use eventsock_protocol as protocol;
pub use eventsock_socket as socket;

/// Items needed by most users
pub mod prelude {
    pub use eventsock_protocol::{CodecType, TransportKind, JSON_CODEC_ID, POSTCARD_CODEC_ID};
    pub use eventsock_socket::{
        io, EmitterHandle, EventContext, EventSocket, ResetOptions, SocketConfig, SocketError,
        WebSocketRelay, DEFAULT_TIMEOUT_MS,
    };
}
