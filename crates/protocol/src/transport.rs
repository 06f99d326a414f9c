//! Transport layer abstraction
//!
//! This module defines the capability trait every transport implements (TCP,
//! UDP, WebSocket) together with the values that flow across it. The socket
//! core selects one implementation per configuration and only talks to it
//! through this contract, so the event API stays identical over
//! connectionless datagrams, short-lived streams and persistent duplex
//! sockets.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::codec_type::CodecType;
use crate::error::ProtocolError;
use crate::state::TransportState;
use crate::Envelope;

/// Wire transport selected for a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Connection-oriented; every emit opens a fresh short-lived connection
    Tcp,
    /// Connectionless, best-effort datagrams
    Udp,
    /// One persistent full-duplex socket; send and receive ports are equal
    #[serde(rename = "websocket")]
    WebSocket,
}

impl TransportKind {
    /// Returns true if the transport uses one socket for both directions
    #[inline]
    pub fn is_duplex(&self) -> bool {
        matches!(self, TransportKind::WebSocket)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::WebSocket => write!(f, "websocket"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "udp" => Ok(TransportKind::Udp),
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            other => Err(ProtocolError::UnknownTransport(other.to_string())),
        }
    }
}

/// Raw inbound frame handed from a transport to the socket core
///
/// `peer` is the remote address the bytes arrived from. Only its IP is used for
/// replies; the port comes from the envelope's callback port.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub bytes: Bytes,
    pub peer: SocketAddr,
}

impl Inbound {
    pub fn new(bytes: Bytes, peer: SocketAddr) -> Self {
        Self { bytes, peer }
    }
}

/// Settings a transport handler is (re)configured with
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    /// Remote address for the default route
    pub address: IpAddr,

    /// Remote port for the default route (0 = sender role not configured)
    pub send_port: u16,

    /// Local receive port, stamped as callback port on every send
    pub receive_port: u16,

    /// Bound on a single send attempt
    pub timeout: Duration,

    /// Codec used to frame outbound envelopes
    pub codec: CodecType,
}

/// Errors produced by transport handlers
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: SocketAddr, reason: String },

    #[error("Send to {destination} timed out after {timeout:?}")]
    Timeout {
        destination: SocketAddr,
        timeout: Duration,
    },

    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Transport is closed")]
    Closed,

    #[error("Transport is already listening")]
    AlreadyListening,
}

/// Capability interface implemented by every transport
///
/// Handlers are cheap to clone (shared state lives behind an `Arc`) so the
/// socket core can move a clone into the background listen task while keeping
/// its own for sends.
///
/// # Example: implementing a custom transport
///
/// ```no_run
/// use async_trait::async_trait;
/// use eventsock_protocol::transport::{Inbound, Transport, TransportError, TransportSettings};
/// use eventsock_protocol::{Envelope, TransportKind, TransportState};
/// use std::net::SocketAddr;
/// use tokio::sync::{mpsc, oneshot};
///
/// #[derive(Clone)]
/// struct Loopback;
///
/// #[async_trait]
/// impl Transport for Loopback {
///     fn kind(&self) -> TransportKind { TransportKind::Udp }
///     fn state(&self) -> TransportState { TransportState::Configured }
///     async fn setup(&self, _settings: TransportSettings) -> Result<(), TransportError> { Ok(()) }
///     async fn listen(
///         &self,
///         _endpoint: SocketAddr,
///         _incoming_tx: mpsc::Sender<Inbound>,
///         _ready: oneshot::Sender<SocketAddr>,
///     ) -> Result<(), TransportError> { Ok(()) }
///     async fn send(&self, _envelope: Envelope, _destination: SocketAddr) -> Result<(), TransportError> { Ok(()) }
///     async fn close(&self) -> Result<(), TransportError> { Ok(()) }
/// }
/// ```
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Which wire transport this handler speaks
    fn kind(&self) -> TransportKind;

    /// Current lifecycle state
    fn state(&self) -> TransportState;

    /// Applies new settings; fails once the handler is closed
    async fn setup(&self, settings: TransportSettings) -> Result<(), TransportError>;

    /// Runs the receive loop until the handler is closed
    ///
    /// Binds (or attaches to) `endpoint`, reports the bound address through
    /// `ready`, then forwards every inbound frame to `incoming_tx`. Returns
    /// `Ok(())` on close, or the socket error that stopped the loop.
    async fn listen(
        &self,
        endpoint: SocketAddr,
        incoming_tx: mpsc::Sender<Inbound>,
        ready: oneshot::Sender<SocketAddr>,
    ) -> Result<(), TransportError>;

    /// Sends one envelope to `destination`, bounded by the configured timeout
    ///
    /// The envelope's callback port is stamped with the handler's receive
    /// port before encoding.
    async fn send(&self, envelope: Envelope, destination: SocketAddr)
        -> Result<(), TransportError>;

    /// Stops the receive loop and releases resources; closing twice is a no-op
    async fn close(&self) -> Result<(), TransportError>;
}
