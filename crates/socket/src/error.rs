use std::net::SocketAddr;

use eventsock_protocol::{ProtocolError, TransportError};

/// Errors surfaced by the socket API
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Invalid or conflicting setup; never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Emit attempted without a send port (or after close)
    #[error("Socket not configured for sending: {0}")]
    NotConfigured(String),

    #[error("Send to {destination} did not complete within {timeout_ms} ms")]
    TransportTimeout {
        destination: SocketAddr,
        timeout_ms: u64,
    },

    /// Malformed bytes on decode or an unsupported value on encode
    #[error("Serialization error: {0}")]
    Serialization(#[from] ProtocolError),

    /// Inbound payload does not fit the handler's declared parameter type
    #[error("Payload for '{event}' ({actual}) cannot be coerced to {expected}: {reason}")]
    PayloadType {
        event: String,
        expected: &'static str,
        actual: String,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for SocketError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout {
                destination,
                timeout,
            } => SocketError::TransportTimeout {
                destination,
                timeout_ms: timeout.as_millis() as u64,
            },
            TransportError::Protocol(e) => SocketError::Serialization(e),
            TransportError::Closed => {
                SocketError::NotConfigured("transport is closed; reset the socket to reuse it".into())
            }
            other => SocketError::Transport(other),
        }
    }
}

impl SocketError {
    /// Returns true for the errors the receive path drops instead of propagating
    pub fn is_inbound_tolerated(&self) -> bool {
        matches!(
            self,
            SocketError::Serialization(_) | SocketError::PayloadType { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SocketError>;
