use thiserror::Error;

use crate::state::TransportState;

/// Errors raised while encoding, decoding or validating protocol values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Codec error: {0}")]
    CodecError(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: TransportState,
        to: TransportState,
    },

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
