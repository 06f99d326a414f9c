//! Transport handler state machine
//!
//! State transitions:
//! ```text
//! UNCONFIGURED → CONFIGURED ⇄ LISTENING
//!                    ↓            ↓
//!                    └──→ CLOSED ←┘
//! ```
//!
//! `Closed` is terminal: a closed handler is never reused, the socket builds a
//! fresh one on reset.

use crate::error::{ProtocolError, Result};

/// Lifecycle state of a transport handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Handler exists but has no addresses yet
    #[default]
    Unconfigured,

    /// Addresses, ports and timeout are set; sends are possible
    Configured,

    /// The receive loop is running
    Listening,

    /// Resources released
    Closed,
}

impl TransportState {
    /// Validates a state transition
    pub fn can_transition_to(&self, next: TransportState) -> bool {
        use TransportState::*;

        match (self, next) {
            (Unconfigured, Configured) => true,
            (Unconfigured, Closed) => true,

            // Setup may be re-applied while configured (role attach)
            (Configured, Configured) => true,
            (Configured, Listening) => true,
            (Configured, Closed) => true,

            // Setup while listening only updates send-side settings
            (Listening, Listening) => true,
            // Receive loop stopped by a socket failure; sends still work
            (Listening, Configured) => true,
            (Listening, Closed) => true,

            (Closed, Closed) => true,

            _ => false,
        }
    }

    /// Attempts to transition to a new state
    pub fn transition_to(&mut self, next: TransportState) -> Result<()> {
        if self.can_transition_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(ProtocolError::InvalidStateTransition {
                from: *self,
                to: next,
            })
        }
    }

    #[inline]
    pub fn is_listening(&self) -> bool {
        matches!(self, TransportState::Listening)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportState::Closed)
    }

    /// Returns true if the handler can send (configured or listening)
    #[inline]
    pub fn is_usable(&self) -> bool {
        matches!(self, TransportState::Configured | TransportState::Listening)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::Unconfigured => write!(f, "Unconfigured"),
            TransportState::Configured => write!(f, "Configured"),
            TransportState::Listening => write!(f, "Listening"),
            TransportState::Closed => write!(f, "Closed"),
        }
    }
}
