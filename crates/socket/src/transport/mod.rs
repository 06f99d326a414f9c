//! Transport handlers
//!
//! One type per wire transport, each implementing
//! [`Transport`](eventsock_protocol::Transport). The socket core holds exactly
//! one of them at a time through [`TransportHandler`], selected from the
//! configured [`TransportKind`].

mod relay;
mod tcp;
mod udp;
mod websocket;

pub use relay::WebSocketRelay;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;
pub use websocket::WebSocketTransport;

use std::net::SocketAddr;

use async_trait::async_trait;
use eventsock_protocol::{
    Envelope, Inbound, Transport, TransportError, TransportKind, TransportSettings,
    TransportState,
};
use tokio::sync::{mpsc, oneshot, watch, RwLock};

/// The active transport of a socket
#[derive(Clone)]
pub enum TransportHandler {
    Tcp(TcpTransport),
    Udp(UdpTransport),
    WebSocket(WebSocketTransport),
}

impl TransportHandler {
    /// Builds the handler for `kind`
    ///
    /// WebSocket connects to `address:send_port` here, bounded by the timeout.
    pub async fn build(
        kind: TransportKind,
        settings: TransportSettings,
    ) -> Result<Self, TransportError> {
        let handler = match kind {
            TransportKind::Tcp => TransportHandler::Tcp(TcpTransport::new(settings)),
            TransportKind::Udp => TransportHandler::Udp(UdpTransport::new(settings)),
            TransportKind::WebSocket => {
                TransportHandler::WebSocket(WebSocketTransport::connect(settings).await?)
            }
        };

        tracing::debug!(transport = %kind, "Transport handler ready");
        Ok(handler)
    }
}

#[async_trait]
impl Transport for TransportHandler {
    fn kind(&self) -> TransportKind {
        match self {
            TransportHandler::Tcp(t) => t.kind(),
            TransportHandler::Udp(t) => t.kind(),
            TransportHandler::WebSocket(t) => t.kind(),
        }
    }

    fn state(&self) -> TransportState {
        match self {
            TransportHandler::Tcp(t) => t.state(),
            TransportHandler::Udp(t) => t.state(),
            TransportHandler::WebSocket(t) => t.state(),
        }
    }

    async fn setup(&self, settings: TransportSettings) -> Result<(), TransportError> {
        match self {
            TransportHandler::Tcp(t) => t.setup(settings).await,
            TransportHandler::Udp(t) => t.setup(settings).await,
            TransportHandler::WebSocket(t) => t.setup(settings).await,
        }
    }

    async fn listen(
        &self,
        endpoint: SocketAddr,
        incoming_tx: mpsc::Sender<Inbound>,
        ready: oneshot::Sender<SocketAddr>,
    ) -> Result<(), TransportError> {
        match self {
            TransportHandler::Tcp(t) => t.listen(endpoint, incoming_tx, ready).await,
            TransportHandler::Udp(t) => t.listen(endpoint, incoming_tx, ready).await,
            TransportHandler::WebSocket(t) => t.listen(endpoint, incoming_tx, ready).await,
        }
    }

    async fn send(&self, envelope: Envelope, destination: SocketAddr) -> Result<(), TransportError> {
        match self {
            TransportHandler::Tcp(t) => t.send(envelope, destination).await,
            TransportHandler::Udp(t) => t.send(envelope, destination).await,
            TransportHandler::WebSocket(t) => t.send(envelope, destination).await,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        match self {
            TransportHandler::Tcp(t) => t.close().await,
            TransportHandler::Udp(t) => t.close().await,
            TransportHandler::WebSocket(t) => t.close().await,
        }
    }
}

/// Settings and lifecycle state shared by every handler
///
/// The state lives in a `watch` channel so receive loops can `select!` on it
/// and stop as soon as the handler is closed.
pub(crate) struct HandlerCore {
    settings: RwLock<TransportSettings>,
    state: watch::Sender<TransportState>,
}

impl HandlerCore {
    pub(crate) fn new(settings: TransportSettings) -> Self {
        let (state, _) = watch::channel(TransportState::Unconfigured);
        let core = Self {
            settings: RwLock::new(settings),
            state,
        };
        core.state.send_modify(|state| *state = TransportState::Configured);
        core
    }

    #[inline]
    pub(crate) fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    /// Moves to `next`, waking receive loops if the state changed
    pub(crate) fn transition(&self, next: TransportState) -> Result<(), TransportError> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            let previous = *state;
            match state.transition_to(next) {
                Ok(()) => previous != next,
                Err(e) => {
                    result = Err(e);
                    false
                }
            }
        });
        result.map_err(TransportError::from)
    }

    pub(crate) async fn apply(&self, settings: TransportSettings) -> Result<(), TransportError> {
        if self.state().is_closed() {
            return Err(TransportError::Closed);
        }
        *self.settings.write().await = settings;
        Ok(())
    }

    /// Snapshot of the current settings; fails once closed
    pub(crate) async fn usable_settings(&self) -> Result<TransportSettings, TransportError> {
        if self.state().is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(self.settings.read().await.clone())
    }

    pub(crate) fn begin_listening(&self) -> Result<(), TransportError> {
        match self.state() {
            TransportState::Listening => Err(TransportError::AlreadyListening),
            TransportState::Closed => Err(TransportError::Closed),
            _ => self.transition(TransportState::Listening),
        }
    }

    /// Drops back to `Configured` after the receive loop stopped on its own
    pub(crate) fn end_listening(&self) {
        if self.state().is_listening() {
            let _ = self.transition(TransportState::Configured);
        }
    }

    /// Marks the handler closed; returns false if it already was
    pub(crate) fn mark_closed(&self) -> bool {
        let was_closed = self.state().is_closed();
        let _ = self.transition(TransportState::Closed);
        !was_closed
    }
}

/// Resolves once `state` reports the handler closed (or its sender is gone)
pub(crate) async fn closed(state: &mut watch::Receiver<TransportState>) {
    let _ = state.wait_for(TransportState::is_closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsock_protocol::CodecType;
    use std::time::Duration;

    fn settings() -> TransportSettings {
        TransportSettings {
            address: "127.0.0.1".parse().unwrap(),
            send_port: 9000,
            receive_port: 0,
            timeout: Duration::from_millis(500),
            codec: CodecType::default(),
        }
    }

    #[test]
    fn test_core_starts_configured() {
        let core = HandlerCore::new(settings());
        assert_eq!(core.state(), TransportState::Configured);
    }

    #[test]
    fn test_begin_listening_twice_fails() {
        let core = HandlerCore::new(settings());
        core.begin_listening().unwrap();
        assert!(matches!(
            core.begin_listening(),
            Err(TransportError::AlreadyListening)
        ));
        core.end_listening();
        assert_eq!(core.state(), TransportState::Configured);
    }

    #[test]
    fn test_mark_closed_reports_first_close_only() {
        let core = HandlerCore::new(settings());
        assert!(core.mark_closed());
        assert!(!core.mark_closed());
        assert!(matches!(core.begin_listening(), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_closed_handler_rejects_setup() {
        let core = HandlerCore::new(settings());
        core.mark_closed();
        assert!(matches!(
            core.apply(settings()).await,
            Err(TransportError::Closed)
        ));
        assert!(core.usable_settings().await.is_err());
    }

    #[tokio::test]
    async fn test_closed_wakes_subscribers() {
        let core = HandlerCore::new(settings());
        let mut state = core.subscribe();

        let waiter = tokio::spawn(async move { closed(&mut state).await });
        core.mark_closed();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake on close")
            .unwrap();
    }
}
