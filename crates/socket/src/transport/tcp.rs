use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eventsock_protocol::{
    Envelope, Inbound, Transport, TransportError, TransportKind, TransportSettings,
    TransportState,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use super::{closed, HandlerCore};

/// Largest envelope accepted on one inbound connection
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// TCP transport: one short-lived connection per emitted envelope
///
/// The listener reads each accepted connection to end-of-stream and forwards
/// the bytes as one frame.
#[derive(Clone)]
pub struct TcpTransport {
    core: Arc<HandlerCore>,
}

impl TcpTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            core: Arc::new(HandlerCore::new(settings)),
        }
    }
}

/// Reads one connection to completion and hands the frame over
async fn read_frame(
    stream: TcpStream,
    peer: SocketAddr,
    incoming_tx: mpsc::Sender<Inbound>,
    read_timeout: Duration,
) -> Result<(), TransportError> {
    let mut buf = Vec::new();
    let mut limited = stream.take(MAX_FRAME_SIZE as u64);

    tokio::time::timeout(read_timeout, limited.read_to_end(&mut buf))
        .await
        .map_err(|_| TransportError::Timeout {
            destination: peer,
            timeout: read_timeout,
        })??;

    if buf.is_empty() {
        tracing::trace!(peer = %peer, "Connection closed without data");
        return Ok(());
    }

    tracing::trace!(peer = %peer, bytes = buf.len(), "Received TCP frame");
    incoming_tx
        .send(Inbound::new(Bytes::from(buf), peer))
        .await
        .map_err(|_| TransportError::Closed)
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn state(&self) -> TransportState {
        self.core.state()
    }

    async fn setup(&self, settings: TransportSettings) -> Result<(), TransportError> {
        self.core.apply(settings).await
    }

    async fn listen(
        &self,
        endpoint: SocketAddr,
        incoming_tx: mpsc::Sender<Inbound>,
        ready: oneshot::Sender<SocketAddr>,
    ) -> Result<(), TransportError> {
        let read_timeout = self.core.usable_settings().await?.timeout;
        self.core.begin_listening()?;

        let listener = match TcpListener::bind(endpoint).await {
            Ok(listener) => listener,
            Err(source) => {
                self.core.end_listening();
                return Err(TransportError::Bind {
                    addr: endpoint,
                    source,
                });
            }
        };
        let local_addr = listener.local_addr()?;

        tracing::info!(addr = %local_addr, "TCP listener bound");
        let _ = ready.send(local_addr);

        let mut state = self.core.subscribe();
        let result = loop {
            tokio::select! {
                _ = closed(&mut state) => break Ok(()),

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(peer = %peer, "Accepted TCP connection");
                            let incoming_tx = incoming_tx.clone();

                            tokio::spawn(async move {
                                if let Err(e) = read_frame(stream, peer, incoming_tx, read_timeout).await {
                                    tracing::debug!(peer = %peer, error = %e, "Dropping TCP connection");
                                }
                            });
                        }
                        Err(e) => break Err(TransportError::Io(e)),
                    }
                }
            }
        };

        self.core.end_listening();
        if result.is_ok() {
            tracing::info!(addr = %local_addr, "TCP listener stopped");
        }
        result
    }

    async fn send(
        &self,
        mut envelope: Envelope,
        destination: SocketAddr,
    ) -> Result<(), TransportError> {
        let settings = self.core.usable_settings().await?;
        envelope.stamp(settings.receive_port);
        let frame = settings.codec.encode_envelope(&envelope)?;

        tokio::time::timeout(settings.timeout, async {
            let mut stream = TcpStream::connect(destination).await.map_err(|e| {
                TransportError::Connect {
                    addr: destination,
                    reason: e.to_string(),
                }
            })?;
            stream.write_all(&frame).await?;
            stream.shutdown().await?;
            Ok::<_, TransportError>(())
        })
        .await
        .map_err(|_| TransportError::Timeout {
            destination,
            timeout: settings.timeout,
        })??;

        tracing::trace!(
            destination = %destination,
            event = %envelope.event,
            bytes = frame.len(),
            "Sent TCP frame"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.core.mark_closed() {
            tracing::debug!("TCP transport closed");
        }
        Ok(())
    }
}
