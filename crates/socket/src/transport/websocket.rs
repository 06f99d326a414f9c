use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use eventsock_protocol::{
    Envelope, Inbound, Transport, TransportError, TransportKind, TransportSettings,
    TransportState,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{closed, HandlerCore};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport: one persistent duplex connection
///
/// The connection to `ws://address:send_port` is opened when the handler is
/// built. Sends and the receive loop share it, so the destination passed to
/// `send` is informational only.
#[derive(Clone)]
pub struct WebSocketTransport {
    core: Arc<HandlerCore>,
    remote: SocketAddr,
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    stream: Arc<Mutex<Option<SplitStream<WsStream>>>>,
}

impl WebSocketTransport {
    /// Connects to `address:send_port`, bounded by the configured timeout
    pub async fn connect(settings: TransportSettings) -> Result<Self, TransportError> {
        let remote = SocketAddr::new(settings.address, settings.send_port);
        let url = format!("ws://{remote}");

        tracing::info!(url = %url, "Connecting to WebSocket endpoint");

        let (ws_stream, _) = tokio::time::timeout(settings.timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout {
                destination: remote,
                timeout: settings.timeout,
            })?
            .map_err(|e| TransportError::Connect {
                addr: remote,
                reason: e.to_string(),
            })?;

        tracing::info!(url = %url, "WebSocket connection established");

        let (sink, stream) = ws_stream.split();
        Ok(Self {
            core: Arc::new(HandlerCore::new(settings)),
            remote,
            sink: Arc::new(Mutex::new(sink)),
            stream: Arc::new(Mutex::new(Some(stream))),
        })
    }

    /// Address of the connected endpoint
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn state(&self) -> TransportState {
        self.core.state()
    }

    async fn setup(&self, settings: TransportSettings) -> Result<(), TransportError> {
        self.core.apply(settings).await
    }

    async fn listen(
        &self,
        _endpoint: SocketAddr,
        incoming_tx: mpsc::Sender<Inbound>,
        ready: oneshot::Sender<SocketAddr>,
    ) -> Result<(), TransportError> {
        self.core.begin_listening()?;

        // The read half can be driven by one receive loop only
        let Some(mut ws_receiver) = self.stream.lock().await.take() else {
            self.core.end_listening();
            return Err(TransportError::AlreadyListening);
        };

        let _ = ready.send(self.remote);

        let mut state = self.core.subscribe();
        let result = loop {
            tokio::select! {
                _ = closed(&mut state) => break Ok(()),

                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let inbound = Inbound::new(Bytes::from(data), self.remote);
                            if incoming_tx.send(inbound).await.is_err() {
                                tracing::debug!("Inbound channel closed, stopping WebSocket listener");
                                break Ok(());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(remote = %self.remote, frame = ?frame, "Remote closed WebSocket");
                            break Ok(());
                        }
                        Some(Ok(_)) => {
                            // Text and control frames carry no envelopes
                        }
                        Some(Err(e)) => break Err(TransportError::WebSocket(e.to_string())),
                        None => {
                            tracing::info!(remote = %self.remote, "WebSocket connection closed");
                            break Ok(());
                        }
                    }
                }
            }
        };

        self.core.end_listening();
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

        if destination != self.remote {
            tracing::trace!(
                destination = %destination,
                remote = %self.remote,
                "WebSocket sends always go to the connected endpoint"
            );
        }

        tokio::time::timeout(settings.timeout, async {
            self.sink
                .lock()
                .await
                .send(Message::Binary(frame.to_vec()))
                .await
        })
        .await
        .map_err(|_| TransportError::Timeout {
            destination: self.remote,
            timeout: settings.timeout,
        })?
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        tracing::trace!(
            remote = %self.remote,
            event = %envelope.event,
            bytes = frame.len(),
            "Sent WebSocket frame"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let timeout = self.core.usable_settings().await.map(|s| s.timeout);
        if !self.core.mark_closed() {
            return Ok(());
        }
        let Ok(timeout) = timeout else {
            return Ok(());
        };

        let close_frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "Closing normally".into(),
        };

        let mut sink = self.sink.lock().await;
        let sent = tokio::time::timeout(timeout, sink.send(Message::Close(Some(close_frame)))).await;
        let _ = sink.close().await;

        match sent {
            Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed)) | Ok(Err(WsError::AlreadyClosed)) => {
                tracing::debug!(remote = %self.remote, "WebSocket transport closed");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::WebSocket(e.to_string())),
            Err(_) => Err(TransportError::Timeout {
                destination: self.remote,
                timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsock_protocol::{CodecType, Payload};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn start_echo_server() -> (SocketAddr, mpsc::Receiver<Message>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::channel(10);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen_tx = seen_tx.clone();
                tokio::spawn(async move {
                    let ws_stream = accept_async(stream).await.unwrap();
                    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

                    while let Some(Ok(msg)) = ws_receiver.next().await {
                        let _ = seen_tx.send(msg.clone()).await;
                        if let Message::Binary(data) = msg {
                            let _ = ws_sender.send(Message::Binary(data)).await;
                        }
                    }
                });
            }
        });

        (addr, seen_rx)
    }

    fn settings(port: u16) -> TransportSettings {
        TransportSettings {
            address: "127.0.0.1".parse().unwrap(),
            send_port: port,
            receive_port: port,
            timeout: Duration::from_millis(1000),
            codec: CodecType::default(),
        }
    }

    #[tokio::test]
    async fn test_connect_fails_without_server() {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let result = WebSocketTransport::connect(settings(port)).await;
        assert!(matches!(
            result,
            Err(TransportError::Connect { .. }) | Err(TransportError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_echoed_frame_is_forwarded() {
        let (addr, _seen_rx) = start_echo_server().await;
        let transport = WebSocketTransport::connect(settings(addr.port())).await.unwrap();

        let (incoming_tx, mut incoming_rx) = mpsc::channel(10);
        let (ready_tx, ready_rx) = oneshot::channel();
        let listener = transport.clone();
        let handle = tokio::spawn(async move { listener.listen(addr, incoming_tx, ready_tx).await });
        assert_eq!(ready_rx.await.unwrap(), addr);

        let codec = CodecType::default();
        let envelope = Envelope::with_payload("ping", Payload::encode(&codec, &7u8).unwrap());
        transport.send(envelope, addr).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(2), incoming_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let decoded = codec.decode_envelope(&inbound.bytes).unwrap();
        assert_eq!(decoded.event, "ping");
        assert_eq!(decoded.callback_port, addr.port());

        transport.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_close_sends_normal_closure_once() {
        let (addr, mut seen_rx) = start_echo_server().await;
        let transport = WebSocketTransport::connect(settings(addr.port())).await.unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match msg {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason, "Closing normally");
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        let result = transport.send(Envelope::new("late"), addr).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
