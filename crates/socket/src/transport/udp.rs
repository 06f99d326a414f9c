use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use eventsock_protocol::{
    Envelope, Inbound, Transport, TransportError, TransportKind, TransportSettings,
    TransportState,
};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use super::{closed, HandlerCore};

/// Largest UDP payload
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// UDP transport: one datagram per envelope, best effort
#[derive(Clone)]
pub struct UdpTransport {
    core: Arc<HandlerCore>,
}

impl UdpTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            core: Arc::new(HandlerCore::new(settings)),
        }
    }
}

fn ephemeral_for(destination: &SocketAddr) -> SocketAddr {
    match destination {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
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
        self.core.begin_listening()?;

        let socket = match UdpSocket::bind(endpoint).await {
            Ok(socket) => socket,
            Err(source) => {
                self.core.end_listening();
                return Err(TransportError::Bind {
                    addr: endpoint,
                    source,
                });
            }
        };
        let local_addr = socket.local_addr()?;

        tracing::info!(addr = %local_addr, "UDP listener bound");
        let _ = ready.send(local_addr);

        let mut state = self.core.subscribe();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let result = loop {
            tokio::select! {
                _ = closed(&mut state) => break Ok(()),

                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((0, peer)) => {
                            tracing::trace!(peer = %peer, "Ignoring empty datagram");
                        }
                        Ok((len, peer)) => {
                            tracing::trace!(peer = %peer, bytes = len, "Received UDP datagram");
                            let inbound = Inbound::new(Bytes::copy_from_slice(&buf[..len]), peer);
                            if incoming_tx.send(inbound).await.is_err() {
                                tracing::debug!("Inbound channel closed, stopping UDP listener");
                                break Ok(());
                            }
                        }
                        Err(e) => break Err(TransportError::Io(e)),
                    }
                }
            }
        };

        self.core.end_listening();
        if result.is_ok() {
            tracing::info!(addr = %local_addr, "UDP listener stopped");
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
            let socket = UdpSocket::bind(ephemeral_for(&destination)).await?;
            socket.send_to(&frame, destination).await?;
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
            "Sent UDP datagram"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.core.mark_closed() {
            tracing::debug!("UDP transport closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsock_protocol::{CodecType, Payload};
    use std::time::Duration;

    fn settings(receive_port: u16) -> TransportSettings {
        TransportSettings {
            address: "127.0.0.1".parse().unwrap(),
            send_port: 0,
            receive_port,
            timeout: Duration::from_millis(1000),
            codec: CodecType::default(),
        }
    }

    #[tokio::test]
    async fn test_datagram_round_trip() {
        let receiver = UdpTransport::new(settings(0));
        let (incoming_tx, mut incoming_rx) = mpsc::channel(10);
        let (ready_tx, ready_rx) = oneshot::channel();
        let listener = receiver.clone();
        let handle = tokio::spawn(async move {
            listener
                .listen("127.0.0.1:0".parse().unwrap(), incoming_tx, ready_tx)
                .await
        });
        let addr = ready_rx.await.unwrap();

        let sender = UdpTransport::new(settings(9100));
        let codec = CodecType::default();
        let envelope = Envelope::with_payload("ping", Payload::encode(&codec, "hi").unwrap());
        sender.send(envelope, addr).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(2), incoming_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let decoded = codec.decode_envelope(&inbound.bytes).unwrap();
        assert_eq!(decoded.event, "ping");
        assert_eq!(decoded.callback_port, 9100);
        assert!(inbound.peer.ip().is_loopback());

        receiver.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_listen_twice_fails() {
        let transport = UdpTransport::new(settings(0));
        let (incoming_tx, _incoming_rx) = mpsc::channel(10);
        let (ready_tx, ready_rx) = oneshot::channel();
        let listener = transport.clone();
        let handle = tokio::spawn(async move {
            listener
                .listen("127.0.0.1:0".parse().unwrap(), incoming_tx, ready_tx)
                .await
        });
        ready_rx.await.unwrap();

        let (second_tx, _second_rx) = mpsc::channel(10);
        let (second_ready, _) = oneshot::channel();
        let result = transport
            .listen("127.0.0.1:0".parse().unwrap(), second_tx, second_ready)
            .await;
        assert!(matches!(result, Err(TransportError::AlreadyListening)));

        transport.close().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_ephemeral_matches_address_family() {
        let v4: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let v6: SocketAddr = "[::1]:9000".parse().unwrap();
        assert_eq!(ephemeral_for(&v4).port(), 0);
        assert!(ephemeral_for(&v4).is_ipv4());
        assert!(ephemeral_for(&v6).is_ipv6());
    }
}
