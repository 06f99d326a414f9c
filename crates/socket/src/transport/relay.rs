use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use eventsock_protocol::TransportError;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

type Peers = Arc<DashMap<Uuid, mpsc::Sender<Message>>>;

/// Frames queued per peer before the relay starts dropping for it
const PEER_QUEUE_SIZE: usize = 64;

/// WebSocket server that forwards every binary frame between its peers
///
/// WebSocket sockets are clients of a remote endpoint, so two of them talk to
/// each other through a relay.
///
/// ```no_run
/// use eventsock_socket::WebSocketRelay;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let relay = WebSocketRelay::bind("127.0.0.1:9400".parse()?).await?;
/// tokio::spawn(relay.run());
/// # Ok(())
/// # }
/// ```
pub struct WebSocketRelay {
    listener: TcpListener,
    local_addr: SocketAddr,
    echo: bool,
    peers: Peers,
}

impl WebSocketRelay {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(addr = %local_addr, "WebSocket relay listening");

        Ok(Self {
            listener,
            local_addr,
            echo: false,
            peers: Arc::new(DashMap::new()),
        })
    }

    /// Also deliver each frame back to the peer that sent it
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the listener fails
    pub async fn run(self) -> Result<(), TransportError> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            tracing::debug!(peer = %peer_addr, "Relay accepted connection");

            let peers = self.peers.clone();
            let echo = self.echo;
            tokio::spawn(async move {
                if let Err(e) = handle_peer(stream, peer_addr, peers, echo).await {
                    tracing::warn!(peer = %peer_addr, error = %e, "Relay connection error");
                }
            });
        }
    }
}

async fn handle_peer(
    stream: TcpStream,
    peer_addr: SocketAddr,
    peers: Peers,
    echo: bool,
) -> Result<(), TransportError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel(PEER_QUEUE_SIZE);
    let id = Uuid::new_v4();
    peers.insert(id, outgoing_tx);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                for peer in peers.iter() {
                    if *peer.key() == id && !echo {
                        continue;
                    }
                    if let Err(mpsc::error::TrySendError::Full(_)) =
                        peer.value().try_send(Message::Binary(data.clone()))
                    {
                        tracing::debug!(peer = %peer.key(), "Relay peer lagging, dropping frame");
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(peer = %peer_addr, error = %e, "Relay read failed");
                break;
            }
        }
    }

    peers.remove(&id);
    writer.abort();
    tracing::debug!(peer = %peer_addr, "Relay peer disconnected");
    Ok(())
}
