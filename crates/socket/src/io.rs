//! Construction helpers
//!
//! Thin wrappers over [`EventSocket::configure`] for the common shapes:
//! sender only, listener only, or both. Listener-capable sockets are returned
//! already listening, so register handlers right after creation; envelopes
//! arriving before a handler exists are dropped like any unknown event.

use eventsock_protocol::{TransportKind, JSON_CODEC_ID};

use crate::config::{parse_address, SocketConfig};
use crate::error::{Result, SocketError};
use crate::ports::find_open_port;
use crate::EventSocket;

pub use crate::config::DEFAULT_TIMEOUT_MS;

fn base_config(
    address: &str,
    kind: TransportKind,
    timeout_ms: u64,
    codec_id: Option<u8>,
) -> Result<SocketConfig> {
    Ok(SocketConfig::new(parse_address(address)?, kind)
        .with_timeout_ms(timeout_ms)
        .with_codec_id(codec_id.unwrap_or(JSON_CODEC_ID)))
}

/// Creates a socket that only emits to `address:send_port`
pub async fn create_sender(
    address: &str,
    send_port: u16,
    kind: TransportKind,
    timeout_ms: u64,
    codec_id: Option<u8>,
    initial_event: Option<&str>,
) -> Result<EventSocket> {
    if send_port == 0 {
        return Err(SocketError::Configuration(
            "send port must be nonzero to emit messages".into(),
        ));
    }

    let config = base_config(address, kind, timeout_ms, codec_id)?.with_send_port(send_port);
    let socket = EventSocket::configure(config).await?;

    // WebSocket fills in the receive port from the send port
    if socket.receive_port() != 0 {
        socket.listen().await?;
    }
    if let Some(event) = initial_event {
        socket.emit(event).await?;
    }
    Ok(socket)
}

/// Creates a socket listening on `receive_port`
pub async fn create_listener(
    address: &str,
    receive_port: u16,
    kind: TransportKind,
    timeout_ms: u64,
    codec_id: Option<u8>,
) -> Result<EventSocket> {
    if receive_port == 0 {
        return Err(SocketError::Configuration(
            "receive port must be nonzero to listen for messages".into(),
        ));
    }

    let config = base_config(address, kind, timeout_ms, codec_id)?.with_receive_port(receive_port);
    let socket = EventSocket::configure(config).await?;
    socket.listen().await?;
    Ok(socket)
}

/// Creates a socket that both emits to `send_port` and listens on
/// `receive_port`
pub async fn create(
    address: &str,
    send_port: u16,
    receive_port: u16,
    kind: TransportKind,
    timeout_ms: u64,
    codec_id: Option<u8>,
    initial_event: Option<&str>,
) -> Result<EventSocket> {
    let socket = create_sender(address, send_port, kind, timeout_ms, codec_id, None).await?;
    if kind != TransportKind::WebSocket {
        socket.attach_listener(receive_port).await?;
    } else if receive_port != socket.receive_port() {
        let _ = socket.close().await;
        return Err(SocketError::Configuration(format!(
            "WebSocket send port ({send_port}) and receive port ({receive_port}) must be equal"
        )));
    }

    if let Some(event) = initial_event {
        socket.emit(event).await?;
    }
    Ok(socket)
}

/// Like [`create`], listening on the first free port at or above `port`
pub async fn create_auto(
    address: &str,
    port: u16,
    kind: TransportKind,
    timeout_ms: u64,
    codec_id: Option<u8>,
    initial_event: Option<&str>,
) -> Result<EventSocket> {
    let receive_port = find_open_port(port).ok_or_else(|| {
        SocketError::Configuration(format!("no open port found starting at {port}"))
    })?;
    tracing::debug!(port, receive_port, "Picked receive port");

    create(address, port, receive_port, kind, timeout_ms, codec_id, initial_event).await
}

/// Adds a listener to an existing socket
pub async fn add_listener(socket: &EventSocket, port: u16) -> Result<()> {
    socket.attach_listener(port).await
}

/// Adds a sender to an existing socket
pub async fn add_sender(socket: &EventSocket, port: u16, initial_event: Option<&str>) -> Result<()> {
    socket.attach_sender(port, initial_event).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsock_protocol::POSTCARD_CODEC_ID;

    #[tokio::test]
    async fn test_create_sender_rejects_zero_port() {
        let result = create_sender("127.0.0.1", 0, TransportKind::Udp, 1000, None, None).await;
        assert!(matches!(result, Err(SocketError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_create_listener_rejects_bad_address() {
        let result = create_listener("localhost:9000", 9000, TransportKind::Udp, 1000, None).await;
        assert!(matches!(result, Err(SocketError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_create_sender_keeps_codec_choice() {
        let socket = create_sender(
            "127.0.0.1",
            9,
            TransportKind::Tcp,
            DEFAULT_TIMEOUT_MS,
            Some(POSTCARD_CODEC_ID),
            None,
        )
        .await
        .unwrap();

        assert_eq!(socket.codec().id(), POSTCARD_CODEC_ID);
        assert_eq!(socket.receive_port(), 0);
        assert!(!socket.is_listening());
    }

    #[tokio::test]
    async fn test_add_sender_then_listener() {
        let socket = create_listener("127.0.0.1", 0, TransportKind::Udp, 1000, None).await;
        assert!(socket.is_err());

        let port = find_open_port(41000).unwrap();
        let socket = create_listener("127.0.0.1", port, TransportKind::Udp, 1000, None)
            .await
            .unwrap();
        assert!(socket.is_listening());

        add_sender(&socket, 9, None).await.unwrap();
        assert_eq!(socket.send_port(), 9);
        assert!(add_listener(&socket, port + 1).await.is_err());

        socket.close().await.unwrap();
    }
}
