use eventsock::prelude::*;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, timeout, Duration};

async fn free_tcp_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_dual_socket_on_same_port_handles_bodiless_event() {
    let port = free_tcp_port().await;

    let socket = io::create_sender("127.0.0.1", port, TransportKind::Tcp, 1000, None, None)
        .await
        .unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());
    {
        let flag = flag.clone();
        let notify = notify.clone();
        socket.on("hello", move |_| {
            let flag = flag.clone();
            let notify = notify.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                notify.notify_one();
            }
        });
    }

    io::add_listener(&socket, port).await.unwrap();
    assert!(socket.is_listening());
    assert_eq!(
        socket.local_addr().await,
        Some(SocketAddr::from(([127, 0, 0, 1], port)))
    );

    socket.emit("hello").await.unwrap();

    timeout(Duration::from_secs(3), notify.notified())
        .await
        .expect("hello handler should fire");
    assert!(flag.load(Ordering::SeqCst));

    socket.close().await.unwrap();
}

#[tokio::test]
async fn test_initial_event_is_emitted_on_attach() {
    let listen_port = free_tcp_port().await;
    let listener = io::create_listener("127.0.0.1", listen_port, TransportKind::Tcp, 1000, None)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    listener.on("connect", move |ctx: EventContext| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(ctx.callback_port()).await;
        }
    });

    let _sender = io::create_sender(
        "127.0.0.1",
        listen_port,
        TransportKind::Tcp,
        1000,
        None,
        Some("connect"),
    )
    .await
    .unwrap();

    let callback_port = timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(callback_port, 0, "sender-only socket has no reply path");

    listener.close().await.unwrap();
}

#[tokio::test]
async fn test_emit_to_explicit_destination() {
    let default_port = free_tcp_port().await;
    let other_port = free_tcp_port().await;

    let other = io::create_listener("127.0.0.1", other_port, TransportKind::Tcp, 1000, None)
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    other.on_with("direct", move |_, text: String| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(text).await;
        }
    });

    let sender = io::create_sender("127.0.0.1", default_port, TransportKind::Tcp, 1000, None, None)
        .await
        .unwrap();
    let destination = SocketAddr::from(([127, 0, 0, 1], other_port));
    sender
        .emit_with_to("direct", "routed", destination)
        .await
        .unwrap();

    let text = timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(text, "routed");

    other.close().await.unwrap();
}

#[tokio::test]
async fn test_send_failure_is_reported_to_emitter() {
    let port = free_tcp_port().await;
    let sender = io::create_sender("127.0.0.1", port, TransportKind::Tcp, 500, None, None)
        .await
        .unwrap();

    let result = sender.emit("anyone-there").await;
    assert!(matches!(
        result,
        Err(SocketError::Transport(_)) | Err(SocketError::TransportTimeout { .. })
    ));
}

#[tokio::test]
async fn test_garbage_connection_does_not_stop_listener() {
    let port = free_tcp_port().await;
    let listener = io::create_listener("127.0.0.1", port, TransportKind::Tcp, 1000, None)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    listener.on_with("sum", move |_, values: Vec<u32>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(values.iter().sum::<u32>()).await;
        }
    });

    let mut raw = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    raw.write_all(b"{\"event\": 12}").await.unwrap();
    raw.shutdown().await.unwrap();
    drop(raw);
    sleep(Duration::from_millis(100)).await;

    let sender = io::create_sender("127.0.0.1", port, TransportKind::Tcp, 1000, None, None)
        .await
        .unwrap();
    sender.emit_with("sum", &vec![1u32, 2, 3]).await.unwrap();

    let sum = timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sum, 6);

    listener.close().await.unwrap();
}

#[tokio::test]
async fn test_handler_replies_over_tcp() {
    let server_port = free_tcp_port().await;
    let client_port = free_tcp_port().await;

    let server = io::create_listener("127.0.0.1", server_port, TransportKind::Tcp, 1000, None)
        .await
        .unwrap();
    server.on_with("login", |ctx: EventContext, user: String| async move {
        ctx.emit_with("welcome", &format!("hello {user}")).await.unwrap();
    });

    let client = io::create(
        "127.0.0.1",
        server_port,
        client_port,
        TransportKind::Tcp,
        1000,
        None,
        None,
    )
    .await
    .unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    client.on_with("welcome", move |_, greeting: String| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(greeting).await;
        }
    });

    client.emit_with("login", "ada").await.unwrap();

    let greeting = timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(greeting, "hello ada");

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_timed_out_send_leaves_listener_running() {
    // Accepts into the backlog but never reads
    let stalled = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let stalled_port = stalled.local_addr().unwrap().port();
    let own_port = free_tcp_port().await;

    let socket = io::create(
        "127.0.0.1",
        stalled_port,
        own_port,
        TransportKind::Tcp,
        300,
        None,
        None,
    )
    .await
    .unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    socket.on_with("status", move |_, text: String| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(text).await;
        }
    });

    // Larger than the loopback socket buffers, so the write blocks
    let bulk = "x".repeat(24 * 1024 * 1024);
    let result = socket.emit_with("bulk", &bulk).await;
    match result {
        Err(SocketError::TransportTimeout {
            destination,
            timeout_ms,
        }) => {
            assert_eq!(destination, SocketAddr::from(([127, 0, 0, 1], stalled_port)));
            assert_eq!(timeout_ms, 300);
        }
        other => panic!("expected a send timeout, got {other:?}"),
    }

    assert!(socket.is_listening());
    let sender = io::create_sender("127.0.0.1", own_port, TransportKind::Tcp, 1000, None, None)
        .await
        .unwrap();
    sender.emit_with("status", "alive").await.unwrap();

    let text = timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("listener should keep dispatching after a send timeout")
        .unwrap();
    assert_eq!(text, "alive");

    socket.close().await.unwrap();
    drop(stalled);
}
