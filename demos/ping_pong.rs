//! UDP ping/ack demo
//!
//! A listener answers every `ping` with an `ack` carrying the next number; a
//! dual socket sends a few pings and prints the acks it gets back.
//!
//! Run with:
//! ```sh
//! RUST_LOG=debug cargo run --example ping_pong
//! ```

use eventsock::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping {
    seq: u32,
    note: String,
}

#[tokio::main]
async fn main() -> Result<(), SocketError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== eventsock ping/ack demo ===\n");

    let listen_port = eventsock::socket::ports::find_open_port(9000).unwrap_or(9000);
    let listener =
        io::create_listener("127.0.0.1", listen_port, TransportKind::Udp, DEFAULT_TIMEOUT_MS, None)
            .await?;
    tracing::info!(port = listen_port, "Listener ready");

    listener.on_with("ping", |ctx: EventContext, ping: Ping| async move {
        println!("listener <- ping #{} ({}) from {}", ping.seq, ping.note, ctx.sender());
        if let Err(e) = ctx.emit_with("ack", &(ping.seq + 1)).await {
            eprintln!("failed to ack: {e}");
        }
    });

    let client = io::create_auto(
        "127.0.0.1",
        listen_port,
        TransportKind::Udp,
        DEFAULT_TIMEOUT_MS,
        None,
        None,
    )
    .await?;

    let (ack_tx, mut ack_rx) = mpsc::channel(8);
    client.on_with("ack", move |_, next: u32| {
        let ack_tx = ack_tx.clone();
        async move {
            let _ = ack_tx.send(next).await;
        }
    });

    for seq in 1..=3 {
        let ping = Ping {
            seq,
            note: format!("hello #{seq}"),
        };
        client.emit_with("ping", &ping).await?;

        match timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS), ack_rx.recv()).await {
            Ok(Some(next)) => println!("client   <- ack {next}"),
            _ => println!("client   x  no ack for ping #{seq}"),
        }
    }

    client.close().await?;
    listener.close().await?;

    println!("\n=== Demo complete ===");
    Ok(())
}
