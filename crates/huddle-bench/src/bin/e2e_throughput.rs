//! End-to-end throughput benchmark for Huddle.
//!
//! Every client joins one room and posts messages as fast as the server
//! accepts them; throughput is the number of `message_new` events received
//! across all clients.

use huddle_bench::BENCH_ROOM;
use huddle_protocol::{ClientEvent, Encoding, ServerEvent};
use huddle_transport::{Connection, WebSocketConnection};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Barrier};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let encoding = match args.get(2).map(String::as_str) {
        Some("msgpack") => Encoding::MessagePack,
        _ => Encoding::Json,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Huddle End-to-End Throughput Benchmark               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_room_benchmark(num_clients, encoding).await;
}

async fn run_room_benchmark(num_clients: usize, encoding: Encoding) {
    println!("📊 Room Benchmark: {} clients ({:?})", num_clients, encoding);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, encoding, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to join
    barrier.wait().await;
    println!("✓ All {} clients joined room {}", num_clients, BENCH_ROOM);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Messages Delivered:   {:>10}                           ║",
        total_messages
    );
    println!(
        "║  Throughput:           {:>10.0} msg/s                    ║",
        msgs_per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} msg/s                    ║",
        msgs_per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    encoding: Encoding,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut conn = WebSocketConnection::connect(SERVER_URL, encoding).await?;
    let anon_id = format!("bench-{client_id}");

    conn.send(&ClientEvent::JoinRoom {
        room_id: BENCH_ROOM.into(),
        session_id: Some(anon_id.clone()),
    })
    .await?;

    // The snapshot confirms the join
    while let Some(event) = conn.recv().await? {
        if matches!(event, ServerEvent::RoomJoined { .. }) {
            break;
        }
    }

    barrier.wait().await;

    // One task owns the connection; sends are fed to it through a channel so
    // receiving never waits on sending.
    let (tx, mut rx) = mpsc::channel::<ClientEvent>(64);
    let producer = tokio::spawn(async move {
        let mut seq = 0u64;
        loop {
            seq += 1;
            let event = ClientEvent::MessageSend {
                room_id: BENCH_ROOM.into(),
                sender_session_id: Some(anon_id.clone()),
                content: format!("message {seq}"),
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                if conn.send(&event).await.is_err() {
                    break;
                }
            }
            received = conn.recv() => match received {
                Ok(Some(ServerEvent::MessageNew(_))) => {
                    message_count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            },
        }
    }

    producer.abort();
    Ok(())
}
