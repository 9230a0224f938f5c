//! Integration tests for the async client
//!
//! These drive a full engine task over the loopback transport with tokio's
//! paused clock, so reconnect delays and reveal cadence are observed in
//! virtual time.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use chatsync_core::transport::{AcceptPolicy, LoopbackServer, LoopbackTransport};
use chatsync_core::{
    ChatClient, ConnectionStatus, MessageRole, ReconnectPolicy, ShutdownReport, SyncConfig,
    SyncError, SyncSnapshot,
};

fn spawn_client(config: SyncConfig) -> (ChatClient, LoopbackServer) {
    let (transport, server) = LoopbackTransport::new_pair();
    let client = ChatClient::spawn("loopback://chat", config, Arc::new(transport));
    (client, server)
}

async fn wait_open(rx: &mut watch::Receiver<SyncSnapshot>) {
    rx.wait_for(|s| s.status == ConnectionStatus::Open)
        .await
        .unwrap();
}

fn display_len(snapshot: &SyncSnapshot, id: &str) -> Option<(usize, bool)> {
    snapshot
        .messages
        .iter()
        .find(|m| m.id.as_str() == id)
        .map(|m| (m.content.chars().count(), m.revealing))
}

// =============================================================================
// Reconnection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_takes_five_delays() {
    let (transport, server) = LoopbackTransport::new_pair();
    server.set_policy(AcceptPolicy::Refuse("connection refused".to_string()));

    let start = Instant::now();
    let client = ChatClient::spawn("loopback://chat", SyncConfig::default(), Arc::new(transport));
    let mut rx = client.subscribe();

    let terminal = rx
        .wait_for(|s| {
            s.last_error
                .as_deref()
                .is_some_and(|e| e.contains("reconnect attempts"))
        })
        .await
        .unwrap()
        .clone();
    let elapsed = start.elapsed();

    assert_eq!(terminal.status, ConnectionStatus::Closed);
    assert_eq!(terminal.attempt, 5);
    assert_eq!(server.open_count(), 6);
    assert!(elapsed >= Duration::from_millis(15_000), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(15_030), "elapsed {elapsed:?}");

    // Dormant: nothing else happens, however long we wait.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.open_count(), 6);

    let report = client.shutdown().await.unwrap();
    assert_eq!(report.pending_timers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_close_recovers_after_delay() {
    let (client, server) = spawn_client(SyncConfig::default());
    let mut rx = client.subscribe();
    wait_open(&mut rx).await;

    let dropped_at = Instant::now();
    server.close_active("network drop");
    rx.wait_for(|s| s.status == ConnectionStatus::Closed && s.attempt == 1)
        .await
        .unwrap();

    wait_open(&mut rx).await;
    assert!(dropped_at.elapsed() >= Duration::from_millis(3000));
    assert_eq!(server.open_count(), 2);
    assert_eq!(client.snapshot().attempt, 0);
    assert!(client.snapshot().last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_connect_after_exhaustion() {
    let config = SyncConfig {
        reconnect: ReconnectPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(100),
        },
        ..SyncConfig::default()
    };
    let (transport, server) = LoopbackTransport::new_pair();
    server.set_policy(AcceptPolicy::Refuse("down".to_string()));
    let client = ChatClient::spawn("loopback://chat", config, Arc::new(transport));
    let mut rx = client.subscribe();

    rx.wait_for(|s| s.attempt == 2 && s.last_error.as_deref().is_some_and(|e| e.contains("after 2")))
        .await
        .unwrap();

    server.set_policy(AcceptPolicy::Accept);
    assert_ok!(client.connect());
    wait_open(&mut rx).await;
    assert_eq!(server.open_count(), 4);
}

// =============================================================================
// Streaming reveal
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stream_updates_reveal_monotonically() {
    let (client, server) = spawn_client(SyncConfig::default());
    let mut rx = client.subscribe();
    wait_open(&mut rx).await;

    server.push_json(json!({"id": "m1", "type": "stream", "content": "Hel"}));
    tokio::time::sleep(Duration::from_millis(45)).await;
    server.push_json(json!({"id": "m1", "type": "stream", "content": "Hello"}));
    server.push_json(json!({"id": "m1", "type": "assistant", "content": "Hello world"}));

    let mut lengths = Vec::new();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        if let Some((len, revealing)) = display_len(&snapshot, "m1") {
            lengths.push(len);
            if len == 11 && !revealing {
                break;
            }
        }
        rx.changed().await.unwrap();
    }

    assert!(lengths.windows(2).all(|w| w[0] <= w[1]), "regressed: {lengths:?}");
    let snapshot = client.snapshot();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].content, "Hello world");
    assert_eq!(snapshot.messages[0].role, MessageRole::Assistant);
}

#[tokio::test(start_paused = true)]
async fn test_reveal_follows_cadence() {
    let (client, server) = spawn_client(SyncConfig::default());
    let mut rx = client.subscribe();
    wait_open(&mut rx).await;

    server.push_json(json!({"id": "a1", "type": "assistant", "content": "0123456789"}));
    tokio::task::yield_now().await;
    let arrived = Instant::now();

    rx.wait_for(|s| display_len(s, "a1") == Some((10, false)))
        .await
        .unwrap();

    // 10 chars at 2 per 30ms tick.
    let elapsed = arrived.elapsed();
    assert!(elapsed >= Duration::from_millis(150), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(180), "elapsed {elapsed:?}");
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_submit_paths() {
    let (client, server) = spawn_client(SyncConfig::default());
    let mut rx = client.subscribe();
    wait_open(&mut rx).await;

    let id = client.submit("  hello there  ").await.unwrap();
    assert_eq!(id.as_str(), "seq-0");
    assert_eq!(
        server.sent_frames(),
        vec![r#"{"type":"user","content":"hello there"}"#.to_string()]
    );

    assert_eq!(client.submit("").await, Err(SyncError::EmptyMessage));
    assert_eq!(client.submit("   ").await, Err(SyncError::EmptyMessage));

    assert_ok!(client.disconnect());
    assert_err!(client.submit("anyone?").await);

    let snapshot = rx
        .wait_for(|s| s.status == ConnectionStatus::Closed)
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(server.sent_frames().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_disconnect_waits_for_close() {
    let (client, server) = spawn_client(SyncConfig::default());
    let mut rx = client.subscribe();
    wait_open(&mut rx).await;
    server.set_close_deferred(true);

    assert_ok!(client.disconnect());
    assert_ok!(client.connect());
    rx.wait_for(|s| s.status == ConnectionStatus::Connecting)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(server.open_count(), 1);
    assert_eq!(server.live_connections(), 1);

    assert_eq!(server.finish_closing(), 1);
    wait_open(&mut rx).await;
    assert_eq!(server.open_count(), 2);
    assert_eq!(server.live_connections(), 1);
}

// =============================================================================
// Disposal
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_reveal_and_reconnect() {
    let (client, server) = spawn_client(SyncConfig::default());
    let mut rx = client.subscribe();
    wait_open(&mut rx).await;

    server.push_json(json!({"id": "a1", "type": "assistant", "content": "a fairly long reply"}));
    tokio::time::sleep(Duration::from_millis(40)).await;
    server.close_active("network drop");
    rx.wait_for(|s| s.attempt == 1).await.unwrap();

    let report = client.shutdown().await.unwrap();
    assert_eq!(
        report,
        ShutdownReport {
            pending_timers: 0,
            transport_active: false,
        }
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_open_closes_channel() {
    let (client, server) = spawn_client(SyncConfig::default());
    let mut rx = client.subscribe();
    wait_open(&mut rx).await;

    server.push_json(json!({"id": "s1", "type": "stream", "content": "still typing"}));
    tokio::task::yield_now().await;

    let report = client.shutdown().await.unwrap();
    assert_eq!(report.pending_timers, 0);
    assert!(!report.transport_active);
    assert_eq!(server.live_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_last_handle_disposes() {
    let (client, server) = spawn_client(SyncConfig::default());
    let mut rx = client.subscribe();
    wait_open(&mut rx).await;

    drop(client);
    while rx.changed().await.is_ok() {}

    assert_eq!(server.live_connections(), 0);
    assert_eq!(rx.borrow().status, ConnectionStatus::Closed);
}
