//! End-to-end remote listener test: a bare TCP client speaks the framed
//! handshake directly (no capture-helper subprocess), proving
//! `run_tcp_listener` really does register a new tracked source on a
//! successful `Probe` handshake.

use std::sync::Arc;
use std::time::Duration;

use captrace::config::{self, DatasourceConfig};
use captrace::drivers::DriverRegistry;
use captrace::hop::HopScheduler;
use captrace::packetchain::BoundedPacketChain;
use captrace::remote::run_tcp_listener;
use captrace::tracker::SourceTracker;
use captrace::wire::{v3, Command, CommandKind, Frame, ProtoVersion};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

fn ensure_config() {
    let _ = config::init(DatasourceConfig::default());
}

/// Reserve a free port by binding and immediately dropping a throwaway
/// listener, the way test suites without a "bind then hand back the
/// socket" API have to route around `SocketAddr`-only entry points.
async fn reserve_addr() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn probe_handshake_registers_a_new_source() {
    ensure_config();
    let drivers = Arc::new(DriverRegistry::with_builtin_drivers());
    let hop = Arc::new(HopScheduler::new());
    let (chain, _rx) = BoundedPacketChain::new();
    let tracker = Arc::new(SourceTracker::new(drivers, hop, Arc::new(chain)));

    let addr = reserve_addr().await;
    let cancel = CancellationToken::new();
    let tracker_clone = Arc::clone(&tracker);
    let cancel_clone = cancel.clone();
    let listener_task = tokio::spawn(async move { run_tcp_listener(addr, tracker_clone, cancel_clone).await });

    // Give the listener a moment to actually bind before connecting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut stream = TcpStream::connect(addr).await.expect("remote listener should be accepting connections");
    let command = Command { seqno: 1, kind: CommandKind::Probe { definition: "remote0:type=remote".to_string() } };
    let content = v3::encode_command(&command).unwrap();
    let frame = Frame::new(ProtoVersion::V3, command.seqno, content);
    stream.write_all(&frame.encode()).await.unwrap();
    stream.flush().await.unwrap();

    // Give the handshake handler a moment to register the source.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tracker.len(), 1, "a successful probe handshake should register exactly one source");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), listener_task).await;
}

#[tokio::test]
async fn non_probe_first_frame_is_rejected_without_registering_a_source() {
    ensure_config();
    let drivers = Arc::new(DriverRegistry::with_builtin_drivers());
    let hop = Arc::new(HopScheduler::new());
    let (chain, _rx) = BoundedPacketChain::new();
    let tracker = Arc::new(SourceTracker::new(drivers, hop, Arc::new(chain)));

    let addr = reserve_addr().await;
    let cancel = CancellationToken::new();
    let tracker_clone = Arc::clone(&tracker);
    let cancel_clone = cancel.clone();
    let listener_task = tokio::spawn(async move { run_tcp_listener(addr, tracker_clone, cancel_clone).await });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let command = Command { seqno: 1, kind: CommandKind::Ping };
    let content = v3::encode_command(&command).unwrap();
    let frame = Frame::new(ProtoVersion::V3, command.seqno, content);
    stream.write_all(&frame.encode()).await.unwrap();
    stream.flush().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tracker.len(), 0, "a non-probe handshake frame must not register a source");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), listener_task).await;
}
