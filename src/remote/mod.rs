//! Remote/server listener (C8): accepts inbound connections from remote
//! capture helpers over raw TCP or an upgraded WebSocket, authenticates
//! them against a pre-shared token, and hands each one off to the
//! tracker — either as a brand-new source or, if its derived UUID
//! already matches a tracked one, as a rebind of an existing source's
//! transport.

pub mod auth;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::source::SourceRuntime;
use crate::tracker::SourceTracker;
use crate::transport::remote::{TcpTransport, WsTransport};
use crate::transport::FrameTransport;
use crate::types::{derive_uuid, SourceDefinition};
use crate::wire::{v3, CommandKind, ProtoVersion};
use auth::RemoteAuth;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake did not open with a probe command")]
    BadHandshake,
    #[error("tracker error: {0}")]
    Tracker(#[from] crate::tracker::TrackerError),
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
    #[error("wire error: {0}")]
    Wire(#[from] crate::wire::WireError),
}

pub struct RemoteState {
    pub tracker: Arc<SourceTracker>,
    pub auth_token: Option<String>,
}

/// Read the handshake frame off a freshly accepted transport and resolve
/// it to a `SourceRuntime`, registering a new source if its derived UUID
/// isn't already tracked.
async fn handshake_and_bind(
    tracker: &SourceTracker,
    mut transport: Box<dyn FrameTransport>,
    peer: String,
) -> Result<Arc<SourceRuntime>, RemoteError> {
    let frame = transport.read_frame().await?;
    let command = v3::decode_command(&frame.content)?;

    let raw_definition = match command.kind {
        CommandKind::Probe { definition } => definition,
        _ => return Err(RemoteError::BadHandshake),
    };

    let definition = SourceDefinition::parse(&raw_definition).map_err(crate::tracker::TrackerError::from)?;
    let driver_tag = definition.driver_type.clone().unwrap_or_else(|| "remote".to_string());
    let uuid = derive_uuid(&driver_tag, &definition.interface);

    let runtime = match tracker.get(&uuid) {
        Some(runtime) => runtime,
        None => {
            let new_uuid = tracker.add(&raw_definition).await?;
            tracker.get(&new_uuid).expect("just-registered source must exist")
        }
    };

    runtime.rebind(transport, ProtoVersion::V3).await;
    {
        let mut source = runtime.source.write().await;
        source.remote_peer = Some(peer);
    }
    Ok(runtime)
}

/// Accept loop for the raw TCP listener.
pub async fn run_tcp_listener(
    addr: SocketAddr,
    tracker: Arc<SourceTracker>,
    cancel: CancellationToken,
) -> Result<(), RemoteError> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "remote TCP listener bound");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("remote TCP listener stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    if let Err(e) = handle_tcp_stream(stream, peer, tracker).await {
                        warn!(%peer, error = %e, "remote TCP connection failed");
                    }
                });
            }
        }
    }
}

async fn handle_tcp_stream(
    stream: TcpStream,
    peer: SocketAddr,
    tracker: Arc<SourceTracker>,
) -> Result<(), RemoteError> {
    enable_keepalive(&stream);
    let transport: Box<dyn FrameTransport> = Box::new(TcpTransport::new(stream));
    let runtime = handshake_and_bind(&tracker, transport, peer.to_string()).await?;
    let uuid = runtime.source.read().await.uuid;
    info!(%peer, %uuid, "remote source bound over TCP");
    Ok(())
}

/// Enable TCP keepalive so a capture helper that vanishes without closing
/// cleanly (killed, network partition) is noticed instead of leaving its
/// source stuck open indefinitely.
fn enable_keepalive(stream: &TcpStream) {
    let sock_ref = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(std::time::Duration::from_secs(30))
        .with_interval(std::time::Duration::from_secs(10));
    let _ = sock_ref.set_tcp_keepalive(&keepalive);
}

/// `GET /remote/ws` — WebSocket upgrade entrypoint for browser/JS-capable
/// capture helpers, sharing the same handshake-and-bind path as TCP.
async fn ws_upgrade(
    State(state): State<Arc<RemoteState>>,
    _auth: RemoteAuth,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let transport: Box<dyn FrameTransport> = Box::new(WsTransport::new(socket));
        match handshake_and_bind(&state.tracker, transport, "websocket".to_string()).await {
            Ok(runtime) => {
                let uuid = runtime.source.read().await.uuid;
                info!(%uuid, "remote source bound over websocket");
            }
            Err(e) => error!(error = %e, "websocket handshake failed"),
        }
    })
}

/// Build the remote listener's HTTP surface: just the WS upgrade route
/// today, but laid out to grow `/remote/status` etc. the way the fleet
/// hub's router does.
pub fn build_router(state: Arc<RemoteState>) -> Router {
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(50)
            .finish()
            .expect("valid governor config"),
    );

    Router::new()
        .route("/remote/ws", get(ws_upgrade))
        .layer(GovernorLayer { config: governor_config })
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_uuid_is_stable_for_handshake_rebind() {
        let a = derive_uuid("remote", "helper-01");
        let b = derive_uuid("remote", "helper-01");
        assert_eq!(a, b);
    }
}
