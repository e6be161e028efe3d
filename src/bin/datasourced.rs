//! captrace datasourced: the data source subsystem daemon.
//!
//! Tracks capture sources, runs the channel-hop scheduler, serves the
//! `/datasource`/`/phy` HTTP surface, and accepts remote capture helpers
//! over TCP/WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use captrace::api::{api_routes, ApiState};
use captrace::config::{self, DatasourceConfig};
use captrace::drivers::DriverRegistry;
use captrace::hop::HopScheduler;
use captrace::packetchain::{BoundedPacketChain, PacketChain};
use captrace::persistence;
use captrace::remote::{self, RemoteState};
use captrace::tracker::SourceTracker;

#[derive(Parser, Debug)]
#[command(name = "datasourced")]
#[command(about = "Data source subsystem daemon")]
struct CliArgs {
    /// Address the `/datasource`/`/phy` HTTP API binds to.
    #[arg(long, env = "CAPTRACE_HTTP_ADDR", default_value = "0.0.0.0:3500")]
    http_addr: String,

    /// Address the remote-listener WebSocket upgrade endpoint binds to.
    #[arg(long, env = "CAPTRACE_WS_ADDR", default_value = "0.0.0.0:3502")]
    ws_addr: String,

    /// Directory for the sled-backed source persistence store.
    #[arg(long, env = "CAPTRACE_DATA_DIR", default_value = "./data")]
    data_dir: String,

    /// Skip auto-opening persisted sources flagged for it on restart.
    #[arg(long)]
    no_auto_open: bool,
}

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpApi,
    RemoteTcp,
    RemoteWs,
    HopScheduler,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskName::HttpApi => "HttpApi",
            TaskName::RemoteTcp => "RemoteTcp",
            TaskName::RemoteWs => "RemoteWs",
            TaskName::HopScheduler => "HopScheduler",
        };
        write!(f, "{s}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    #[cfg(feature = "dotenv")]
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    config::init(DatasourceConfig::load());

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("failed to create data dir {}", args.data_dir))?;
    let db_path = std::path::Path::new(&args.data_dir).join("sources.sled");
    persistence::init(&db_path).context("failed to open persistence store")?;

    info!("captrace datasourced starting");

    let drivers = Arc::new(DriverRegistry::with_builtin_drivers());
    let hop = Arc::new(HopScheduler::new());
    let (bounded_chain, mut packet_rx) = BoundedPacketChain::new();
    let packet_chain: Arc<dyn PacketChain> = Arc::new(bounded_chain);
    let tracker = Arc::new(SourceTracker::new(
        Arc::clone(&drivers),
        Arc::clone(&hop),
        Arc::clone(&packet_chain),
    ));

    restore_persisted_sources(&tracker, args.no_auto_open).await;

    // Nothing downstream consumes captured packets in this daemon on its
    // own; drain the channel so a full buffer still reflects genuine
    // consumer backpressure rather than nobody ever calling recv().
    tokio::spawn(async move {
        let mut count = 0u64;
        while packet_rx.recv().await.is_some() {
            count += 1;
            if count % 10_000 == 0 {
                info!(count, "packets processed");
            }
        }
    });

    let cancel = CancellationToken::new();
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received ctrl+c, initiating shutdown");
        shutdown_token.cancel();
    });

    let http_addr: SocketAddr = args.http_addr.parse().context("invalid --http-addr")?;
    let http_listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind {http_addr}"))?;
    info!(%http_addr, "http api listening");

    let api_state = ApiState { tracker: Arc::clone(&tracker), chain: Arc::clone(&packet_chain) };
    let api_app = api_routes(api_state);

    let remote_cfg = config::get().remote.clone();
    let remote_addr: SocketAddr = remote_cfg.listen_addr.parse().context("invalid remote.listen_addr")?;
    let ws_addr: SocketAddr = args.ws_addr.parse().context("invalid --ws-addr")?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .with_context(|| format!("failed to bind {ws_addr}"))?;
    let remote_state = Arc::new(RemoteState {
        tracker: Arc::clone(&tracker),
        auth_token: remote_cfg.auth_token.clone(),
    });
    let remote_router = remote::build_router(remote_state);

    let mut tasks: JoinSet<Result<TaskName>> = JoinSet::new();

    let http_cancel = cancel.clone();
    tasks.spawn(async move {
        info!("[HttpApi] task starting");
        axum::serve(http_listener, api_app)
            .with_graceful_shutdown(async move {
                http_cancel.cancelled().await;
                info!("[HttpApi] shutdown signal received");
            })
            .await
            .context("http api server error")?;
        Ok(TaskName::HttpApi)
    });

    let remote_tcp_cancel = cancel.clone();
    let remote_tcp_tracker = Arc::clone(&tracker);
    tasks.spawn(async move {
        info!("[RemoteTcp] task starting");
        remote::run_tcp_listener(remote_addr, remote_tcp_tracker, remote_tcp_cancel)
            .await
            .context("remote tcp listener error")?;
        Ok(TaskName::RemoteTcp)
    });

    let remote_ws_cancel = cancel.clone();
    tasks.spawn(async move {
        info!("[RemoteWs] task starting");
        axum::serve(ws_listener, remote_router)
            .with_graceful_shutdown(async move {
                remote_ws_cancel.cancelled().await;
                info!("[RemoteWs] shutdown signal received");
            })
            .await
            .context("remote websocket server error")?;
        Ok(TaskName::RemoteWs)
    });

    let hop_cancel = cancel.clone();
    let hop_scheduler = Arc::clone(&hop);
    tasks.spawn(async move {
        info!("[HopScheduler] task starting");
        hop_scheduler.run(hop_cancel).await;
        Ok(TaskName::HopScheduler)
    });

    info!("all tasks spawned, supervisor monitoring");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("shutdown signal received, waiting for tasks to wind down");
                break;
            }
            result = tasks.join_next() => {
                match result {
                    Some(Ok(Ok(name))) => info!(%name, "task completed normally"),
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "task failed");
                        cancel.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "task panicked");
                        cancel.cancel();
                        return Err(anyhow::anyhow!("task panicked: {e}"));
                    }
                    None => {
                        info!("all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    info!("datasourced shutdown complete");
    Ok(())
}

/// Re-add every persisted source on startup, auto-opening the ones
/// flagged for it, per spec §7's restart-survival requirement.
async fn restore_persisted_sources(tracker: &Arc<SourceTracker>, no_auto_open: bool) {
    let stored = match persistence::load_all_sources() {
        Ok(stored) => stored,
        Err(e) => {
            warn!(error = %e, "failed to load persisted sources");
            return;
        }
    };

    for entry in stored {
        match tracker.add(&entry.definition).await {
            Ok(uuid) => {
                info!(%uuid, definition = %entry.definition, "restored persisted source");
                if entry.auto_open && !no_auto_open {
                    if let Err(e) = tracker.open(&uuid).await {
                        warn!(%uuid, error = %e, "failed to auto-open restored source");
                    }
                }
            }
            Err(e) => warn!(definition = %entry.definition, error = %e, "failed to restore persisted source"),
        }
    }
}
