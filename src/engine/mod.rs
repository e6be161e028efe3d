//! External protocol engine (C2): owns the per-source transaction table,
//! keepalive loop, and dual v2/v3 wire dispatch on top of a
//! [`FrameTransport`](crate::transport::FrameTransport).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::config;
use crate::transport::{FrameTransport, TransportError};
use crate::wire::{self, Ack, AckKind, Command, CommandKind, Frame, ProtoVersion};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("transaction {0} timed out waiting for ack")]
    TransactionTimeout(u32),
    #[error("transaction {0} not found for incoming ack")]
    UnknownTransaction(u32),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("wire decode error: {0}")]
    Wire(#[from] crate::wire::WireError),
    #[error("helper reported failure: {0}")]
    HelperFailure(String),
    #[error("keepalive lapsed — peer unresponsive")]
    KeepaliveLapsed,
}

/// An in-flight command awaiting its ack.
struct Transaction {
    sent_at: DateTime<Utc>,
    reply: Option<oneshot::Sender<Ack>>,
    timeout_handle: AbortHandle,
}

/// Per-source protocol engine. One instance owns one transport and speaks
/// either v2 or v3 for its whole lifetime, decided at the first exchange.
pub struct Engine {
    transport: Mutex<Box<dyn FrameTransport>>,
    version: ProtoVersion,
    next_seqno: std::sync::atomic::AtomicU32,
    transactions: DashMap<u32, Transaction>,
    last_pong: Mutex<DateTime<Utc>>,
}

impl Engine {
    pub fn new(transport: Box<dyn FrameTransport>, version: ProtoVersion) -> Arc<Self> {
        Arc::new(Self {
            transport: Mutex::new(transport),
            version,
            next_seqno: std::sync::atomic::AtomicU32::new(1),
            transactions: DashMap::new(),
            last_pong: Mutex::new(Utc::now()),
        })
    }

    fn alloc_seqno(&self) -> u32 {
        self.next_seqno
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    fn encode_content(&self, cmd: &Command) -> Result<Vec<u8>, ProtocolError> {
        Ok(match self.version {
            ProtoVersion::V2 => wire::v2::encode_command(cmd)?,
            ProtoVersion::V3 => wire::v3::encode_command(cmd)?,
        })
    }

    fn decode_ack(&self, content: &[u8]) -> Result<Ack, ProtocolError> {
        Ok(match self.version {
            ProtoVersion::V2 => wire::v2::decode_ack(content)?,
            ProtoVersion::V3 => wire::v3::decode_ack(content)?,
        })
    }

    /// Send a command and wait (up to the configured timeout) for its ack.
    pub async fn send_command(
        self: &Arc<Self>,
        kind: CommandKind,
    ) -> Result<Ack, ProtocolError> {
        let seqno = self.alloc_seqno();
        let content = self.encode_content(&Command { seqno, kind })?;
        let frame = Frame::new(self.version, seqno, content);

        let (tx, rx) = oneshot::channel();

        let timeout_secs = config::get().engine.command_timeout_secs;
        let engine = Arc::clone(self);
        let timeout_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            if let Some((_, txn)) = engine.transactions.remove(&seqno) {
                if let Some(reply) = txn.reply {
                    drop(reply); // dropping the sender fails the waiting receiver
                }
                warn!(seqno, "command transaction timed out");
            }
        });

        self.transactions.insert(
            seqno,
            Transaction {
                sent_at: Utc::now(),
                reply: Some(tx),
                timeout_handle: timeout_task.abort_handle(),
            },
        );

        {
            let mut transport = self.transport.lock().await;
            transport.write_frame(&frame).await?;
        }

        match rx.await {
            Ok(ack) => Ok(ack),
            Err(_) => Err(ProtocolError::TransactionTimeout(seqno)),
        }
    }

    /// Feed a just-received frame into the engine: resolves a pending
    /// transaction if the frame is an ack for one, otherwise returns it
    /// as an unsolicited report for the caller (fan-in) to handle.
    pub fn dispatch_incoming(&self, frame: Frame) -> Result<IncomingOutcome, ProtocolError> {
        let ack = self.decode_ack(&frame.content)?;

        if matches!(ack.kind, AckKind::Pong) {
            return Ok(IncomingOutcome::Pong);
        }

        if let Some((_, txn)) = self.transactions.remove(&ack.seqno) {
            txn.timeout_handle.abort();
            if let Some(reply) = txn.reply {
                let _ = reply.send(ack);
            }
            return Ok(IncomingOutcome::Resolved);
        }

        Ok(IncomingOutcome::Unsolicited(ack))
    }

    /// Read the next frame off the transport and dispatch it.
    pub async fn poll_once(&self) -> Result<IncomingOutcome, ProtocolError> {
        let frame = {
            let mut transport = self.transport.lock().await;
            transport.read_frame().await?
        };
        self.dispatch_incoming(frame)
    }

    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        let seqno = self.alloc_seqno();
        let content = self.encode_content(&Command { seqno, kind: CommandKind::Ping })?;
        let frame = Frame::new(self.version, seqno, content);
        let mut transport = self.transport.lock().await;
        transport.write_frame(&frame).await?;
        Ok(())
    }

    pub async fn note_pong(&self) {
        *self.last_pong.lock().await = Utc::now();
    }

    /// Whether the connection should be considered dead (no pong within
    /// `keepalive_dead_secs`).
    pub async fn is_dead(&self) -> bool {
        let last = *self.last_pong.lock().await;
        let dead_after = config::get().engine.keepalive_dead_secs as i64;
        Utc::now().signed_duration_since(last).num_seconds() > dead_after
    }

    /// Snapshot of outstanding transactions, for diagnostics/testing.
    pub fn pending_count(&self) -> usize {
        self.transactions.len()
    }

    pub async fn shutdown(&self) -> Result<(), ProtocolError> {
        let mut transport = self.transport.lock().await;
        transport.shutdown().await?;
        Ok(())
    }
}

pub enum IncomingOutcome {
    Resolved,
    Unsolicited(Ack),
    Pong,
}

/// Run the keepalive loop for an engine until cancelled: ping on the
/// configured interval, declare the connection dead if no pong arrives
/// within the dead-after window.
pub async fn keepalive_loop(
    engine: Arc<Engine>,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<(), ProtocolError> {
    let ping_secs = config::get().engine.keepalive_ping_secs;
    let mut interval = tokio::time::interval(Duration::from_secs(ping_secs));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = interval.tick() => {
                if engine.is_dead().await {
                    error!("keepalive lapsed, peer considered dead");
                    return Err(ProtocolError::KeepaliveLapsed);
                }
                if let Err(e) = engine.send_ping().await {
                    warn!(error = %e, "failed to send keepalive ping");
                    return Err(e);
                }
                debug!("keepalive ping sent");
            }
        }
    }
}
