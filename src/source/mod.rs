//! Source instance state machine (C4): owns one `Source`'s lifecycle,
//! drives its `Engine`, buffers reports that arrive before the source has
//! finished opening, and runs the retry/reopen loop on error.

mod buffer;

pub use buffer::PreOpenBuffer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config;
use crate::drivers::DriverBuilder;
use crate::engine::{Engine, IncomingOutcome};
use crate::packetchain::{enrich, sample_rrd, EnrichmentContext, PacketChain};
use crate::transport::FrameTransport;
use crate::types::{DataReport, LifecycleState, Source, SourceDefinition, SourceError};
use crate::wire::{AckKind, CommandKind, ProtoVersion};

/// Runtime wrapper around a tracked `Source`: the data model plus
/// whatever's needed to actually talk to its capture helper.
pub struct SourceRuntime {
    pub source: RwLock<Source>,
    driver: Arc<dyn DriverBuilder>,
    engine: RwLock<Option<Arc<Engine>>>,
    chain: Arc<dyn PacketChain>,
    pre_open: tokio::sync::Mutex<PreOpenBuffer>,
    cancel: CancellationToken,
    report_loop_running: AtomicBool,
}

impl SourceRuntime {
    pub fn new(
        definition: SourceDefinition,
        driver: Arc<dyn DriverBuilder>,
        chain: Arc<dyn PacketChain>,
    ) -> Self {
        let caps = driver.caps();
        let source = Source::new(definition, driver.tag().to_string(), caps);
        let cap_bytes = config::get().source.pre_open_buffer_cap_bytes;
        Self {
            source: RwLock::new(source),
            driver,
            engine: RwLock::new(None),
            chain,
            pre_open: tokio::sync::Mutex::new(PreOpenBuffer::new(cap_bytes)),
            cancel: CancellationToken::new(),
            report_loop_running: AtomicBool::new(false),
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn set_state(&self, state: LifecycleState) {
        let mut source = self.source.write().await;
        info!(uuid = %source.uuid, from = %source.state, to = %state, "source state transition");
        source.state = state;
    }

    /// Probe the interface without opening it (spec §4.2).
    pub async fn probe(&self) -> Result<bool, SourceError> {
        self.set_state(LifecycleState::Probing).await;
        let definition = self.source.read().await.definition.clone();
        let result = self
            .driver
            .probe(&definition)
            .await
            .map_err(|e| SourceError::HelperReported(e.to_string()));
        self.set_state(LifecycleState::Init).await;
        result
    }

    /// Launch the capture helper and run the open handshake (spec §4.3).
    pub async fn open(self: &Arc<Self>) -> Result<(), SourceError> {
        self.set_state(LifecycleState::Opening).await;

        let definition = self.source.read().await.definition.clone();
        let transport: Box<dyn FrameTransport> = self
            .driver
            .open(&definition)
            .await
            .map_err(|e| SourceError::HelperReported(e.to_string()))?;
        let pid = transport.pid();

        let engine = Engine::new(transport, ProtoVersion::V3);
        let ack = engine
            .send_command(CommandKind::Open { definition: definition.to_definition_string() })
            .await?;

        match ack.kind {
            AckKind::OpenResult(report) if ack.success => {
                let mut source = self.source.write().await;
                source.ipc_pid = pid;
                source.state = LifecycleState::Running;
                source.retry = Default::default();
                source.declared_dlt = report.dlt;
                if !report.channels.is_empty() {
                    let _ = source.hop_state.set_list(report.channels);
                }
                drop(source);
            }
            _ => {
                let message = ack.message.unwrap_or_else(|| "open rejected".to_string());
                self.set_state(LifecycleState::Error).await;
                return Err(SourceError::HelperReported(message));
            }
        }

        *self.engine.write().await = Some(engine);
        self.flush_pre_open_buffer().await;
        self.ensure_report_loop();
        Ok(())
    }

    /// Spawn the continuous report-read loop exactly once per runtime,
    /// whether this is the first successful `open()` or a remote
    /// handshake binding in via `rebind()`.
    fn ensure_report_loop(self: &Arc<Self>) {
        if !self.report_loop_running.swap(true, Ordering::SeqCst) {
            tokio::spawn(Arc::clone(self).run_report_loop());
        }
    }

    /// Continuously read frames off whatever engine this source currently
    /// holds, enriching unsolicited reports and handing them to the
    /// packet chain. A transport failure marks the source errored and
    /// drives the reopen loop in place, so the same task keeps serving
    /// reports across reconnects instead of being respawned each time.
    async fn run_report_loop(self: Arc<Self>) {
        let mut ctx = EnrichmentContext::default();
        loop {
            let engine = match self.engine.read().await.clone() {
                Some(e) => e,
                None => return,
            };

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return,
                outcome = engine.poll_once() => outcome,
            };

            match outcome {
                Ok(IncomingOutcome::Pong) => engine.note_pong().await,
                Ok(IncomingOutcome::Resolved) => {}
                Ok(IncomingOutcome::Unsolicited(ack)) => {
                    if let AckKind::Report(report) = ack.kind {
                        self.handle_report(report, &mut ctx).await;
                    }
                }
                Err(e) => {
                    let err = SourceError::from(e);
                    warn!(error = %err, "source report loop interrupted");
                    self.mark_error(&err).await;
                    if !err.is_retry_eligible() {
                        return;
                    }
                    self.run_reopen_loop().await;
                    if self.source.read().await.state != LifecycleState::Running {
                        return;
                    }
                }
            }
        }
    }

    async fn handle_report(&self, report: DataReport, ctx: &mut EnrichmentContext) {
        let (key, declared_dlt, state) = {
            let source = self.source.read().await;
            (source.key, source.declared_dlt, source.state)
        };
        match state {
            LifecycleState::Opening | LifecycleState::Probing => {
                self.buffer_pre_open(report).await;
                return;
            }
            LifecycleState::Paused => {
                // §4.6 step 7: a paused source still reads off the wire
                // (so the helper isn't backpressured) but must not submit.
                let mut source = self.source.write().await;
                source.packets_dropped += 1;
                return;
            }
            _ => {}
        }
        ctx.declared_dlt = declared_dlt;
        let packet = enrich(report, key, ctx);
        {
            let mut source = self.source.write().await;
            sample_rrd(&mut source, &packet);
        }
        self.chain.submit(packet).await;
    }

    /// Enrich and submit whatever arrived before `open()` finished, in
    /// arrival order, now that the source is running (spec §9 open
    /// question 2).
    async fn flush_pre_open_buffer(&self) {
        let reports = {
            let mut buf = self.pre_open.lock().await;
            let dropped = buf.dropped();
            if dropped > 0 {
                warn!(dropped, "pre-open buffer dropped reports before open completed");
            }
            buf.drain()
        };
        if reports.is_empty() {
            return;
        }

        let (key, declared_dlt) = {
            let source = self.source.read().await;
            (source.key, source.declared_dlt)
        };
        let mut ctx = EnrichmentContext { declared_dlt, ..Default::default() };
        for report in reports {
            let packet = enrich(report, key, &mut ctx);
            {
                let mut source = self.source.write().await;
                sample_rrd(&mut source, &packet);
            }
            self.chain.submit(packet).await;
        }
    }

    /// Buffer (or, past capacity, drop) a report that arrived while the
    /// source was still opening.
    pub async fn buffer_pre_open(&self, report: DataReport) {
        let mut buf = self.pre_open.lock().await;
        buf.push(report);
    }

    pub async fn pause(&self) -> Result<(), SourceError> {
        self.set_state(LifecycleState::Paused).await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), SourceError> {
        self.set_state(LifecycleState::Running).await;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), SourceError> {
        self.set_state(LifecycleState::Closing).await;
        self.cancel.cancel();
        if let Some(engine) = self.engine.write().await.take() {
            engine.shutdown().await?;
        }
        self.set_state(LifecycleState::Closed).await;
        Ok(())
    }

    /// Record an error and transition to `Error`, recording it for the
    /// retry loop to act on.
    pub async fn mark_error(&self, err: &SourceError) {
        let mut source = self.source.write().await;
        source.state = LifecycleState::Error;
        source.error_count += 1;
        source.retry.last_error = Some(err.to_string());
        error!(uuid = %source.uuid, error = %err, "source entered error state");
    }

    /// Whether this source's current error is eligible for the automatic
    /// reopen loop, and if so, how long to wait before trying.
    pub async fn next_retry_delay(&self) -> Option<std::time::Duration> {
        let source = self.source.read().await;
        if source.state != LifecycleState::Error {
            return None;
        }
        Some(std::time::Duration::from_secs(source.retry.backoff_secs()))
    }

    /// Drive the retry/reopen loop for a source sitting in `Error`:
    /// sleep the backoff, bump the attempt counter, try to reopen.
    /// Returns once the source is `Running` again or cancellation fires.
    pub async fn run_reopen_loop(self: &Arc<Self>) {
        loop {
            let delay = match self.next_retry_delay().await {
                Some(d) => d,
                None => return,
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            {
                let mut source = self.source.write().await;
                source.retry.attempts += 1;
                source.retry.last_attempt = Some(chrono::Utc::now());
            }

            match self.open().await {
                Ok(()) => {
                    info!("source reopened successfully");
                    return;
                }
                Err(e) if e.is_retry_eligible() => {
                    self.mark_error(&e).await;
                    continue;
                }
                Err(e) => {
                    self.mark_error(&e).await;
                    return;
                }
            }
        }
    }

    pub fn engine_handle(&self) -> &RwLock<Option<Arc<Engine>>> {
        &self.engine
    }

    /// Rebind this source onto a freshly accepted transport, replacing
    /// whatever engine it previously had (spec §8 "UUID rebind on
    /// reconnect" — a remote capture helper that drops and reconnects
    /// resumes the same `Source` rather than creating a duplicate).
    pub async fn rebind(self: &Arc<Self>, transport: Box<dyn FrameTransport>, version: ProtoVersion) {
        let engine = Engine::new(transport, version);
        *self.engine.write().await = Some(engine);
        {
            let mut source = self.source.write().await;
            source.state = LifecycleState::Running;
            source.retry = Default::default();
            info!(uuid = %source.uuid, "source rebound to new remote connection");
        }
        self.ensure_report_loop();
    }
}
