//! Packet fan-in (C6): turns a raw [`DataReport`] from a source's engine
//! into an enriched [`Packet`], then hands it to a bounded channel for
//! downstream consumers. Overflow drops the oldest-arriving packet and
//! logs it rather than blocking the source's read loop.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config;
use crate::types::{DataReport, Gps, Packet, Signal};

/// Per-source enrichment context the fan-in stage needs beyond what's in
/// the raw report: an optional dlt override, the source's declared dlt
/// (substituted in when a report arrives with `dlt = 0`), and the
/// last-known-good GPS fix to fall back on when a report doesn't carry
/// its own.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentContext {
    pub dlt_override: Option<u32>,
    pub declared_dlt: u32,
    pub last_gps: Option<Gps>,
}

/// Resolve a report's effective dlt: an explicit override wins outright,
/// otherwise a `dlt = 0` report falls back to the source's declared dlt
/// (spec §8), and any other value passes through unchanged.
fn resolve_dlt(report_dlt: u32, ctx: &EnrichmentContext) -> u32 {
    if let Some(over) = ctx.dlt_override {
        over
    } else if report_dlt == 0 {
        ctx.declared_dlt
    } else {
        report_dlt
    }
}

/// Enrich a raw report into a packet ready for the chain. `source_key` is
/// the u32 tracker key (not the UUID) per spec §4.6's packet header.
pub fn enrich(
    report: DataReport,
    source_key: u32,
    ctx: &mut EnrichmentContext,
) -> Packet {
    match report {
        DataReport::Data { dlt, link_frame, gps, signal } => {
            if let Some(g) = gps {
                ctx.last_gps = Some(g);
            }
            Packet {
                ts: Utc::now(),
                source_key,
                dlt: resolve_dlt(dlt, ctx),
                link_frame,
                gps: gps.or(ctx.last_gps),
                signal: normalize_signal(signal),
                json: None,
                error: false,
            }
        }
        DataReport::Json { dlt, json, gps, signal } => {
            if let Some(g) = gps {
                ctx.last_gps = Some(g);
            }
            Packet {
                ts: Utc::now(),
                source_key,
                dlt: resolve_dlt(dlt, ctx),
                link_frame: Vec::new(),
                gps: gps.or(ctx.last_gps),
                signal: normalize_signal(signal),
                json: Some(json),
                error: false,
            }
        }
    }
}

/// Normalize a signal's dBm field up front so every downstream consumer
/// can read `signal.dbm` without re-deriving it from rssi each time.
fn normalize_signal(signal: Option<Signal>) -> Option<Signal> {
    signal.map(|mut s| {
        s.dbm = s.normalized_dbm();
        s
    })
}

/// Sink for enriched packets. The default implementation is a bounded
/// mpsc channel; tests and alternate consumers can swap in something else.
#[async_trait]
pub trait PacketChain: Send + Sync {
    async fn submit(&self, packet: Packet);
}

/// Bounded-channel packet chain: drops and logs the incoming packet when
/// the channel is full rather than applying backpressure to the source's
/// read loop, matching the spec's "never let a slow consumer stall
/// capture" requirement.
pub struct BoundedPacketChain {
    tx: mpsc::Sender<Packet>,
    dropped: Arc<std::sync::atomic::AtomicU64>,
}

impl BoundedPacketChain {
    pub fn new() -> (Self, mpsc::Receiver<Packet>) {
        let capacity = config::defaults::PACKET_CHAIN_CHANNEL_CAPACITY;
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self { tx, dropped: Arc::new(std::sync::atomic::AtomicU64::new(0)) },
            rx,
        )
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl PacketChain for BoundedPacketChain {
    async fn submit(&self, packet: Packet) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(packet) {
            let total = self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            warn!(total_dropped = total, "packet chain full, dropping packet");
        }
    }
}

/// RRD sampling hook: call once per packet to roll packet-count and
/// packet-size samples into a source's minute-resolution RRDs.
pub fn sample_rrd(source: &mut crate::types::Source, packet: &Packet) {
    source.rrd_packets.push(1);
    source.rrd_packet_size.push(packet.link_frame.len() as u64);
    source.packets_seen += 1;
    source.last_report = Some(packet.ts);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data_report() -> DataReport {
        DataReport::Data {
            dlt: 127,
            link_frame: vec![1, 2, 3],
            gps: None,
            signal: Some(Signal { rssi: Some(40.0), ..Default::default() }),
        }
    }

    #[test]
    fn enrich_normalizes_signal_dbm_from_rssi() {
        let mut ctx = EnrichmentContext::default();
        let packet = enrich(sample_data_report(), 42, &mut ctx);
        assert_eq!(packet.signal.unwrap().dbm, Some(-60.0));
    }

    #[test]
    fn enrich_applies_dlt_override() {
        let mut ctx = EnrichmentContext { dlt_override: Some(1), ..Default::default() };
        let packet = enrich(sample_data_report(), 42, &mut ctx);
        assert_eq!(packet.dlt, 1);
    }

    #[test]
    fn enrich_substitutes_declared_dlt_when_report_dlt_is_zero() {
        let mut ctx = EnrichmentContext { declared_dlt: 105, ..Default::default() };
        let report = DataReport::Data { dlt: 0, link_frame: vec![], gps: None, signal: None };
        let packet = enrich(report, 42, &mut ctx);
        assert_eq!(packet.dlt, 105);
    }

    #[test]
    fn enrich_carries_forward_last_known_gps() {
        let mut ctx = EnrichmentContext::default();
        let gps = Gps { lat: 1.0, lon: 2.0, fix: 3, ..Default::default() };
        let first = DataReport::Data { dlt: 127, link_frame: vec![], gps: Some(gps), signal: None };
        let p1 = enrich(first, 1, &mut ctx);
        assert_eq!(p1.gps.unwrap().lat, 1.0);

        let second = DataReport::Data { dlt: 127, link_frame: vec![], gps: None, signal: None };
        let p2 = enrich(second, 1, &mut ctx);
        assert_eq!(p2.gps.unwrap().lat, 1.0);
    }

    #[tokio::test]
    async fn bounded_chain_drops_when_full() {
        let _ = config::init(config::DatasourceConfig::default());
        let (chain, mut rx) = BoundedPacketChain::new();
        for _ in 0..config::defaults::PACKET_CHAIN_CHANNEL_CAPACITY + 10 {
            chain.submit(sample_packet()).await;
        }
        assert!(chain.dropped_count() > 0);
        rx.close();
    }

    fn sample_packet() -> Packet {
        Packet {
            ts: Utc::now(),
            source_key: 1,
            dlt: 127,
            link_frame: vec![],
            gps: None,
            signal: None,
            json: None,
            error: false,
        }
    }
}
