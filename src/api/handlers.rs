//! HTTP API handlers (spec §6.3): source CRUD/inspection under
//! `/datasource/...` and scan-report injection under `/phy/...`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::packetchain::{enrich, EnrichmentContext, PacketChain};
use crate::tracker::SourceTracker;
use crate::types::{DataReport, Gps, Signal, Source};

/// Shared state for every `/datasource` and `/phy` handler.
#[derive(Clone)]
pub struct ApiState {
    pub tracker: Arc<SourceTracker>,
    pub chain: Arc<dyn PacketChain>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

fn err(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

// ---------------------------------------------------------------------
// /datasource
// ---------------------------------------------------------------------

pub async fn all_sources(State(state): State<ApiState>) -> Json<Vec<Source>> {
    let mut sources = Vec::new();
    for runtime in state.tracker.list() {
        sources.push(runtime.source.read().await.clone());
    }
    Json(sources)
}

pub async fn get_source(State(state): State<ApiState>, Path(uuid): Path<Uuid>) -> Response {
    match state.tracker.get(&uuid) {
        Some(runtime) => Json(runtime.source.read().await.clone()).into_response(),
        None => err(StatusCode::NOT_FOUND, format!("no source {uuid}")),
    }
}

#[derive(Debug, Serialize)]
pub struct RrdSnapshot {
    pub packets_per_minute: Vec<u64>,
    pub bytes_per_minute: Vec<u64>,
}

pub async fn get_source_rrd(State(state): State<ApiState>, Path(uuid): Path<Uuid>) -> Response {
    match state.tracker.get(&uuid) {
        Some(runtime) => {
            let source = runtime.source.read().await;
            Json(RrdSnapshot {
                packets_per_minute: source.rrd_packets.iter().copied().collect(),
                bytes_per_minute: source.rrd_packet_size.iter().copied().collect(),
            })
            .into_response()
        }
        None => err(StatusCode::NOT_FOUND, format!("no source {uuid}")),
    }
}

#[derive(Debug, Deserialize)]
pub struct DefinitionRequest {
    pub definition: String,
}

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub success: bool,
    pub message: Option<String>,
}

pub async fn probe_source(
    State(state): State<ApiState>,
    Json(req): Json<DefinitionRequest>,
) -> Response {
    match state.tracker.probe_definition(&req.definition).await {
        Ok(success) => Json(ProbeResponse { success, message: None }).into_response(),
        Err(e) => err(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct AddSourceRequest {
    pub definition: String,
    #[serde(default)]
    pub open: bool,
}

#[derive(Debug, Serialize)]
pub struct AddSourceResponse {
    pub uuid: Uuid,
}

pub async fn add_source(
    State(state): State<ApiState>,
    Json(req): Json<AddSourceRequest>,
) -> Response {
    match state.tracker.add(&req.definition).await {
        Ok(uuid) => {
            if req.open {
                if let Err(e) = state.tracker.open(&uuid).await {
                    warn!(%uuid, error = %e, "auto-open after add failed");
                }
            }
            Json(AddSourceResponse { uuid }).into_response()
        }
        Err(e) => err(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Debug, Serialize)]
pub struct InterfaceListResponse {
    pub driver: &'static str,
    pub interfaces: Vec<String>,
}

pub async fn list_interfaces(State(state): State<ApiState>) -> Json<Vec<InterfaceListResponse>> {
    let results = state
        .tracker
        .list_interfaces()
        .await
        .into_iter()
        .map(|(driver, interfaces)| InterfaceListResponse { driver, interfaces })
        .collect();
    Json(results)
}

#[derive(Debug, Deserialize)]
pub struct SetChannelRequest {
    pub channel: String,
}

pub async fn set_channel(
    State(state): State<ApiState>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<SetChannelRequest>,
) -> Response {
    let Some(runtime) = state.tracker.get(&uuid) else {
        return err(StatusCode::NOT_FOUND, format!("no source {uuid}"));
    };
    let engine = runtime.engine_handle().read().await.clone();
    let Some(engine) = engine else {
        return err(StatusCode::CONFLICT, "source is not open");
    };
    match engine
        .send_command(crate::wire::CommandKind::SetChannel { channel: req.channel })
        .await
    {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => err(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetHopRequest {
    pub channels: Vec<String>,
    pub rate_hz: f64,
    #[serde(default)]
    pub split: bool,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub shuffle_skip: usize,
}

pub async fn set_hop(
    State(state): State<ApiState>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<SetHopRequest>,
) -> Response {
    let Some(runtime) = state.tracker.get(&uuid) else {
        return err(StatusCode::NOT_FOUND, format!("no source {uuid}"));
    };
    let mut source = runtime.source.write().await;
    if let Err(e) = source.hop_state.set_list(req.channels) {
        return err(StatusCode::BAD_REQUEST, e.to_string());
    }
    source.hop_state.rate_hz = req.rate_hz;
    source.hop_state.split = req.split;
    source.hop_state.shuffle = req.shuffle;
    source.hop_state.shuffle_skip = req.shuffle_skip;
    source.hop_state.hopping = true;
    StatusCode::OK.into_response()
}

pub async fn close_source(State(state): State<ApiState>, Path(uuid): Path<Uuid>) -> Response {
    match state.tracker.close(&uuid).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

pub async fn pause_source(State(state): State<ApiState>, Path(uuid): Path<Uuid>) -> Response {
    let Some(runtime) = state.tracker.get(&uuid) else {
        return err(StatusCode::NOT_FOUND, format!("no source {uuid}"));
    };
    match runtime.pause().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

pub async fn resume_source(State(state): State<ApiState>, Path(uuid): Path<Uuid>) -> Response {
    let Some(runtime) = state.tracker.get(&uuid) else {
        return err(StatusCode::NOT_FOUND, format!("no source {uuid}"));
    };
    match runtime.resume().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

// ---------------------------------------------------------------------
// /phy/<phy>/scan/scan_report
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ScanReportEntry {
    pub timestamp: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub signal: Option<f64>,
    pub freqkhz: Option<f64>,
    pub channel: Option<u32>,
    #[serde(default)]
    pub tags: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ScanReportRequest {
    pub source_uuid: Uuid,
    pub source_name: String,
    pub reports: Vec<ScanReportEntry>,
}

#[derive(Debug, Serialize)]
pub struct ScanReportResponse {
    pub status: String,
    pub success: bool,
}

/// Shared by the 802.11 and Bluetooth scan-report endpoints: both inject
/// scan-only pseudo-packets through a virtual source's packet chain
/// rather than a real capture helper.
pub async fn scan_report(
    State(state): State<ApiState>,
    Json(req): Json<ScanReportRequest>,
) -> Response {
    let runtime = match state.tracker.get(&req.source_uuid) {
        Some(runtime) => runtime,
        None => {
            // No tracked source behind this uuid yet: stand up a fresh
            // virtual source named after `source_name` as the provenance
            // tag for these externally-submitted reports.
            let definition = format!("{}:type=virtualscan", req.source_name);
            match state.tracker.add(&definition).await {
                Ok(uuid) => state.tracker.get(&uuid).expect("just-registered source must exist"),
                Err(e) => return err(StatusCode::BAD_REQUEST, format!("failed to create virtual source: {e}")),
            }
        }
    };
    let key = runtime.source.read().await.key;

    let mut ctx = EnrichmentContext::default();
    for entry in req.reports {
        let gps = entry.lat.zip(entry.lon).map(|(lat, lon)| Gps {
            lat,
            lon,
            alt: entry.alt,
            speed: None,
            fix: if entry.alt.is_some() { 3 } else { 2 },
            ts_sec: entry.timestamp.unwrap_or(0),
            ts_usec: 0,
        });
        let signal = entry.signal.map(|dbm| Signal { dbm: Some(dbm), channel: entry.channel, ..Default::default() });
        let report = DataReport::Json {
            dlt: 0,
            json: entry.tags,
            gps,
            signal,
        };
        let packet = enrich(report, key, &mut ctx);
        state.chain.submit(packet).await;
    }

    Json(ScanReportResponse { status: "Scan report accepted".to_string(), success: true }).into_response()
}
