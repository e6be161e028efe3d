//! Core data model for the data source subsystem.
//!
//! Mirrors the wire-level and in-memory shapes a source tracker needs:
//! definitions parsed from `"iface:k=v,..."` strings, driver capability
//! flags, the `Source` record itself, and the small value types (signal,
//! GPS fix, RRD rollups) that get attached to packets as they pass through
//! the fan-in stage.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rrd::Rrd;

/// Maximum length in bytes of a single channel string in a hop list
/// (spec §8: "Channel strings too long (> 64 bytes) are rejected with
/// `BadDefinition`").
pub const MAX_HOP_ENTRY_LEN: usize = 64;

/// Errors raised while interpreting the data model's own invariants
/// (parsing, validation). Transport/protocol/lifecycle errors live in
/// their owning modules.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("malformed source definition: {0}")]
    BadDefinition(String),
    #[error("unsupported driver: {0}")]
    Unsupported(String),
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] crate::engine::ProtocolError),
    #[error("operation timed out")]
    Timeout,
    #[error("reported by capture helper: {0}")]
    HelperReported(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("remote source disconnected")]
    RemoteDisconnected,
}

impl SourceError {
    /// Whether a source in this error state is eligible for the
    /// automatic reopen/retry path (spec error-handling table).
    pub fn is_retry_eligible(&self) -> bool {
        match self {
            SourceError::Transport(_) => true,
            SourceError::Timeout => true,
            SourceError::RemoteDisconnected => true,
            SourceError::HelperReported(_) => true,
            SourceError::BadDefinition(_) => false,
            SourceError::Unsupported(_) => false,
            SourceError::Cancelled => false,
            SourceError::Protocol(_) => false,
        }
    }
}

/// A parsed `"iface:k=v,k=v"` source definition string, as supplied by
/// configuration or an HTTP `POST /datasource/add`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Everything before the first `:` — the interface/device identifier,
    /// or `-` for a driver that doesn't need one (e.g. a remote capture).
    pub interface: String,
    /// Driver tag explicitly selected via `type=...`, if present.
    pub driver_type: Option<String>,
    /// Raw key/value options, preserved in declaration order for
    /// passthrough to the driver.
    pub options: Vec<(String, String)>,
}

impl SourceDefinition {
    /// Parse a definition string. Rejects `filter_locals` combined with
    /// `filter_interface` as ambiguous (see design notes).
    pub fn parse(raw: &str) -> Result<Self, SourceError> {
        let mut parts = raw.splitn(2, ':');
        let interface = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SourceError::BadDefinition("missing interface".into()))?
            .to_string();

        let mut options = Vec::new();
        let mut driver_type = None;
        let mut has_filter_locals = false;
        let mut has_filter_interface = false;

        if let Some(rest) = parts.next() {
            for kv in rest.split(',') {
                let kv = kv.trim();
                if kv.is_empty() {
                    continue;
                }
                let mut kv_parts = kv.splitn(2, '=');
                let key = kv_parts
                    .next()
                    .ok_or_else(|| SourceError::BadDefinition(format!("bad option: {kv}")))?
                    .trim()
                    .to_string();
                let value = kv_parts.next().unwrap_or("").trim().to_string();

                match key.as_str() {
                    "type" => driver_type = Some(value.clone()),
                    "filter_locals" => has_filter_locals = true,
                    "filter_interface" => has_filter_interface = true,
                    _ => {}
                }
                options.push((key, value));
            }
        }

        if has_filter_locals && has_filter_interface {
            return Err(SourceError::BadDefinition(
                "filter_locals and filter_interface cannot both be set".into(),
            ));
        }

        Ok(Self {
            interface,
            driver_type,
            options,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Re-render as the canonical `"iface:k=v,..."` string.
    pub fn to_definition_string(&self) -> String {
        if self.options.is_empty() {
            return self.interface.clone();
        }
        let opts = self
            .options
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
            .collect::<Vec<_>>()
            .join(",");
        format!("{}:{}", self.interface, opts)
    }
}

/// Driver capability flags (spec §3 `DriverCaps`), a plain bitset over
/// `u32` rather than an external bitflags dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriverCaps(pub u32);

impl DriverCaps {
    pub const PROBE: Self = Self(0b0000_0001);
    pub const LIST: Self = Self(0b0000_0010);
    pub const HOP: Self = Self(0b0000_0100);
    pub const RETUNE: Self = Self(0b0000_1000);
    pub const REMOTE: Self = Self(0b0001_0000);
    pub const PASSIVE: Self = Self(0b0010_0000);
    pub const INJECTION: Self = Self(0b0100_0000);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for DriverCaps {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Lifecycle state of a `Source`, per spec §4.4's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Init,
    Probing,
    Listing,
    Opening,
    Running,
    Paused,
    Closing,
    Closed,
    Error,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Init => "init",
            LifecycleState::Probing => "probing",
            LifecycleState::Listing => "listing",
            LifecycleState::Opening => "opening",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
            LifecycleState::Closing => "closing",
            LifecycleState::Closed => "closed",
            LifecycleState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Channel-hop configuration attached to a source (spec §3 `HopState`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HopState {
    pub hopping: bool,
    pub list: Vec<String>,
    pub rate_hz: f64,
    pub offset: usize,
    pub split: bool,
    pub shuffle: bool,
    pub shuffle_skip: usize,
    /// Index into `list` of the channel currently tuned.
    pub current_index: usize,
    /// Consecutive slow-acks observed; drives backoff doubling after 3.
    pub slow_acks: u32,
}

impl HopState {
    /// Install a new hop list, rejecting any channel string over the
    /// 64-byte cap (spec §8).
    pub fn set_list(&mut self, list: Vec<String>) -> Result<(), SourceError> {
        if let Some(entry) = list.iter().find(|c| c.len() > MAX_HOP_ENTRY_LEN) {
            return Err(SourceError::BadDefinition(format!(
                "channel string {entry:?} of {} bytes exceeds max of {MAX_HOP_ENTRY_LEN}",
                entry.len()
            )));
        }
        self.list = list;
        self.current_index = 0;
        Ok(())
    }
}

/// Retry/reopen bookkeeping for a source that has errored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState {
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RetryState {
    /// `min(5 + attempts*2, 30)` seconds, per spec §4.4.
    pub fn backoff_secs(&self) -> u64 {
        (5 + self.attempts as u64 * 2).min(30)
    }
}

/// A single tracked data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub uuid: Uuid,
    pub key: u32,
    pub definition: SourceDefinition,
    pub driver_tag: String,
    pub caps: DriverCaps,
    pub state: LifecycleState,
    pub hop_state: HopState,
    pub retry: RetryState,
    pub packets_seen: u64,
    pub packets_dropped: u64,
    pub error_count: u64,
    /// dlt the driver reported at open time; substituted in for any report
    /// that arrives with `dlt = 0` (spec §8).
    pub declared_dlt: u32,
    #[serde(skip)]
    pub rrd_packets: Rrd<60>,
    #[serde(skip)]
    pub rrd_packet_size: Rrd<60>,
    pub last_report: Option<DateTime<Utc>>,
    /// Present only for a source whose transport is IPC (helper subprocess pid).
    pub ipc_pid: Option<u32>,
    /// Present only for a source whose transport is remote (peer address).
    pub remote_peer: Option<String>,
}

impl Source {
    /// Build a fresh `Source` in `Init` state from a parsed definition,
    /// deriving `uuid`/`key` per the adler32 scheme in spec §4.4.
    pub fn new(definition: SourceDefinition, driver_tag: String, caps: DriverCaps) -> Self {
        let uuid = derive_uuid(&driver_tag, &definition.interface);
        let key = adler32(uuid.to_string().as_bytes());
        Self {
            uuid,
            key,
            definition,
            driver_tag,
            caps,
            state: LifecycleState::Init,
            hop_state: HopState::default(),
            retry: RetryState::default(),
            packets_seen: 0,
            packets_dropped: 0,
            error_count: 0,
            declared_dlt: 0,
            rrd_packets: Rrd::new(),
            rrd_packet_size: Rrd::new(),
            last_report: None,
            ipc_pid: None,
            remote_peer: None,
        }
    }
}

/// Adler-32 checksum, matching the algorithm Kismet uses for its
/// driver/source signatures (`adler32_checksum` in `kis_datasource.h`).
pub fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

/// Derive a stable, RFC-4122-shaped UUID from a driver tag and an
/// interface/hardware identifier, the same way Kismet derives its source
/// signature from adler32 checksums of its builder/datasource tags
/// (generalized here to the driver tag and interface string actually in
/// hand). The version/variant nibbles are pinned so the result is
/// syntactically a valid UUID even though it isn't randomly generated.
pub fn derive_uuid(driver_tag: &str, interface: &str) -> Uuid {
    let hi = adler32(driver_tag.as_bytes());
    let lo = adler32(interface.as_bytes());
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&hi.to_be_bytes());
    bytes[4..8].copy_from_slice(&lo.to_be_bytes());
    bytes[8..12].copy_from_slice(&hi.to_le_bytes());
    bytes[12..16].copy_from_slice(&lo.to_le_bytes());
    // Pin version (4) and variant (RFC 4122) nibbles.
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    Uuid::from_bytes(bytes)
}

/// Signal quality sub-record, attached to a packet by the fan-in stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Signal {
    pub dbm: Option<f64>,
    pub rssi: Option<f64>,
    pub noise_dbm: Option<f64>,
    pub noise_rssi: Option<f64>,
    pub freq_khz: Option<f64>,
    pub channel: Option<u32>,
    pub datarate: Option<f64>,
    pub carrier: Option<String>,
    pub encoding: Option<String>,
}

impl Signal {
    /// Normalized signal strength in dBm, preferring `dbm` over `rssi`
    /// conversion per spec §4.6.
    pub fn normalized_dbm(&self) -> Option<f64> {
        self.dbm.or_else(|| self.rssi.map(|r| r - 100.0))
    }
}

/// GPS fix sub-record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Gps {
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
    pub speed: Option<f64>,
    pub fix: u8,
    pub ts_sec: i64,
    pub ts_usec: i64,
}

/// An enriched packet as it leaves the fan-in stage, ready for the
/// packet chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub ts: DateTime<Utc>,
    pub source_key: u32,
    pub dlt: u32,
    pub link_frame: Vec<u8>,
    pub gps: Option<Gps>,
    pub signal: Option<Signal>,
    pub json: Option<serde_json::Value>,
    pub error: bool,
}

/// Raw report shapes coming up from the external protocol engine, before
/// fan-in enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataReport {
    Data {
        dlt: u32,
        link_frame: Vec<u8>,
        gps: Option<Gps>,
        signal: Option<Signal>,
    },
    Json {
        dlt: u32,
        json: serde_json::Value,
        gps: Option<Gps>,
        signal: Option<Signal>,
    },
}

/// Options a driver reports back after a successful open (generalizes the
/// "open response" concept from C3/C4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenReport {
    pub dlt: u32,
    pub capture_interface: Option<String>,
    pub hardware: Option<String>,
    pub channels: Vec<String>,
    pub channel: Option<String>,
    pub extra: HashMap<String, String>,
}
