//! Compact (v3) wire encoding.
//!
//! Same logical `Command`/`Ack` shapes as v2, but sub-records are encoded
//! as JSON arrays instead of maps — no field names on the wire, just
//! positional values. This halves typical frame size for the
//! high-frequency `Data`/`Json` report path without introducing a new
//! binary serialization dependency.

use serde::{Deserialize, Serialize};

use super::{Ack, Command, WireError};
use crate::types::{Gps, Signal};

pub fn encode_command(cmd: &Command) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(cmd).map_err(|e| WireError::Decode(e.to_string()))
}

pub fn decode_command(content: &[u8]) -> Result<Command, WireError> {
    serde_json::from_slice(content).map_err(|e| WireError::Decode(e.to_string()))
}

pub fn encode_ack(ack: &Ack) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(ack).map_err(|e| WireError::Decode(e.to_string()))
}

pub fn decode_ack(content: &[u8]) -> Result<Ack, WireError> {
    serde_json::from_slice(content).map_err(|e| WireError::Decode(e.to_string()))
}

/// Positional (tuple) encoding of [`Signal`] for the compact report path.
#[derive(Serialize, Deserialize)]
struct CompactSignal(
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<u32>,
    Option<f64>,
    Option<String>,
    Option<String>,
);

impl From<&Signal> for CompactSignal {
    fn from(s: &Signal) -> Self {
        CompactSignal(
            s.dbm,
            s.rssi,
            s.noise_dbm,
            s.noise_rssi,
            s.freq_khz,
            s.channel,
            s.datarate,
            s.carrier.clone(),
            s.encoding.clone(),
        )
    }
}

impl From<CompactSignal> for Signal {
    fn from(c: CompactSignal) -> Self {
        Signal {
            dbm: c.0,
            rssi: c.1,
            noise_dbm: c.2,
            noise_rssi: c.3,
            freq_khz: c.4,
            channel: c.5,
            datarate: c.6,
            carrier: c.7,
            encoding: c.8,
        }
    }
}

pub fn encode_signal(signal: &Signal) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(&CompactSignal::from(signal)).map_err(|e| WireError::Decode(e.to_string()))
}

pub fn decode_signal(content: &[u8]) -> Result<Signal, WireError> {
    let compact: CompactSignal =
        serde_json::from_slice(content).map_err(|e| WireError::Decode(e.to_string()))?;
    Ok(compact.into())
}

/// Positional encoding of [`Gps`].
#[derive(Serialize, Deserialize)]
struct CompactGps(f64, f64, Option<f64>, Option<f64>, u8, i64, i64);

impl From<&Gps> for CompactGps {
    fn from(g: &Gps) -> Self {
        CompactGps(g.lat, g.lon, g.alt, g.speed, g.fix, g.ts_sec, g.ts_usec)
    }
}

impl From<CompactGps> for Gps {
    fn from(c: CompactGps) -> Self {
        Gps { lat: c.0, lon: c.1, alt: c.2, speed: c.3, fix: c.4, ts_sec: c.5, ts_usec: c.6 }
    }
}

pub fn encode_gps(gps: &Gps) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(&CompactGps::from(gps)).map_err(|e| WireError::Decode(e.to_string()))
}

pub fn decode_gps(content: &[u8]) -> Result<Gps, WireError> {
    let compact: CompactGps =
        serde_json::from_slice(content).map_err(|e| WireError::Decode(e.to_string()))?;
    Ok(compact.into())
}
