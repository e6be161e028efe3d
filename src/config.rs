//! Global configuration for the data source subsystem.
//!
//! ## Loading Order
//!
//! 1. `CAPTRACE_CONFIG` environment variable (path to TOML file)
//! 2. `datasource.toml` in the current working directory
//! 3. Built-in defaults (this module's `Default` impls)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(DatasourceConfig::load());
//! let cap = config::get().hop.max_tick_hz;
//! ```

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Named defaults, grouped by subsystem, matching the values called out in
/// the component design sections of the spec.
pub mod defaults {
    /// Global hop scheduler tick ceiling (Hz).
    pub const MAX_HOP_TICK_HZ: f64 = 100.0;

    /// Command round-trip timeout before a transaction is abandoned (seconds).
    pub const COMMAND_TIMEOUT_SECS: u64 = 30;

    /// Ping interval while idle (seconds).
    pub const KEEPALIVE_PING_SECS: u64 = 5;

    /// If no pong within this long, the connection is considered dead (seconds).
    pub const KEEPALIVE_DEAD_SECS: u64 = 15;

    /// Minimum reopen backoff (seconds), before the `+2*attempts` ramp.
    pub const REOPEN_BACKOFF_BASE_SECS: u64 = 5;

    /// Reopen backoff ceiling (seconds).
    pub const REOPEN_BACKOFF_MAX_SECS: u64 = 30;

    /// Consecutive slow-acks before hop backoff starts doubling.
    pub const HOP_SLOW_ACK_THRESHOLD: u32 = 3;

    /// Bounded packet-chain channel capacity before reports are dropped.
    pub const PACKET_CHAIN_CHANNEL_CAPACITY: usize = 4096;

    /// Pre-open buffer cap (bytes) for reports arriving before a source
    /// finishes opening.
    pub const PRE_OPEN_BUFFER_CAP_BYTES: usize = 4 * 1024 * 1024;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopConfig {
    pub max_tick_hz: f64,
    pub slow_ack_threshold: u32,
}

impl Default for HopConfig {
    fn default() -> Self {
        Self {
            max_tick_hz: defaults::MAX_HOP_TICK_HZ,
            slow_ack_threshold: defaults::HOP_SLOW_ACK_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub command_timeout_secs: u64,
    pub keepalive_ping_secs: u64,
    pub keepalive_dead_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: defaults::COMMAND_TIMEOUT_SECS,
            keepalive_ping_secs: defaults::KEEPALIVE_PING_SECS,
            keepalive_dead_secs: defaults::KEEPALIVE_DEAD_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub reopen_backoff_base_secs: u64,
    pub reopen_backoff_max_secs: u64,
    pub pre_open_buffer_cap_bytes: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            reopen_backoff_base_secs: defaults::REOPEN_BACKOFF_BASE_SECS,
            reopen_backoff_max_secs: defaults::REOPEN_BACKOFF_MAX_SECS,
            pre_open_buffer_cap_bytes: defaults::PRE_OPEN_BUFFER_CAP_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub listen_addr: String,
    pub auth_token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3501".to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub hop: HopConfig,
    pub engine: EngineConfig,
    pub source: SourceConfig,
    pub remote: RemoteConfig,
}

impl DatasourceConfig {
    /// Load per the documented precedence: `CAPTRACE_CONFIG` env var path,
    /// then `./datasource.toml`, then built-in defaults.
    pub fn load() -> Self {
        let path = std::env::var("CAPTRACE_CONFIG").unwrap_or_else(|_| "datasource.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "loaded datasource config");
                    cfg
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("no config file found, using built-in defaults");
                Self::default()
            }
        }
    }
}

static CONFIG: OnceLock<DatasourceConfig> = OnceLock::new();

/// Initialize the global config. Must be called exactly once before any
/// call to `get()`.
pub fn init(config: DatasourceConfig) {
    if CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global config.
///
/// Panics if `init()` has not been called — a missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static DatasourceConfig {
    CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = DatasourceConfig::default();
        assert_eq!(cfg.hop.max_tick_hz, 100.0);
        assert_eq!(cfg.engine.command_timeout_secs, 30);
        assert_eq!(cfg.source.reopen_backoff_max_secs, 30);
    }
}
