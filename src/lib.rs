//! captrace: a Data Source Subsystem for packet-oriented capture sources.
//!
//! Datasources are either local capture helpers launched over IPC, or
//! remote helpers that dial in over TCP/WebSocket. Both speak the same
//! framed wire protocol (`wire`) over an abstract transport (`transport`),
//! driven by the external protocol engine (`engine`). A driver registry
//! (`drivers`) recognizes and builds sources from definition strings, the
//! tracker (`tracker`) owns the live set of sources, the hop scheduler
//! (`hop`) drives channel changes, and the packet chain (`packetchain`)
//! enriches and fans out captured reports. `api` and `remote` expose the
//! HTTP and remote-listener surfaces.

pub mod config;
pub mod drivers;
pub mod engine;
pub mod hop;
pub mod packetchain;
pub mod persistence;
pub mod rrd;
pub mod source;
pub mod tracker;
pub mod transport;
pub mod types;
pub mod wire;

pub mod api;
pub mod remote;

pub use config::DatasourceConfig;
pub use tracker::SourceTracker;
pub use types::{DriverCaps, LifecycleState, Source, SourceDefinition, SourceError};
