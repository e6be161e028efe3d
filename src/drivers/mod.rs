//! Driver registry and builder trait (C3).
//!
//! A driver is a factory that knows how to turn a [`SourceDefinition`]
//! into a running transport, plus the capability flags it advertises
//! before a source is even opened. The registry resolves a definition's
//! `type=` option (or a best-effort probe across all registered drivers)
//! to the builder that should own it.

pub mod local_wifi;
pub mod remote_generic;
pub mod virtual_scan;

pub use local_wifi::LocalWifiDriver;
pub use remote_generic::GenericRemoteDriver;
pub use virtual_scan::VirtualScanDriver;

use async_trait::async_trait;
use thiserror::Error;

use crate::transport::FrameTransport;
use crate::types::{DriverCaps, SourceDefinition};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver {0} does not recognize this definition")]
    NotRecognized(String),
    #[error("driver {0} failed to probe: {1}")]
    ProbeFailed(String, String),
    #[error("driver {0} failed to launch: {1}")]
    LaunchFailed(String, String),
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

/// A factory for one driver family (spec §3 `DriverBuilder`). Implementors
/// are typically zero-sized or hold only static configuration; the actual
/// per-instance state lives in the `Source` the tracker builds around the
/// transport this returns.
#[async_trait]
pub trait DriverBuilder: Send + Sync {
    /// Stable identifier used in `type=` definitions and in `Source::driver_tag`.
    fn tag(&self) -> &'static str;

    /// Capability flags this driver advertises, independent of any
    /// particular interface.
    fn caps(&self) -> DriverCaps;

    /// Whether this driver recognizes `definition` as one it can open,
    /// without actually touching hardware.
    fn recognizes(&self, definition: &SourceDefinition) -> bool;

    /// Probe whether the interface in `definition` is actually present
    /// and openable right now.
    async fn probe(&self, definition: &SourceDefinition) -> Result<bool, DriverError>;

    /// List interfaces this driver could open, independent of any one
    /// definition (used by `SourceTracker::list_interfaces`).
    async fn list_interfaces(&self) -> Result<Vec<String>, DriverError>;

    /// Launch a capture helper (or equivalent) for `definition` and
    /// return a transport speaking the framed wire protocol to it.
    async fn open(
        &self,
        definition: &SourceDefinition,
    ) -> Result<Box<dyn FrameTransport>, DriverError>;
}

/// Registry of all drivers known to this process, resolved by tag or by
/// probing in registration order.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Box<dyn DriverBuilder>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self { drivers: Vec::new() }
    }

    pub fn register(&mut self, driver: Box<dyn DriverBuilder>) {
        self.drivers.push(driver);
    }

    /// Resolve a definition to a driver: explicit `type=` wins outright;
    /// otherwise the first driver that recognizes the definition's shape.
    pub fn resolve(&self, definition: &SourceDefinition) -> Option<&dyn DriverBuilder> {
        if let Some(wanted) = &definition.driver_type {
            return self
                .drivers
                .iter()
                .find(|d| d.tag() == wanted)
                .map(|d| d.as_ref());
        }
        self.drivers
            .iter()
            .find(|d| d.recognizes(definition))
            .map(|d| d.as_ref())
    }

    pub fn by_tag(&self, tag: &str) -> Option<&dyn DriverBuilder> {
        self.drivers.iter().find(|d| d.tag() == tag).map(|d| d.as_ref())
    }

    pub fn tags(&self) -> Vec<&'static str> {
        self.drivers.iter().map(|d| d.tag()).collect()
    }

    /// Fan out `list_interfaces` across every registered driver, per
    /// spec §4.3's global-list semantics, tolerating individual failures.
    pub async fn list_all_interfaces(&self) -> Vec<(&'static str, Vec<String>)> {
        let mut out = Vec::new();
        for driver in &self.drivers {
            match driver.list_interfaces().await {
                Ok(ifaces) => out.push((driver.tag(), ifaces)),
                Err(e) => {
                    tracing::warn!(driver = driver.tag(), error = %e, "driver failed to list interfaces");
                }
            }
        }
        out
    }

    /// Standard registry: local Wi-Fi, virtual scan (synthetic/testing),
    /// and generic remote passthrough.
    pub fn with_builtin_drivers() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(LocalWifiDriver::default()));
        reg.register(Box::new(VirtualScanDriver::default()));
        reg.register(Box::new(GenericRemoteDriver::default()));
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_by_explicit_type() {
        let reg = DriverRegistry::with_builtin_drivers();
        let def = SourceDefinition::parse("scan0:type=virtualscan").unwrap();
        let driver = reg.resolve(&def).expect("resolves virtualscan");
        assert_eq!(driver.tag(), "virtualscan");
    }

    #[test]
    fn resolves_by_recognition_when_untyped() {
        let reg = DriverRegistry::with_builtin_drivers();
        let def = SourceDefinition::parse("wlan0").unwrap();
        let driver = reg.resolve(&def);
        assert!(driver.is_some());
    }

    #[test]
    fn unknown_type_resolves_to_none() {
        let reg = DriverRegistry::with_builtin_drivers();
        let def = SourceDefinition::parse("foo0:type=nonexistent").unwrap();
        assert!(reg.resolve(&def).is_none());
    }
}
