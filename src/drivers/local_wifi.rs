//! Local Wi-Fi driver: spawns a capture helper against a named network
//! interface device present on this host.
//!
//! VIF (virtual interface) coordination across multiple sources sharing
//! one physical radio is out of scope here — it needs privileged,
//! OS-specific netlink calls with no safe cross-platform equivalent, and
//! the spec's Non-goals already exclude concrete phy dissection.

use async_trait::async_trait;

use super::{DriverBuilder, DriverError};
use crate::transport::ipc::IpcTransport;
use crate::transport::FrameTransport;
use crate::types::{DriverCaps, SourceDefinition};

/// Path to the capture helper binary launched for each opened interface.
/// Overridable via `CAPTRACE_WIFI_HELPER` for test harnesses.
fn helper_path() -> String {
    std::env::var("CAPTRACE_WIFI_HELPER").unwrap_or_else(|_| "capture-sim".to_string())
}

#[derive(Default)]
pub struct LocalWifiDriver;

#[async_trait]
impl DriverBuilder for LocalWifiDriver {
    fn tag(&self) -> &'static str {
        "linuxwifi"
    }

    fn caps(&self) -> DriverCaps {
        DriverCaps::PROBE | DriverCaps::LIST | DriverCaps::HOP | DriverCaps::RETUNE
    }

    fn recognizes(&self, definition: &SourceDefinition) -> bool {
        definition.interface.starts_with("wlan") || definition.interface.starts_with("wlp")
    }

    async fn probe(&self, definition: &SourceDefinition) -> Result<bool, DriverError> {
        let path = format!("/sys/class/net/{}/wireless", definition.interface);
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    async fn list_interfaces(&self) -> Result<Vec<String>, DriverError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir("/sys/class/net").await {
            Ok(entries) => entries,
            Err(_) => return Ok(out),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let wireless = entry.path().join("wireless");
            if tokio::fs::metadata(&wireless).await.is_ok() {
                out.push(name);
            }
        }
        Ok(out)
    }

    async fn open(
        &self,
        definition: &SourceDefinition,
    ) -> Result<Box<dyn FrameTransport>, DriverError> {
        let args = vec!["--interface".to_string(), definition.interface.clone()];
        let transport = IpcTransport::spawn(&helper_path(), &args)
            .await
            .map_err(|e| DriverError::LaunchFailed(self.tag().into(), e.to_string()))?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_wlan_interfaces() {
        let driver = LocalWifiDriver;
        let def = SourceDefinition::parse("wlan0").unwrap();
        assert!(driver.recognizes(&def));
        let def2 = SourceDefinition::parse("eth0").unwrap();
        assert!(!driver.recognizes(&def2));
    }

    #[test]
    fn advertises_hop_and_retune() {
        let driver = LocalWifiDriver;
        assert!(driver.caps().contains(DriverCaps::HOP));
        assert!(driver.caps().contains(DriverCaps::RETUNE));
    }
}
