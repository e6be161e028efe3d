//! Virtual scan driver: a synthetic, always-available source used for
//! testing and demos. Backed by the `capture-sim` binary emitting framed
//! synthetic reports, never touching real hardware.

use async_trait::async_trait;

use super::{DriverBuilder, DriverError};
use crate::transport::ipc::IpcTransport;
use crate::transport::FrameTransport;
use crate::types::{DriverCaps, SourceDefinition};

#[derive(Default)]
pub struct VirtualScanDriver;

#[async_trait]
impl DriverBuilder for VirtualScanDriver {
    fn tag(&self) -> &'static str {
        "virtualscan"
    }

    fn caps(&self) -> DriverCaps {
        DriverCaps::PROBE | DriverCaps::LIST | DriverCaps::PASSIVE
    }

    fn recognizes(&self, definition: &SourceDefinition) -> bool {
        definition.interface.starts_with("scan")
    }

    async fn probe(&self, _definition: &SourceDefinition) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn list_interfaces(&self) -> Result<Vec<String>, DriverError> {
        Ok(vec!["scan0".to_string()])
    }

    async fn open(
        &self,
        definition: &SourceDefinition,
    ) -> Result<Box<dyn FrameTransport>, DriverError> {
        let args = vec!["--interface".to_string(), definition.interface.clone(), "--synthetic".to_string()];
        let transport = IpcTransport::spawn("capture-sim", &args)
            .await
            .map_err(|e| DriverError::LaunchFailed(self.tag().into(), e.to_string()))?;
        Ok(Box::new(transport))
    }
}
