//! Generic remote driver: represents capture helpers that connect
//! *inbound* over TCP/WebSocket (C8) rather than being spawned by this
//! process. `open()` is never actually called for this driver — the
//! remote listener builds the `Source`/transport pair directly from an
//! accepted connection and registers it with the tracker — but it still
//! needs a slot in the registry so definitions with `type=remote` resolve
//! and advertise the right capability flags.

use async_trait::async_trait;

use super::{DriverBuilder, DriverError};
use crate::transport::FrameTransport;
use crate::types::{DriverCaps, SourceDefinition};

#[derive(Default)]
pub struct GenericRemoteDriver;

#[async_trait]
impl DriverBuilder for GenericRemoteDriver {
    fn tag(&self) -> &'static str {
        "remote"
    }

    fn caps(&self) -> DriverCaps {
        DriverCaps::REMOTE
    }

    fn recognizes(&self, definition: &SourceDefinition) -> bool {
        definition.driver_type.as_deref() == Some("remote")
    }

    async fn probe(&self, _definition: &SourceDefinition) -> Result<bool, DriverError> {
        Ok(false)
    }

    async fn list_interfaces(&self) -> Result<Vec<String>, DriverError> {
        Ok(Vec::new())
    }

    async fn open(
        &self,
        definition: &SourceDefinition,
    ) -> Result<Box<dyn FrameTransport>, DriverError> {
        Err(DriverError::LaunchFailed(
            self.tag().into(),
            format!(
                "remote sources are opened by the listener accepting a connection, not dialed out; got {}",
                definition.interface
            ),
        ))
    }
}
