//! Source tracker (C7): the single logical owner of every `Source` this
//! process knows about, whether locally opened or merged in from a
//! remote peer. All mutating operations are serialized through this
//! struct's own locking rather than split across callers, matching the
//! "one coordinator owns the state" shape used elsewhere in this crate.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::drivers::DriverRegistry;
use crate::hop::HopScheduler;
use crate::packetchain::PacketChain;
use crate::source::SourceRuntime;
use crate::types::{SourceDefinition, SourceError};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("no driver recognizes definition {0:?}")]
    NoDriver(SourceDefinition),
    #[error("source {0} not found")]
    NotFound(Uuid),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

/// CRUD + probe/list fan-out + remote-merge owner for every tracked source.
pub struct SourceTracker {
    sources: DashMap<Uuid, Arc<SourceRuntime>>,
    key_index: DashMap<u32, Uuid>,
    drivers: Arc<DriverRegistry>,
    hop: Arc<HopScheduler>,
    chain: Arc<dyn PacketChain>,
}

impl SourceTracker {
    pub fn new(drivers: Arc<DriverRegistry>, hop: Arc<HopScheduler>, chain: Arc<dyn PacketChain>) -> Self {
        Self {
            sources: DashMap::new(),
            key_index: DashMap::new(),
            drivers,
            hop,
            chain,
        }
    }

    /// Parse, resolve a driver, and register a new source in `Init`
    /// state (spec §7 "add" operation). Does not open it.
    pub async fn add(&self, raw_definition: &str) -> Result<Uuid, TrackerError> {
        let definition = SourceDefinition::parse(raw_definition)?;
        let driver = self
            .drivers
            .resolve(&definition)
            .ok_or_else(|| TrackerError::NoDriver(definition.clone()))?;

        let runtime = Arc::new(SourceRuntime::new(
            definition,
            Arc::from(clone_driver_ref(driver)),
            Arc::clone(&self.chain),
        ));
        let (uuid, key) = {
            let source = runtime.source.read().await;
            (source.uuid, source.key)
        };

        self.sources.insert(uuid, Arc::clone(&runtime));
        self.key_index.insert(key, uuid);
        info!(%uuid, key, "source registered");
        Ok(uuid)
    }

    pub fn get(&self, uuid: &Uuid) -> Option<Arc<SourceRuntime>> {
        self.sources.get(uuid).map(|e| Arc::clone(&e))
    }

    pub fn get_by_key(&self, key: u32) -> Option<Arc<SourceRuntime>> {
        let uuid = *self.key_index.get(&key)?;
        self.get(&uuid)
    }

    pub fn list(&self) -> Vec<Arc<SourceRuntime>> {
        self.sources.iter().map(|e| Arc::clone(&e)).collect()
    }

    /// Open a tracked source and, if it supports hopping, register it
    /// with the hop scheduler.
    pub async fn open(&self, uuid: &Uuid) -> Result<(), TrackerError> {
        let runtime = self.get(uuid).ok_or(TrackerError::NotFound(*uuid))?;
        runtime.open().await?;
        let hops = runtime.source.read().await.caps.contains(crate::types::DriverCaps::HOP);
        if hops {
            self.hop.register(*uuid, &runtime).await;
        }
        Ok(())
    }

    pub async fn close(&self, uuid: &Uuid) -> Result<(), TrackerError> {
        let runtime = self.get(uuid).ok_or(TrackerError::NotFound(*uuid))?;
        self.hop.unregister(uuid);
        runtime.close().await?;
        Ok(())
    }

    pub fn remove(&self, uuid: &Uuid) {
        if let Some((_, runtime)) = self.sources.remove(uuid) {
            self.hop.unregister(uuid);
            if let Some(key_entry) = self
                .key_index
                .iter()
                .find(|e| *e.value() == *uuid)
                .map(|e| *e.key())
            {
                self.key_index.remove(&key_entry);
            }
            drop(runtime);
        }
    }

    /// Fan out a probe across every registered driver for a definition
    /// that hasn't been added yet (spec §7 "probe" operation).
    pub async fn probe_definition(&self, raw_definition: &str) -> Result<bool, TrackerError> {
        let definition = SourceDefinition::parse(raw_definition)?;
        let driver = self
            .drivers
            .resolve(&definition)
            .ok_or_else(|| TrackerError::NoDriver(definition.clone()))?;
        driver
            .probe(&definition)
            .await
            .map_err(|e| TrackerError::Source(SourceError::HelperReported(e.to_string())))
    }

    /// Fan out `list_interfaces` to every registered driver (spec §7
    /// "list" operation).
    pub async fn list_interfaces(&self) -> Vec<(&'static str, Vec<String>)> {
        self.drivers.list_all_interfaces().await
    }

    /// Merge a set of sources reported by a remote peer (spec §7.4
    /// remote merge): sources not already tracked by uuid are adopted
    /// wholesale, already-tracked ones are left alone (the remote
    /// connection, not this merge step, owns reconciling live state).
    pub fn merge_remote(&self, remote_uuids: &[Uuid]) -> Vec<Uuid> {
        let mut adopted = Vec::new();
        for uuid in remote_uuids {
            if !self.sources.contains_key(uuid) {
                adopted.push(*uuid);
            }
        }
        if !adopted.is_empty() {
            warn!(count = adopted.len(), "remote sources pending local registration");
        }
        adopted
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// `DriverRegistry::resolve` hands back a borrowed trait object; the
/// tracker needs an owned handle to stash inside a `SourceRuntime`. Real
/// drivers are zero-sized/static-config, so this just re-resolves by tag
/// against a fresh `Arc`-wrapped instance rather than requiring
/// `DriverRegistry` to hand out `Arc`s for every lookup.
fn clone_driver_ref(driver: &dyn crate::drivers::DriverBuilder) -> Box<dyn crate::drivers::DriverBuilder> {
    match driver.tag() {
        "linuxwifi" => Box::new(crate::drivers::LocalWifiDriver),
        "virtualscan" => Box::new(crate::drivers::VirtualScanDriver),
        _ => Box::new(crate::drivers::GenericRemoteDriver),
    }
}
