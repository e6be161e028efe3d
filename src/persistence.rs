//! Durable storage for source definitions (spec §7): sources added via
//! config or the HTTP API survive a restart and are re-probed/reopened
//! on the next boot.
//!
//! Mirrors the fleet hub's history storage: a single global sled tree
//! behind a `OnceLock`, JSON-encoded values, a hand-rolled error enum
//! with manual `From` impls rather than pulling in another error crate
//! just for this module.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use uuid::Uuid;

use crate::types::SourceDefinition;

static DB: OnceLock<Arc<sled::Db>> = OnceLock::new();

const SOURCES_TREE: &str = "sources";

#[derive(Debug)]
pub enum PersistenceError {
    NotInitialized,
    Database(String),
    Serialization(String),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::NotInitialized => write!(f, "persistence layer not initialized"),
            PersistenceError::Database(msg) => write!(f, "database error: {msg}"),
            PersistenceError::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<sled::Error> for PersistenceError {
    fn from(err: sled::Error) -> Self {
        PersistenceError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

/// Open (or create) the sled database at `path` and install it as the
/// process-wide persistence handle. Idempotent after the first call
/// within a process; later calls are no-ops.
pub fn init<P: AsRef<Path>>(path: P) -> Result<(), PersistenceError> {
    if DB.get().is_some() {
        return Ok(());
    }
    let db = sled::open(path)?;
    let _ = DB.set(Arc::new(db));
    Ok(())
}

fn get_db() -> Result<&'static Arc<sled::Db>, PersistenceError> {
    DB.get().ok_or(PersistenceError::NotInitialized)
}

/// A source definition plus the bookkeeping needed to decide whether to
/// re-open it automatically at startup.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredSource {
    pub uuid: Uuid,
    pub definition: String,
    pub auto_open: bool,
}

/// Persist (insert or overwrite) a source's definition, keyed by UUID.
pub fn store_source(entry: &StoredSource) -> Result<(), PersistenceError> {
    let db = get_db()?;
    let tree = db.open_tree(SOURCES_TREE)?;
    let value = serde_json::to_vec(entry)?;
    tree.insert(entry.uuid.as_bytes(), value)?;
    Ok(())
}

/// Load every persisted source definition, in no particular order.
pub fn load_all_sources() -> Result<Vec<StoredSource>, PersistenceError> {
    let db = get_db()?;
    let tree = db.open_tree(SOURCES_TREE)?;
    let mut out = Vec::new();
    for item in tree.iter() {
        let (_key, value) = item?;
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}

/// Remove a persisted source definition; returns whether an entry existed.
pub fn remove_source(uuid: &Uuid) -> Result<bool, PersistenceError> {
    let db = get_db()?;
    let tree = db.open_tree(SOURCES_TREE)?;
    let existed = tree.remove(uuid.as_bytes())?.is_some();
    Ok(existed)
}

/// Convenience wrapper matching the shape callers already have on hand
/// after a successful `add_source`.
pub fn store_definition(uuid: Uuid, definition: &SourceDefinition, auto_open: bool) -> Result<(), PersistenceError> {
    store_source(&StoredSource {
        uuid,
        definition: definition.to_definition_string(),
        auto_open,
    })
}
