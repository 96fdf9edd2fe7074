pub mod approvals;
pub mod ledger;
pub mod registry;
pub mod txn;

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::config::BonusConfig;
use crate::vault::events::VaultEvent;

pub use ledger::Ledger;
pub use registry::{MAX_POSITIONS_PER_ACCOUNT, Registry};
pub use txn::Txn;

/// Everything the vault persists between calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub admin: Address,
    pub config: BonusConfig,
    pub registry: Registry,
    pub ledger: Ledger,
    pub approved_tokens: BTreeSet<Address>,
    #[serde(skip)]
    pub events: Vec<VaultEvent>,
}

impl Store {
    pub fn new(admin: Address, config: BonusConfig) -> Self {
        Self {
            admin,
            config,
            registry: Registry::default(),
            ledger: Ledger::default(),
            approved_tokens: BTreeSet::new(),
            events: Vec::new(),
        }
    }
}

/// Locks the store, recovering the data if a previous holder panicked.
/// Writes only land through `Txn::commit`, which cannot panic half-way.
pub(crate) fn lock_store(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    saved_at: u64,
    store: Store,
}

#[derive(Debug)]
pub enum SnapshotError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<std::io::Error> for SnapshotError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Save the store to a JSON file. The event log is not persisted.
pub fn save_snapshot(path: &Path, store: &Store) -> Result<(), SnapshotError> {
    let snapshot = SnapshotRef {
        saved_at: now_secs(),
        store,
    };
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &snapshot)?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Store, SnapshotError> {
    let file = std::fs::File::open(path)?;
    let snapshot: Snapshot = serde_json::from_reader(std::io::BufReader::new(file))?;
    tracing::debug!(
        saved_at = snapshot.saved_at,
        positions = snapshot.store.registry.len(),
        "loaded custody snapshot"
    );
    Ok(snapshot.store)
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    saved_at: u64,
    store: &'a Store,
}
