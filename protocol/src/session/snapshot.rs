//! Redacted session persistence.
//!
//! A snapshot holds the card's ciphertext form and the cached balance,
//! never the decrypted key, and always claims to be locked:
//!
//! ```json
//! {
//!   "currentCredential": { "id": 7, "address": "0x…", "encryptedKeyBase64": "AQAA…" },
//!   "cachedBalance": "1500000000000000000",
//!   "lastUpdated": 1760000000000,
//!   "isLocked": true
//! }
//! ```

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codec::credential::PersistedCredential;

/// Snapshot store failures. Callers log these and carry on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// The persisted form of a card session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub current_credential: Option<PersistedCredential>,
    /// Decimal wei.
    pub cached_balance: String,
    /// Epoch milliseconds of the last balance change.
    pub last_updated: Option<i64>,
    /// Always `true` on disk.
    pub is_locked: bool,
}

/// Where snapshots go.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;
    fn load(&self) -> Result<Option<SessionSnapshot>, StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// One JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "session snapshot saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<SessionSnapshot>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Keeps the serialized snapshot in memory. For tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    json: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored JSON text, exactly as it would hit disk.
    pub fn raw(&self) -> Option<String> {
        self.json.lock().clone()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        *self.json.lock() = Some(serde_json::to_string(snapshot)?);
        Ok(())
    }

    fn load(&self) -> Result<Option<SessionSnapshot>, StoreError> {
        match self.json.lock().as_deref() {
            Some(text) => Ok(Some(serde_json::from_str(text)?)),
            None => Ok(None),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.json.lock() = None;
        Ok(())
    }
}
