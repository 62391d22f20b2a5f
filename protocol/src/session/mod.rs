//! # Card Session
//!
//! Lock/unlock lifecycle of the card currently in hand, plus the redacted
//! snapshot that survives restarts.

pub mod snapshot;
pub mod state;

pub use snapshot::{JsonFileStore, MemoryStore, SessionSnapshot, SnapshotStore, StoreError};
pub use state::{CardEvent, CardSession, RefreshOutcome, SessionPhase, SessionState};
