//! The card-in-hand state machine.
//!
//! ```text
//!            set_card              unlock(pin)
//!  NoCard ───────────▶ Locked ◀───────────────▶ Unlocked
//!     ▲                  │         lock()           │
//!     └──── clear() ─────┴──────────────────────────┘
//! ```
//!
//! The decrypted key lives only inside the `Unlocked` state and is lent out
//! by reference through [`CardSession::with_signing_key`]. It is never
//! persisted, cloned or logged; dropping it zeroizes it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::codec::{Address, CardCredential};
use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::crypto::{KeyCipher, SecretKey};
use crate::error::WalletError;
use crate::ledger::LedgerClient;
use crate::pipeline::TransactionObserver;
use crate::transaction::TransactionRecord;

use super::snapshot::{SessionSnapshot, SnapshotStore};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoCard,
    Locked,
    Unlocked,
}

/// Notifications for subscribers. Carry no secret material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEvent {
    CardSet { id: u64 },
    Unlocked { id: u64 },
    UnlockFailed,
    Locked,
    Cleared,
    BalanceChanged { wei: u128 },
}

/// Result of a [`CardSession::refresh_balance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New value stored and announced.
    Updated,
    /// Ledger agreed with the cache; nothing changed.
    Unchanged,
    /// Another refresh for this address is running. No call was made.
    InFlight,
    /// The ledger failed or the card changed meanwhile. Cache kept.
    Stale,
    /// No card, or its address cannot be resolved.
    Skipped,
}

/// Observable copy of the session. Never contains the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub credential: Option<CardCredential>,
    pub is_locked: bool,
    pub cached_balance: u128,
    pub last_updated: Option<DateTime<Utc>>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match (&self.credential, self.is_locked) {
            (None, _) => SessionPhase::NoCard,
            (Some(_), true) => SessionPhase::Locked,
            (Some(_), false) => SessionPhase::Unlocked,
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct DecryptedSession {
    signing_key: SecretKey,
    unlocked_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    credential: Option<CardCredential>,
    decrypted: Option<DecryptedSession>,
    cached_balance: u128,
    last_updated: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Bumped whenever the card is replaced or cleared.
    generation: u64,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            current_credential: self.credential.as_ref().map(CardCredential::to_persisted),
            cached_balance: self.cached_balance.to_string(),
            last_updated: self.last_updated.map(|t| t.timestamp_millis()),
            is_locked: true,
        }
    }
}

struct Shared {
    inner: RwLock<Inner>,
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn SnapshotStore>,
    cipher: KeyCipher,
    events: broadcast::Sender<CardEvent>,
    refreshing: Mutex<HashSet<Address>>,
}

/// Removes an address from the in-flight set when the refresh ends,
/// whichever way it ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Address>>,
    address: Address,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.address);
    }
}

// ---------------------------------------------------------------------------
// CardSession
// ---------------------------------------------------------------------------

/// Handle to the card session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CardSession {
    shared: Arc<Shared>,
}

impl CardSession {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn SnapshotStore>,
        cipher: KeyCipher,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                inner: RwLock::new(Inner::default()),
                ledger,
                store,
                cipher,
                events,
                refreshing: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Builds a session from the stored snapshot. Always starts locked.
    /// An unreadable snapshot is logged and treated as absent.
    pub fn restore(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn SnapshotStore>,
        cipher: KeyCipher,
    ) -> Self {
        let session = Self::new(ledger, store, cipher);
        let snapshot = match session.shared.store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "could not load session snapshot, starting empty");
                None
            }
        };
        let Some(snapshot) = snapshot else {
            return session;
        };

        let credential = snapshot
            .current_credential
            .as_ref()
            .and_then(|p| match CardCredential::from_persisted(p) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(error = %e, "stored credential is unreadable, dropping it");
                    None
                }
            });
        {
            let mut inner = session.shared.inner.write();
            inner.cached_balance = snapshot.cached_balance.parse().unwrap_or(0);
            inner.last_updated = snapshot
                .last_updated
                .and_then(DateTime::<Utc>::from_timestamp_millis);
            inner.credential = credential;
        }
        info!(
            has_card = session.phase() != SessionPhase::NoCard,
            "session restored, locked"
        );
        session
    }

    /// Replaces the card and forces the locked state. Kicks off a balance
    /// refresh in the background when a Tokio runtime is available.
    pub fn set_card(&self, credential: CardCredential) {
        let id = credential.id();
        {
            let mut inner = self.shared.inner.write();
            let same_address = inner
                .credential
                .as_ref()
                .map(|c| c.address() == credential.address())
                .unwrap_or(false);
            if !same_address {
                inner.cached_balance = 0;
                inner.last_updated = None;
            }
            inner.decrypted = None;
            inner.credential = Some(credential);
            inner.last_error = None;
            inner.generation += 1;
        }
        info!(card_id = id, "card set");
        self.persist();
        self.emit(CardEvent::CardSet { id });

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let session = self.clone();
                handle.spawn(async move {
                    session.refresh_balance().await;
                });
            }
            Err(_) => debug!("no async runtime, skipping initial balance refresh"),
        }
    }

    /// Decrypts the card key with `pin`. A no-op when already unlocked.
    ///
    /// On failure the session stays locked and the cipher's error kind is
    /// returned as-is. Nothing is retried.
    pub async fn unlock(&self, pin: &str) -> Result<(), WalletError> {
        let (blob, generation, id) = {
            let inner = self.shared.inner.read();
            let credential = inner.credential.as_ref().ok_or(WalletError::NoCard)?;
            if inner.decrypted.is_some() {
                return Ok(());
            }
            (
                credential.encrypted_key().to_vec(),
                inner.generation,
                credential.id(),
            )
        };

        let cipher = self.shared.cipher;
        let pin = Zeroizing::new(pin.to_owned());
        let result = tokio::task::spawn_blocking(move || cipher.decrypt(&blob, &pin))
            .await
            .map_err(|e| WalletError::Internal(format!("decrypt task failed: {e}")))?;

        let signing_key = match result {
            Ok(key) => key,
            Err(e) => {
                warn!(card_id = id, error = %e, "unlock failed");
                self.shared.inner.write().last_error = Some(e.to_string());
                self.emit(CardEvent::UnlockFailed);
                return Err(e.into());
            }
        };

        {
            let mut inner = self.shared.inner.write();
            if inner.generation != generation {
                warn!(card_id = id, "card replaced during unlock, discarding key");
                return Err(WalletError::CardChanged);
            }
            if inner.decrypted.is_some() {
                return Ok(());
            }
            inner.decrypted = Some(DecryptedSession {
                signing_key,
                unlocked_at: Utc::now(),
            });
            inner.last_error = None;
        }
        info!(card_id = id, "card unlocked");
        self.persist();
        self.emit(CardEvent::Unlocked { id });
        Ok(())
    }

    /// Drops the decrypted key. Idempotent; announces only a real transition.
    pub fn lock(&self) {
        let was_unlocked = self.shared.inner.write().decrypted.take().is_some();
        if was_unlocked {
            info!("card locked");
            self.persist();
            self.emit(CardEvent::Locked);
        }
    }

    /// Forgets the card entirely, including the persisted snapshot.
    pub fn clear(&self) {
        {
            let mut inner = self.shared.inner.write();
            let generation = inner.generation + 1;
            *inner = Inner {
                generation,
                ..Inner::default()
            };
        }
        if let Err(e) = self.shared.store.clear() {
            warn!(error = %e, "could not clear session snapshot");
        }
        info!("card cleared");
        self.emit(CardEvent::Cleared);
    }

    /// Lends the decrypted key to `f`.
    ///
    /// `f` runs under the session's read lock, so it must not call back
    /// into this session's mutating methods.
    pub fn with_signing_key<R>(&self, f: impl FnOnce(&SecretKey) -> R) -> Result<R, WalletError> {
        let inner = self.shared.inner.read();
        let decrypted = inner.decrypted.as_ref().ok_or(WalletError::WalletNotUnlocked)?;
        Ok(f(&decrypted.signing_key))
    }

    /// Fetches the balance for the current card's address.
    ///
    /// At most one refresh per address runs at a time; a concurrent call
    /// returns [`RefreshOutcome::InFlight`] without touching the ledger.
    pub async fn refresh_balance(&self) -> RefreshOutcome {
        let (address, generation) = {
            let inner = self.shared.inner.read();
            match inner.credential.as_ref().and_then(|c| c.address().address()) {
                Some(address) => (address, inner.generation),
                None => return RefreshOutcome::Skipped,
            }
        };

        if !self.shared.refreshing.lock().insert(address) {
            debug!(%address, "balance refresh already in flight");
            return RefreshOutcome::InFlight;
        }
        let _in_flight = InFlight {
            set: &self.shared.refreshing,
            address,
        };

        let wei = match self.shared.ledger.get_balance(address).await {
            Ok(wei) => wei,
            Err(e) => {
                warn!(%address, error = %e, "balance refresh failed, keeping cached value");
                return RefreshOutcome::Stale;
            }
        };

        {
            let mut inner = self.shared.inner.write();
            if inner.generation != generation {
                return RefreshOutcome::Stale;
            }
            if inner.cached_balance == wei {
                return RefreshOutcome::Unchanged;
            }
            inner.cached_balance = wei;
            inner.last_updated = Some(Utc::now());
        }
        debug!(%address, wei = %wei, "balance updated");
        self.persist();
        self.emit(CardEvent::BalanceChanged { wei });
        RefreshOutcome::Updated
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CardEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        let inner = self.shared.inner.read();
        SessionState {
            credential: inner.credential.clone(),
            is_locked: inner.decrypted.is_none(),
            cached_balance: inner.cached_balance,
            last_updated: inner.last_updated,
            unlocked_at: inner.decrypted.as_ref().map(|d| d.unlocked_at),
            last_error: inner.last_error.clone(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase()
    }

    pub fn is_locked(&self) -> bool {
        self.shared.inner.read().decrypted.is_none()
    }

    pub fn credential(&self) -> Option<CardCredential> {
        self.shared.inner.read().credential.clone()
    }

    /// Resolved address of the current card, if any.
    pub fn address(&self) -> Option<Address> {
        self.shared
            .inner
            .read()
            .credential
            .as_ref()
            .and_then(|c| c.address().address())
    }

    pub fn cached_balance(&self) -> u128 {
        self.shared.inner.read().cached_balance
    }

    fn persist(&self) {
        let snapshot = self.shared.inner.read().snapshot();
        if let Err(e) = self.shared.store.save(&snapshot) {
            warn!(error = %e, "could not persist session snapshot");
        }
    }

    fn emit(&self, event: CardEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }
}

#[async_trait]
impl TransactionObserver for CardSession {
    async fn on_transaction_update(&self, record: &TransactionRecord) {
        if record.status.is_terminal() && self.address() == Some(record.from) {
            self.refresh_balance().await;
        }
    }
}
