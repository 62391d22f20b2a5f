//! # Card Wallet
//!
//! The application context. Owns one of each component and wires them
//! together explicitly:
//!
//! ```text
//!              ┌──────────────┐  unlock → bind   ┌───────────────┐
//!  tag ──────▶ │ CardSession  │ ───────────────▶ │ SigningBridge │ ◀──▶ peers
//!              └──────┬───────┘  lock → unbind   └───────┬───────┘
//!                     │ observer                         │ submit
//!              ┌──────▼──────────────────────────────────▼───────┐
//!              │               TransactionPipeline                │ ──▶ ledger
//!              └──────────────────────────────────────────────────┘
//! ```
//!
//! Ordering is enforced here: a send unlocks (if a PIN is given), binds,
//! and only then submits. Locking unbinds the account and closes peer
//! sessions but leaves receipt watchers running.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bridge::{
    PeerEvent, PeerTransport, ProposalOutcome, SessionProposal, SessionRequest, SigningBridge,
};
use crate::catalogue::{CardCatalogue, CardMetadata, Quote};
use crate::codec::{self, Address, CardCredential};
use crate::config::WalletConfig;
use crate::crypto::redact::redact_bytes;
use crate::crypto::{KeyCipher, SecretKey, SigningAccount};
use crate::error::WalletError;
use crate::ledger::rpc::RpcResponse;
use crate::ledger::LedgerClient;
use crate::pipeline::{PipelineSettings, TransactionPipeline};
use crate::poller::{RefreshPoller, StartOutcome};
use crate::session::{CardEvent, CardSession, RefreshOutcome, SessionState, SnapshotStore};
use crate::tag::{payload_text, TagTransport};
use crate::transaction::{parse_ether, SendRequest, TransactionRecord, TxHash};

/// External collaborators a wallet is built from.
pub struct Collaborators {
    pub ledger: Arc<dyn LedgerClient>,
    pub store: Arc<dyn SnapshotStore>,
    pub transport: Arc<dyn PeerTransport>,
    pub tag: Arc<dyn TagTransport>,
    pub catalogue: Arc<dyn CardCatalogue>,
}

pub struct CardWallet {
    config: WalletConfig,
    cipher: KeyCipher,
    session: CardSession,
    bridge: SigningBridge,
    pipeline: TransactionPipeline,
    tag: Arc<dyn TagTransport>,
    catalogue: Arc<dyn CardCatalogue>,
    poller: RefreshPoller,
    metadata: RwLock<Option<CardMetadata>>,
    quote: Arc<RwLock<Option<Quote>>>,
}

impl CardWallet {
    /// Builds the wallet and restores the last session snapshot, locked.
    pub fn new(config: WalletConfig, parts: Collaborators) -> Self {
        let cipher = KeyCipher::new(config.kdf);
        let session = CardSession::restore(parts.ledger.clone(), parts.store, cipher);
        let bridge = SigningBridge::new(parts.transport, config.chain_id);
        let pipeline = TransactionPipeline::new(parts.ledger, PipelineSettings::from(&config));
        pipeline.add_observer(Arc::new(bridge.clone()));
        pipeline.add_observer(Arc::new(session.clone()));

        info!(chain_id = config.chain_id, "card wallet ready");
        Self {
            config,
            cipher,
            session,
            bridge,
            pipeline,
            tag: parts.tag,
            catalogue: parts.catalogue,
            poller: RefreshPoller::new(),
            metadata: RwLock::new(None),
            quote: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn session(&self) -> &CardSession {
        &self.session
    }

    pub fn bridge(&self) -> &SigningBridge {
        &self.bridge
    }

    pub fn pipeline(&self) -> &TransactionPipeline {
        &self.pipeline
    }

    // -----------------------------------------------------------------------
    // Card lifecycle
    // -----------------------------------------------------------------------

    /// Replaces the card. The wallet ends up locked with no bound account.
    pub async fn set_card(&self, credential: CardCredential) {
        self.session.set_card(credential);
        *self.metadata.write() = None;
        self.bridge.unbind_account().await;
    }

    /// Decrypts the card key and binds the signing account.
    pub async fn unlock(&self, pin: &str) -> Result<Address, WalletError> {
        self.session.unlock(pin).await?;
        let account = self
            .session
            .with_signing_key(|key| self.bridge.account_for(key))??;

        let expected = self.session.address();
        if expected.is_some() && expected != Some(account.address()) {
            warn!(
                card = ?expected,
                derived = %account.address(),
                "card address does not match its key"
            );
        }
        Ok(self.bridge.bind_account(account).await)
    }

    pub async fn lock(&self) {
        self.session.lock();
        self.bridge.unbind_account().await;
    }

    /// Forgets the card and closes every peer session.
    pub async fn clear(&self) {
        self.session.clear();
        *self.metadata.write() = None;
        self.bridge.disconnect().await;
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CardEvent> {
        self.session.subscribe()
    }

    // -----------------------------------------------------------------------
    // Transacting
    // -----------------------------------------------------------------------

    /// Sends `amount` ether to `to`, unlocking with `pin` first if the card
    /// is locked. A lock or disconnect before broadcast abandons the send.
    pub async fn send(&self, to: &str, amount: &str, pin: &str) -> Result<TxHash, WalletError> {
        let value_wei =
            parse_ether(amount).map_err(|e| WalletError::InvalidAmount(e.to_string()))?;
        if self.session.is_locked() {
            self.unlock(pin).await?;
        }
        let lease = self.bridge.lease().ok_or(WalletError::WalletNotUnlocked)?;
        self.pipeline
            .send_authorized(
                &SendRequest::transfer(to, value_wei),
                Some(lease.account()),
                &|| lease.is_current(),
            )
            .await
    }

    /// Newest first.
    pub fn history(&self, address: Address) -> Vec<TransactionRecord> {
        self.pipeline.history(address)
    }

    /// Refreshes the balance and tells peers when it changed.
    pub async fn refresh_balance(&self) -> RefreshOutcome {
        refresh_and_announce(&self.session, &self.bridge).await
    }

    // -----------------------------------------------------------------------
    // Credentials
    // -----------------------------------------------------------------------

    pub fn encode_card_url(&self, credential: &CardCredential) -> String {
        codec::encode_card_url(&self.config.card_base_url, credential)
    }

    pub fn decode_card_url(&self, url: &str) -> Result<CardCredential, WalletError> {
        Ok(codec::decode_card_url(url)?)
    }

    /// Seals `raw_key_hex` under `pin` into a new credential with `id`.
    /// The address is derived from the key.
    pub async fn provision(
        &self,
        raw_key_hex: &str,
        pin: &str,
        id: u64,
    ) -> Result<CardCredential, WalletError> {
        let key = SecretKey::from_hex(raw_key_hex)?;
        self.seal(key, pin, id).await
    }

    /// Like [`CardWallet::provision`] with a freshly generated key.
    pub async fn provision_generated(&self, pin: &str, id: u64) -> Result<CardCredential, WalletError> {
        self.seal(SecretKey::generate(), pin, id).await
    }

    async fn seal(&self, key: SecretKey, pin: &str, id: u64) -> Result<CardCredential, WalletError> {
        let address = SigningAccount::from_secret(&key, self.config.chain_id)?.address();
        let cipher = self.cipher;
        let pin = zeroize::Zeroizing::new(pin.to_owned());
        let blob = tokio::task::spawn_blocking(move || cipher.encrypt(&key.to_hex(), &pin))
            .await
            .map_err(|e| WalletError::Internal(format!("encrypt task failed: {e}")))??;

        let credential = CardCredential::builder()
            .id(id)
            .address(address)
            .encrypted_key(blob)
            .build()?;
        info!(card_id = id, %address, blob = %redact_bytes(credential.encrypted_key()), "card provisioned");
        Ok(credential)
    }

    // -----------------------------------------------------------------------
    // Tag
    // -----------------------------------------------------------------------

    /// Reads a tapped card and makes it current.
    pub async fn read_card(&self) -> Result<CardCredential, WalletError> {
        self.tag.availability().await.require()?;
        let bytes = self.tag.read().await?;
        let credential = codec::decode(&payload_text(&bytes)?)?;
        self.set_card(credential.clone()).await;
        self.refresh_card_metadata().await;
        Ok(credential)
    }

    /// Writes `credential`'s link to the tapped tag.
    pub async fn write_card(&self, credential: &CardCredential) -> Result<(), WalletError> {
        self.tag.availability().await.require()?;
        let url = self.encode_card_url(credential);
        self.tag.write(url.as_bytes()).await?;
        info!(card_id = credential.id(), "card written");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Catalogue
    // -----------------------------------------------------------------------

    /// Best-effort lookup of the current card's display data.
    pub async fn refresh_card_metadata(&self) -> Option<CardMetadata> {
        let id = self.session.credential()?.id();
        match self.catalogue.card_metadata(id).await {
            Ok(metadata) => {
                *self.metadata.write() = Some(metadata.clone());
                Some(metadata)
            }
            Err(e) => {
                warn!(card_id = id, error = %e, "card metadata unavailable");
                None
            }
        }
    }

    pub fn card_metadata(&self) -> Option<CardMetadata> {
        self.metadata.read().clone()
    }

    pub async fn refresh_quote(&self) -> Option<Quote> {
        refresh_quote(&*self.catalogue, &self.quote).await
    }

    pub fn quote(&self) -> Option<Quote> {
        self.quote.read().clone()
    }

    // -----------------------------------------------------------------------
    // Peers
    // -----------------------------------------------------------------------

    pub async fn handle_proposal(&self, proposal: &SessionProposal) -> Result<ProposalOutcome, WalletError> {
        self.bridge.handle_proposal(proposal).await
    }

    pub async fn handle_request(&self, request: &SessionRequest) -> RpcResponse {
        self.bridge.handle_request(request, &self.pipeline).await
    }

    /// Closes every peer session and locks, so the next send needs the PIN.
    pub async fn disconnect(&self) {
        self.session.lock();
        self.bridge.disconnect().await;
    }

    // -----------------------------------------------------------------------
    // Background work
    // -----------------------------------------------------------------------

    /// Starts the periodic balance and quote refresh. Refused while running.
    pub fn start_polling(&self) -> StartOutcome {
        let session = self.session.clone();
        let bridge = self.bridge.clone();
        let catalogue = self.catalogue.clone();
        let quote = self.quote.clone();
        self.poller.start(self.config.balance_refresh_interval(), move || {
            let session = session.clone();
            let bridge = bridge.clone();
            let catalogue = catalogue.clone();
            let quote = quote.clone();
            async move {
                refresh_and_announce(&session, &bridge).await;
                refresh_quote(&*catalogue, &quote).await;
            }
        })
    }

    pub fn stop_polling(&self) -> bool {
        self.poller.stop()
    }

    /// Stops every background task, closes peer sessions and locks.
    pub async fn shutdown(&self) {
        self.poller.stop();
        self.pipeline.shutdown();
        self.bridge.disconnect().await;
        self.session.lock();
        info!("card wallet shut down");
    }
}

async fn refresh_and_announce(session: &CardSession, bridge: &SigningBridge) -> RefreshOutcome {
    let outcome = session.refresh_balance().await;
    if outcome == RefreshOutcome::Updated {
        if let Some(address) = session.address() {
            bridge
                .emit(&PeerEvent::balance_changed(address, session.cached_balance()))
                .await;
        }
    }
    outcome
}

async fn refresh_quote(catalogue: &dyn CardCatalogue, slot: &RwLock<Option<Quote>>) -> Option<Quote> {
    match catalogue.quote().await {
        Ok(quote) => {
            debug!(currency = %quote.currency, price = quote.price, "quote refreshed");
            *slot.write() = Some(quote.clone());
            Some(quote)
        }
        Err(e) => {
            warn!(error = %e, "quote unavailable, keeping the previous one");
            None
        }
    }
}
