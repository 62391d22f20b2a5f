//! # Transaction Pipeline
//!
//! Turns a [`SendRequest`] into a broadcast transaction and follows it to
//! finality.
//!
//! ```text
//! send ─▶ validate ─▶ balance / gas price / estimate ─▶ affordability
//!      ─▶ nonce ─▶ sign ─▶ broadcast ─▶ record Pending ─▶ spawn watcher
//!
//! watcher ─▶ Confirmed | Failed ─▶ history update ─▶ observers + broadcast
//!         ─▶ TimedOut          ─▶ record stays Pending (see resume_watch)
//! ```
//!
//! Nothing is submitted unless `value + gas_limit * gas_price` fits the
//! balance read at the start of the send. Locking the card does not cancel
//! watchers; [`TransactionPipeline::shutdown`] does.

pub mod gas;
pub mod history;
pub mod watcher;

pub use gas::{estimate_gas, GasPolicy};
pub use history::TransactionHistory;
pub use watcher::{watch_receipt, WatchOutcome};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::Address;
use crate::config::{
    WalletConfig, EVENT_CHANNEL_CAPACITY, MAX_RECEIPT_POLL_ATTEMPTS, RECEIPT_POLL_INTERVAL,
};
use crate::crypto::SigningAccount;
use crate::error::WalletError;
use crate::ledger::LedgerClient;
use crate::transaction::{
    format_ether, CallRequest, LegacyTransaction, SendRequest, TransactionRecord,
    TransactionStatus, TxHash,
};

/// Told about every record creation and status change.
#[async_trait]
pub trait TransactionObserver: Send + Sync {
    async fn on_transaction_update(&self, record: &TransactionRecord);
}

/// Gas sizing and confirmation budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub gas: GasPolicy,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            gas: GasPolicy::default(),
            poll_interval: RECEIPT_POLL_INTERVAL,
            max_poll_attempts: MAX_RECEIPT_POLL_ATTEMPTS,
        }
    }
}

impl From<&WalletConfig> for PipelineSettings {
    fn from(config: &WalletConfig) -> Self {
        Self {
            gas: config.gas.clone(),
            poll_interval: config.receipt_poll_interval(),
            max_poll_attempts: config.max_receipt_poll_attempts,
        }
    }
}

struct PipelineInner {
    ledger: Arc<dyn LedgerClient>,
    settings: PipelineSettings,
    history: TransactionHistory,
    watchers: Mutex<HashMap<TxHash, JoinHandle<()>>>,
    observers: RwLock<Vec<Arc<dyn TransactionObserver>>>,
    events: broadcast::Sender<TransactionRecord>,
}

/// Submission and confirmation tracking. Clones share state.
#[derive(Clone)]
pub struct TransactionPipeline {
    inner: Arc<PipelineInner>,
}

impl TransactionPipeline {
    pub fn new(ledger: Arc<dyn LedgerClient>, settings: PipelineSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(PipelineInner {
                ledger,
                settings,
                history: TransactionHistory::new(),
                watchers: Mutex::new(HashMap::new()),
                observers: RwLock::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    pub fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Every record creation and status change, for external subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<TransactionRecord> {
        self.inner.events.subscribe()
    }

    /// Newest first.
    pub fn history(&self, address: Address) -> Vec<TransactionRecord> {
        self.inner.history.for_address(address)
    }

    pub fn record(&self, hash: TxHash) -> Option<TransactionRecord> {
        self.inner.history.find(hash)
    }

    /// Signs and broadcasts `request` from `account`, records it as pending
    /// and starts watching for its receipt.
    ///
    /// Fails before any broadcast when there is no account, the request is
    /// malformed, or value plus fee exceeds the balance.
    pub async fn send(
        &self,
        request: &SendRequest,
        account: Option<&SigningAccount>,
    ) -> Result<TxHash, WalletError> {
        self.send_authorized(request, account, &|| true).await
    }

    /// Like [`send`](Self::send), but asks `authorized` once more right
    /// before signing. If it says no, nothing is broadcast and the send
    /// fails with [`WalletError::WalletNotUnlocked`].
    pub async fn send_authorized(
        &self,
        request: &SendRequest,
        account: Option<&SigningAccount>,
        authorized: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<TxHash, WalletError> {
        let account = account.ok_or(WalletError::WalletNotUnlocked)?;
        let to: Address = request
            .to
            .parse()
            .map_err(|_| WalletError::InvalidAddress(request.to.clone()))?;
        if request.value_wei == 0 {
            return Err(WalletError::InvalidAmount("value must be positive".into()));
        }
        let from = account.address();
        let ledger = &*self.inner.ledger;

        let balance = ledger.get_balance(from).await?;
        let gas_price = ledger.gas_price().await?;
        let gas_limit = match request.gas_limit {
            Some(limit) => limit,
            None => {
                let call = CallRequest {
                    from,
                    to,
                    value_wei: request.value_wei,
                    data: request.data.clone(),
                };
                estimate_gas(ledger, &call, &self.inner.settings.gas).await
            }
        };

        let required = u128::from(gas_limit)
            .checked_mul(gas_price)
            .and_then(|fee| fee.checked_add(request.value_wei))
            .ok_or_else(|| WalletError::InvalidAmount("value plus fee overflows".into()))?;
        if required > balance {
            info!(%from, required = %required, available = %balance, "send refused, insufficient balance");
            return Err(WalletError::InsufficientBalance {
                required,
                available: balance,
            });
        }

        let nonce = ledger.transaction_count(from).await?;
        if !authorized() {
            info!(%from, "send abandoned, signing account was revoked");
            return Err(WalletError::WalletNotUnlocked);
        }
        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to,
            value: request.value_wei,
            data: request.data.clone(),
        };
        let signed = account.sign_transaction(&tx)?;
        let hash = ledger.send_raw_transaction(&signed.raw).await?;
        if hash != signed.hash {
            warn!(local = %signed.hash, node = %hash, "node reported a different transaction hash");
        }
        info!(%hash, %from, %to, nonce, gas_limit, "transaction broadcast");

        let record = TransactionRecord::pending(hash, from, to, format_ether(request.value_wei));
        self.inner.history.insert(record.clone());
        self.notify(&record).await;
        self.spawn_watcher(from, hash);
        Ok(hash)
    }

    /// Starts a watcher for a record left pending by an exhausted budget.
    /// Returns `false` if the record is unknown, terminal, or already watched.
    pub fn resume_watch(&self, hash: TxHash) -> bool {
        match self.inner.history.find(hash) {
            Some(record) if record.status == TransactionStatus::Pending => {
                self.spawn_watcher(record.from, hash)
            }
            _ => false,
        }
    }

    pub fn is_watching(&self, hash: TxHash) -> bool {
        self.inner
            .watchers
            .lock()
            .get(&hash)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Aborts every watcher. Records stay as they are.
    pub fn shutdown(&self) {
        let watchers: Vec<_> = self.inner.watchers.lock().drain().collect();
        for (hash, handle) in &watchers {
            if !handle.is_finished() {
                debug!(%hash, "aborting receipt watcher");
            }
            handle.abort();
        }
        info!(count = watchers.len(), "transaction pipeline shut down");
    }

    fn spawn_watcher(&self, from: Address, hash: TxHash) -> bool {
        let mut watchers = self.inner.watchers.lock();
        watchers.retain(|_, handle| !handle.is_finished());
        if watchers.contains_key(&hash) {
            return false;
        }
        let pipeline = self.clone();
        let handle = tokio::spawn(async move {
            pipeline.run_watcher(from, hash).await;
        });
        watchers.insert(hash, handle);
        true
    }

    async fn run_watcher(&self, from: Address, hash: TxHash) -> WatchOutcome {
        let settings = &self.inner.settings;
        let outcome = watch_receipt(
            &*self.inner.ledger,
            hash,
            settings.poll_interval,
            settings.max_poll_attempts,
        )
        .await;

        let status = match outcome {
            WatchOutcome::Confirmed => TransactionStatus::Confirmed,
            WatchOutcome::Failed => TransactionStatus::Failed,
            WatchOutcome::TimedOut => {
                warn!(%hash, attempts = settings.max_poll_attempts, "no receipt, leaving transaction pending");
                return outcome;
            }
        };
        if let Some(record) = self
            .inner
            .history
            .update_status(from, hash, status, Utc::now())
        {
            info!(%hash, %status, "transaction final");
            self.notify(&record).await;
        }
        outcome
    }

    async fn notify(&self, record: &TransactionRecord) {
        let observers = self.inner.observers.read().clone();
        for observer in observers {
            observer.on_transaction_update(record).await;
        }
        let _ = self.inner.events.send(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::ledger::{LedgerError, LedgerMethod, MockLedger, ReceiptScript};
    use crate::transaction::parse_ether;

    const TICK: Duration = Duration::from_secs(3);

    #[derive(Default)]
    struct Recorder(Mutex<Vec<TransactionRecord>>);

    #[async_trait]
    impl TransactionObserver for Recorder {
        async fn on_transaction_update(&self, record: &TransactionRecord) {
            self.0.lock().push(record.clone());
        }
    }

    fn account() -> SigningAccount {
        SigningAccount::from_secret(&SecretKey::from_bytes([0x46; 32]), 1).unwrap()
    }

    fn recipient() -> String {
        "0x3535353535353535353535353535353535353535".into()
    }

    fn pipeline(max_attempts: u32) -> (TransactionPipeline, Arc<MockLedger>) {
        let ledger = Arc::new(MockLedger::new());
        let settings = PipelineSettings {
            poll_interval: TICK,
            max_poll_attempts: max_attempts,
            ..PipelineSettings::default()
        };
        (TransactionPipeline::new(ledger.clone(), settings), ledger)
    }

    fn funded(ledger: &MockLedger) {
        ledger.set_balance(account().address(), parse_ether("1").unwrap());
    }

    #[tokio::test]
    async fn no_account_is_rejected_before_the_network() {
        let (pipeline, ledger) = pipeline(5);
        let request = SendRequest::transfer(recipient(), 1);
        assert_eq!(
            pipeline.send(&request, None).await.unwrap_err(),
            WalletError::WalletNotUnlocked
        );
        assert_eq!(ledger.calls(LedgerMethod::Balance), 0);
    }

    #[tokio::test]
    async fn revoked_authorization_broadcasts_nothing() {
        let (pipeline, ledger) = pipeline(5);
        funded(&ledger);
        let acct = account();
        let request = SendRequest::transfer(recipient(), 1);

        let err = pipeline
            .send_authorized(&request, Some(&acct), &|| false)
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::WalletNotUnlocked);
        assert_eq!(ledger.calls(LedgerMethod::SendRaw), 0);
        assert!(pipeline.history(acct.address()).is_empty());
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let (pipeline, _) = pipeline(5);
        let acct = account();
        let bad_to = SendRequest::transfer("0x1234", 1);
        assert!(matches!(
            pipeline.send(&bad_to, Some(&acct)).await,
            Err(WalletError::InvalidAddress(_))
        ));
        let zero = SendRequest::transfer(recipient(), 0);
        assert!(matches!(
            pipeline.send(&zero, Some(&acct)).await,
            Err(WalletError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn insufficient_balance_submits_nothing() {
        let (pipeline, ledger) = pipeline(5);
        let acct = account();
        let value = parse_ether("1").unwrap();
        ledger.set_balance(acct.address(), value);

        // 1 ether plus any fee is more than 1 ether.
        let err = pipeline
            .send(&SendRequest::transfer(recipient(), value), Some(&acct))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientBalance {
                required: value + 25_200 * 1_000_000_000,
                available: value,
            }
        );
        assert_eq!(ledger.calls(LedgerMethod::TransactionCount), 0);
        assert_eq!(ledger.calls(LedgerMethod::SendRaw), 0);
        assert!(pipeline.history(acct.address()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_records_pending_then_confirms() {
        let (pipeline, ledger) = pipeline(5);
        let recorder = Arc::new(Recorder::default());
        pipeline.add_observer(recorder.clone());
        let mut events = pipeline.subscribe();
        funded(&ledger);
        ledger.set_nonce(account().address(), 4);
        ledger.set_receipt_script(ReceiptScript::Mined {
            success: true,
            after_polls: 1,
        });

        let acct = account();
        let value = parse_ether("0.1").unwrap();
        let hash = pipeline
            .send(&SendRequest::transfer(recipient(), value), Some(&acct))
            .await
            .unwrap();

        let sent = ledger.sent_transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(hash, TxHash::from_bytes(crate::crypto::keccak256(&sent[0])));

        let history = pipeline.history(acct.address());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TransactionStatus::Pending);
        assert_eq!(history[0].value, "0.1");
        assert!(pipeline.is_watching(hash));

        tokio::time::sleep(TICK * 3).await;

        let record = pipeline.record(hash).unwrap();
        assert_eq!(record.status, TransactionStatus::Confirmed);
        assert!(record.confirmed_at.is_some());
        assert!(!pipeline.is_watching(hash));

        let seen: Vec<_> = recorder.0.lock().iter().map(|r| r.status).collect();
        assert_eq!(seen, [TransactionStatus::Pending, TransactionStatus::Confirmed]);
        assert_eq!(events.recv().await.unwrap().status, TransactionStatus::Pending);
        assert_eq!(events.recv().await.unwrap().status, TransactionStatus::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_transaction_is_failed() {
        let (pipeline, ledger) = pipeline(5);
        funded(&ledger);
        ledger.set_receipt_script(ReceiptScript::Mined {
            success: false,
            after_polls: 0,
        });
        let hash = pipeline
            .send(&SendRequest::transfer(recipient(), 1), Some(&account()))
            .await
            .unwrap();
        tokio::time::sleep(TICK * 2).await;
        let record = pipeline.record(hash).unwrap();
        assert_eq!(record.status, TransactionStatus::Failed);
        assert!(record.confirmed_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_stays_pending_and_can_resume() {
        let (pipeline, ledger) = pipeline(3);
        funded(&ledger);
        ledger.set_receipt_script(ReceiptScript::Never);
        let hash = pipeline
            .send(&SendRequest::transfer(recipient(), 1), Some(&account()))
            .await
            .unwrap();

        tokio::time::sleep(TICK * 5).await;
        assert_eq!(ledger.calls(LedgerMethod::Receipt), 3);
        assert_eq!(pipeline.record(hash).unwrap().status, TransactionStatus::Pending);
        assert!(!pipeline.is_watching(hash));

        ledger.set_receipt_script(ReceiptScript::Mined {
            success: true,
            after_polls: 0,
        });
        assert!(pipeline.resume_watch(hash));
        assert!(!pipeline.resume_watch(hash));
        tokio::time::sleep(TICK * 2).await;
        assert_eq!(pipeline.record(hash).unwrap().status, TransactionStatus::Confirmed);
        assert!(!pipeline.resume_watch(hash));
    }

    #[tokio::test]
    async fn explicit_gas_limit_skips_estimation() {
        let (pipeline, ledger) = pipeline(5);
        funded(&ledger);
        let request = SendRequest {
            gas_limit: Some(60_000),
            ..SendRequest::transfer(recipient(), 1)
        };
        pipeline.send(&request, Some(&account())).await.unwrap();
        assert_eq!(ledger.calls(LedgerMethod::EstimateGas), 0);
        pipeline.shutdown();
    }

    #[tokio::test]
    async fn broadcast_failure_leaves_no_record() {
        let (pipeline, ledger) = pipeline(5);
        funded(&ledger);
        ledger.set_send_error(Some(LedgerError::Rpc {
            code: -32000,
            message: "nonce too low".into(),
        }));
        let acct = account();
        let err = pipeline
            .send(&SendRequest::transfer(recipient(), 1), Some(&acct))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Network(_)));
        assert!(pipeline.history(acct.address()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_watchers() {
        let (pipeline, ledger) = pipeline(100);
        funded(&ledger);
        ledger.set_receipt_script(ReceiptScript::Never);
        let hash = pipeline
            .send(&SendRequest::transfer(recipient(), 1), Some(&account()))
            .await
            .unwrap();
        assert!(pipeline.is_watching(hash));
        pipeline.shutdown();
        assert!(!pipeline.is_watching(hash));

        let polls = ledger.calls(LedgerMethod::Receipt);
        tokio::time::sleep(TICK * 10).await;
        assert_eq!(ledger.calls(LedgerMethod::Receipt), polls);
    }
}
