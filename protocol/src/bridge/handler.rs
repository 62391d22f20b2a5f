//! The signing bridge.
//!
//! Holds at most one [`SigningAccount`] and the set of open peer sessions.
//! Proposals are approved only while an account is bound, and only for the
//! allow-listed methods and events. Requests are answered both to the
//! caller and to the peer.
//!
//! Event emission is best-effort: one unreachable peer never stops the
//! others from being notified, and never fails the operation that caused
//! the event.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::codec::Address;
use crate::crypto::{SecretKey, SigningAccount};
use crate::error::WalletError;
use crate::ledger::parse_quantity;
use crate::ledger::rpc::{RpcError, RpcResponse};
use crate::pipeline::{TransactionObserver, TransactionPipeline};
use crate::transaction::{SendRequest, TransactionRecord, TxHash};

use super::protocol::{
    caip_chain, ApprovedNamespace, PeerEvent, SessionProposal, SessionRequest, WalletSession,
    ETH_SEND_TRANSACTION, PERSONAL_SIGN, REQUEST_FAILED, SUPPORTED_METHODS, UNAUTHORIZED,
    UNSUPPORTED_CHAINS, UNSUPPORTED_METHOD, USER_DISCONNECTED, USER_REJECTED,
};
use super::transport::PeerTransport;

/// Whatever actually signs and broadcasts `eth_sendTransaction` requests.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Implementations must not broadcast once `lease` is no longer current.
    async fn submit(&self, request: SendRequest, lease: &SigningLease) -> Result<TxHash, WalletError>;
}

#[async_trait]
impl TransactionSubmitter for TransactionPipeline {
    async fn submit(&self, request: SendRequest, lease: &SigningLease) -> Result<TxHash, WalletError> {
        self.send_authorized(&request, Some(lease.account()), &|| lease.is_current())
            .await
    }
}

/// The bound account, tied to the binding it was taken under.
///
/// Locking out or disconnecting the bridge ends the binding. A lease taken
/// before that stops being current, even though it still holds the account.
#[derive(Clone)]
pub struct SigningLease {
    account: Arc<SigningAccount>,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl SigningLease {
    pub fn account(&self) -> &SigningAccount {
        &self.account
    }

    /// `false` once the bridge has been unbound or disconnected.
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.generation
    }
}

/// What happened to a session proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    Approved(WalletSession),
    Rejected { code: i64 },
}

/// Delivery tally for one [`SigningBridge::emit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub delivered: usize,
    pub failed: usize,
}

struct BridgeInner {
    transport: Arc<dyn PeerTransport>,
    chain_id: u64,
    account: RwLock<Option<Arc<SigningAccount>>>,
    /// Bumped on every lock-out; see [`SigningLease`].
    binding: Arc<AtomicU64>,
    sessions: DashMap<String, WalletSession>,
    emit_failures: AtomicU64,
}

/// Signing account plus peer sessions. Clones share state.
#[derive(Clone)]
pub struct SigningBridge {
    inner: Arc<BridgeInner>,
}

impl SigningBridge {
    pub fn new(transport: Arc<dyn PeerTransport>, chain_id: u64) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                transport,
                chain_id,
                account: RwLock::new(None),
                binding: Arc::new(AtomicU64::new(0)),
                sessions: DashMap::new(),
                emit_failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.chain_id
    }

    /// Derives the account for `key` on this bridge's chain. The key is
    /// only borrowed for the derivation.
    pub fn account_for(&self, key: &SecretKey) -> Result<SigningAccount, WalletError> {
        Ok(SigningAccount::from_secret(key, self.inner.chain_id)?)
    }

    /// Makes `account` the signing identity. If a different account was
    /// bound while sessions are open, peers receive `accountsChanged`.
    pub async fn bind_account(&self, account: SigningAccount) -> Address {
        let address = account.address();
        let previous = self
            .inner
            .account
            .write()
            .replace(Arc::new(account))
            .map(|a| a.address());
        info!(%address, chain_id = self.inner.chain_id, "signing account bound");

        let switched = previous.map(|p| p != address).unwrap_or(false);
        if switched && !self.inner.sessions.is_empty() {
            for mut session in self.inner.sessions.iter_mut() {
                session.accounts = BTreeSet::from([address]);
            }
            self.emit(&PeerEvent::accounts_changed(&[address])).await;
        }
        address
    }

    /// Lock-out: forgets the account and closes every session.
    pub async fn unbind_account(&self) {
        self.close_all("wallet locked").await;
    }

    /// Closes every session and forgets the account. Safe to repeat.
    pub async fn disconnect(&self) {
        self.close_all("user disconnected").await;
    }

    pub fn account(&self) -> Option<Address> {
        self.inner.account.read().as_ref().map(|a| a.address())
    }

    /// Shared handle to the bound account, for submitting on its behalf.
    pub fn signing_account(&self) -> Option<Arc<SigningAccount>> {
        self.inner.account.read().clone()
    }

    /// The bound account and its binding, for work that must stop at lock.
    pub fn lease(&self) -> Option<SigningLease> {
        let account = self.inner.account.read();
        account.as_ref().map(|account| SigningLease {
            account: account.clone(),
            generation: self.inner.binding.load(Ordering::Acquire),
            current: self.inner.binding.clone(),
        })
    }

    pub fn sessions(&self) -> Vec<WalletSession> {
        self.inner.sessions.iter().map(|s| s.value().clone()).collect()
    }

    /// Total per-peer emission failures since construction.
    pub fn emit_failures(&self) -> u64 {
        self.inner.emit_failures.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // Proposals
    // -----------------------------------------------------------------------

    /// Approves `proposal` for the bound account, or rejects it.
    ///
    /// Only a transport failure during approval is an error; rejections are
    /// outcomes.
    pub async fn handle_proposal(&self, proposal: &SessionProposal) -> Result<ProposalOutcome, WalletError> {
        let Some(account) = self.signing_account() else {
            info!(proposal_id = proposal.id, peer = %proposal.proposer.name, "proposal rejected, wallet locked");
            return Ok(self.reject(proposal, USER_REJECTED, "wallet is locked").await);
        };

        let chain = caip_chain(self.inner.chain_id);
        if !proposal.required_chains.is_empty() && !proposal.required_chains.contains(&chain) {
            info!(proposal_id = proposal.id, required = ?proposal.required_chains, "proposal rejected, unsupported chains");
            return Ok(self.reject(proposal, UNSUPPORTED_CHAINS, "unsupported chains").await);
        }

        let namespace = ApprovedNamespace::for_account(self.inner.chain_id, account.caip_account());
        let topic = self
            .inner
            .transport
            .approve(proposal, &namespace)
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;

        let session = WalletSession {
            topic: topic.clone(),
            peer: proposal.proposer.clone(),
            accounts: BTreeSet::from([account.address()]),
        };
        self.inner.sessions.insert(topic.clone(), session.clone());
        info!(%topic, peer = %proposal.proposer.name, "session approved");
        Ok(ProposalOutcome::Approved(session))
    }

    async fn reject(&self, proposal: &SessionProposal, code: i64, reason: &str) -> ProposalOutcome {
        if let Err(e) = self.inner.transport.reject(proposal.id, code, reason).await {
            warn!(proposal_id = proposal.id, error = %e, "could not deliver rejection");
        }
        ProposalOutcome::Rejected { code }
    }

    /// The peer closed `topic`.
    pub fn session_deleted(&self, topic: &str) {
        if self.inner.sessions.remove(topic).is_some() {
            info!(%topic, "session closed by peer");
        }
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Answers a peer request. The response is returned and also sent to
    /// the peer; a failed send is logged.
    pub async fn handle_request(
        &self,
        request: &SessionRequest,
        submitter: &dyn TransactionSubmitter,
    ) -> RpcResponse {
        let id = json!(request.id);
        let response = match self.dispatch(request, submitter).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => {
                debug!(topic = %request.topic, method = %request.method, code = error.code, "request refused");
                RpcResponse::error(id, error)
            }
        };
        if let Err(e) = self.inner.transport.respond(&request.topic, &response).await {
            warn!(topic = %request.topic, error = %e, "could not deliver response");
        }
        response
    }

    async fn dispatch(
        &self,
        request: &SessionRequest,
        submitter: &dyn TransactionSubmitter,
    ) -> Result<Value, RpcError> {
        if !SUPPORTED_METHODS.contains(&request.method.as_str()) {
            return Err(rpc_error(&WalletError::UnsupportedMethod(request.method.clone())));
        }
        let lease = self
            .lease()
            .ok_or_else(|| rpc_error(&WalletError::WalletNotUnlocked))?;
        let account = lease.account();
        if !self.inner.sessions.contains_key(&request.topic) {
            return Err(RpcError::invalid_request(format!("unknown session {}", request.topic)));
        }

        match request.method.as_str() {
            ETH_SEND_TRANSACTION => {
                let send = send_request(&request.params, account.address())?;
                let hash = submitter
                    .submit(send, &lease)
                    .await
                    .map_err(|e| rpc_error(&e))?;
                Ok(json!(hash.to_string()))
            }
            PERSONAL_SIGN => {
                let message = personal_sign_message(&request.params, account.address())?;
                let signature = account.sign_message(&message).map_err(|e| rpc_error(&e.into()))?;
                Ok(json!(signature.to_hex()))
            }
            other => Err(rpc_error(&WalletError::UnsupportedMethod(other.to_string()))),
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Sends `event` to every open session concurrently.
    pub async fn emit(&self, event: &PeerEvent) -> EmitReport {
        let topics: Vec<String> = self.inner.sessions.iter().map(|s| s.key().clone()).collect();
        let sends = topics
            .iter()
            .map(|topic| self.inner.transport.emit(topic, event));
        let results = join_all(sends).await;

        let mut report = EmitReport::default();
        for (topic, result) in topics.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(%topic, event = %event.name, error = %e, "event not delivered");
                    report.failed += 1;
                }
            }
        }
        self.inner
            .emit_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }

    async fn close_all(&self, reason: &str) {
        let had_account = {
            let mut account = self.inner.account.write();
            self.inner.binding.fetch_add(1, Ordering::AcqRel);
            account.take().is_some()
        };
        let topics: Vec<String> = self.inner.sessions.iter().map(|s| s.key().clone()).collect();
        for topic in &topics {
            self.inner.sessions.remove(topic);
        }

        let closes = topics
            .iter()
            .map(|topic| self.inner.transport.disconnect(topic, USER_DISCONNECTED, reason));
        for (topic, result) in topics.iter().zip(join_all(closes).await) {
            if let Err(e) = result {
                warn!(%topic, error = %e, "could not notify peer of disconnect");
            }
        }
        if had_account || !topics.is_empty() {
            info!(sessions = topics.len(), reason, "bridge closed");
        }
    }
}

#[async_trait]
impl TransactionObserver for SigningBridge {
    async fn on_transaction_update(&self, record: &TransactionRecord) {
        self.emit(&PeerEvent::transaction_updated(record)).await;
    }
}

// ---------------------------------------------------------------------------
// Request parameters
// ---------------------------------------------------------------------------

/// Maps a wallet failure to what a peer is allowed to see.
fn rpc_error(e: &WalletError) -> RpcError {
    match e {
        WalletError::UnsupportedMethod(_) => RpcError::new(UNSUPPORTED_METHOD, e.to_string()),
        WalletError::WalletNotUnlocked | WalletError::NoCard => RpcError::new(UNAUTHORIZED, e.to_string()),
        WalletError::InvalidAddress(_) | WalletError::InvalidAmount(_) | WalletError::InvalidRequest(_) => {
            RpcError::invalid_params(e.to_string())
        }
        WalletError::Internal(_) | WalletError::EncryptionVerificationFailed => {
            RpcError::internal_error("internal error")
        }
        _ => RpcError::new(REQUEST_FAILED, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct TransactionParams {
    from: Option<String>,
    to: Option<String>,
    value: Option<String>,
    gas: Option<String>,
    data: Option<String>,
}

fn send_request(params: &Value, account: Address) -> Result<SendRequest, RpcError> {
    let object = params
        .get(0)
        .cloned()
        .ok_or_else(|| RpcError::invalid_params("missing transaction object"))?;
    let tx: TransactionParams =
        serde_json::from_value(object).map_err(|e| RpcError::invalid_params(e.to_string()))?;

    if let Some(from) = &tx.from {
        let from: Address = from
            .parse()
            .map_err(|_| RpcError::invalid_params("invalid from address"))?;
        if from != account {
            return Err(RpcError::invalid_params("from does not match the wallet account"));
        }
    }
    let to = tx.to.ok_or_else(|| RpcError::invalid_params("missing to"))?;
    let value_wei = match &tx.value {
        Some(v) => parse_quantity(v).map_err(|_| RpcError::invalid_params("invalid value"))?,
        None => 0,
    };
    let gas_limit = tx
        .gas
        .as_deref()
        .map(|g| {
            parse_quantity(g)
                .ok()
                .and_then(|g| u64::try_from(g).ok())
                .ok_or_else(|| RpcError::invalid_params("invalid gas"))
        })
        .transpose()?;
    let data = match tx.data.as_deref() {
        Some(d) => decode_hex(d).ok_or_else(|| RpcError::invalid_params("invalid data"))?,
        None => Vec::new(),
    };

    Ok(SendRequest {
        to,
        value_wei,
        gas_limit,
        data,
    })
}

/// `personal_sign` takes `[message, address]`; some peers swap the two.
fn personal_sign_message(params: &Value, account: Address) -> Result<Vec<u8>, RpcError> {
    let a = params.get(0).and_then(Value::as_str);
    let b = params.get(1).and_then(Value::as_str);
    let (Some(a), Some(b)) = (a, b) else {
        return Err(RpcError::invalid_params("expected [message, address]"));
    };
    let is_account = |s: &str| s.parse::<Address>().map(|x| x == account).unwrap_or(false);
    let message = if is_account(b) {
        a
    } else if is_account(a) {
        b
    } else {
        return Err(RpcError::invalid_params("address does not match the wallet account"));
    };
    Ok(decode_hex(message).unwrap_or_else(|| message.as_bytes().to_vec()))
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let digits = text.strip_prefix("0x")?;
    hex::decode(digits).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::PeerMetadata;
    use crate::bridge::transport::{MemoryTransport, Outbound};
    use crate::crypto::{personal_message_hash, recover_address, RecoverableSignature};
    use crate::ledger::{LedgerMethod, MockLedger};
    use crate::pipeline::PipelineSettings;
    use crate::transaction::parse_ether;

    fn key() -> SecretKey {
        SecretKey::from_bytes([0x46; 32])
    }

    fn setup() -> (SigningBridge, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        (SigningBridge::new(transport.clone(), 1), transport)
    }

    async fn bound() -> (SigningBridge, Arc<MemoryTransport>) {
        let (bridge, transport) = setup();
        let account = bridge.account_for(&key()).unwrap();
        bridge.bind_account(account).await;
        (bridge, transport)
    }

    fn proposal(id: u64) -> SessionProposal {
        SessionProposal {
            id,
            proposer: PeerMetadata {
                name: "dapp".into(),
                ..PeerMetadata::default()
            },
            required_chains: vec!["eip155:1".into()],
            required_methods: vec!["eth_sendTransaction".into(), "eth_signTypedData_v4".into()],
            required_events: Vec::new(),
        }
    }

    fn request(topic: &str, method: &str, params: Value) -> SessionRequest {
        SessionRequest {
            topic: topic.into(),
            id: 1,
            chain_id: Some("eip155:1".into()),
            method: method.into(),
            params,
        }
    }

    async fn open_session(bridge: &SigningBridge) -> String {
        match bridge.handle_proposal(&proposal(1)).await.unwrap() {
            ProposalOutcome::Approved(session) => session.topic,
            other => panic!("expected approval, got {other:?}"),
        }
    }

    fn pipeline() -> (TransactionPipeline, Arc<MockLedger>) {
        let ledger = Arc::new(MockLedger::new());
        (TransactionPipeline::new(ledger.clone(), PipelineSettings::default()), ledger)
    }

    #[tokio::test]
    async fn proposal_rejected_while_locked() {
        let (bridge, transport) = setup();
        let outcome = bridge.handle_proposal(&proposal(3)).await.unwrap();
        assert_eq!(outcome, ProposalOutcome::Rejected { code: USER_REJECTED });
        assert!(bridge.sessions().is_empty());
        assert_eq!(
            transport.sent(),
            [Outbound::Rejected {
                proposal_id: 3,
                code: 5000
            }]
        );
    }

    #[tokio::test]
    async fn approval_exposes_one_account_and_the_allow_list() {
        let (bridge, transport) = bound().await;
        let topic = open_session(&bridge).await;

        let sent = transport.sent();
        let Outbound::Approved { namespace, .. } = &sent[0] else {
            panic!("expected approval");
        };
        let address = bridge.account().unwrap();
        assert_eq!(namespace.accounts, [format!("eip155:1:{address}")]);
        assert_eq!(namespace.methods, ["eth_sendTransaction", "personal_sign"]);
        assert!(!namespace.methods.iter().any(|m| m == "eth_signTypedData_v4"));
        assert_eq!(bridge.sessions()[0].topic, topic);
    }

    #[tokio::test]
    async fn foreign_chain_proposal_is_rejected() {
        let (bridge, _) = bound().await;
        let mut p = proposal(4);
        p.required_chains = vec!["eip155:137".into()];
        assert_eq!(
            bridge.handle_proposal(&p).await.unwrap(),
            ProposalOutcome::Rejected {
                code: UNSUPPORTED_CHAINS
            }
        );
    }

    #[tokio::test]
    async fn unsupported_method_leaves_account_alone() {
        let (bridge, transport) = bound().await;
        let topic = open_session(&bridge).await;
        let before = bridge.account();
        let (pipeline, _) = pipeline();

        let response = bridge
            .handle_request(&request(&topic, "eth_foo", json!([])), &pipeline)
            .await;
        assert_eq!(response.error.as_ref().unwrap().code, UNSUPPORTED_METHOD);
        assert_eq!(bridge.account(), before);
        assert!(transport
            .sent()
            .iter()
            .any(|o| matches!(o, Outbound::Responded { response: r, .. } if r.is_error())));
    }

    #[tokio::test]
    async fn request_without_account_fails_fast() {
        let (bridge, _) = setup();
        let (pipeline, ledger) = pipeline();
        let response = bridge
            .handle_request(&request("topic-1", "personal_sign", json!(["0x00", "0x00"])), &pipeline)
            .await;
        assert_eq!(response.error.unwrap().code, UNAUTHORIZED);
        assert_eq!(ledger.calls(crate::ledger::LedgerMethod::Balance), 0);
    }

    #[tokio::test]
    async fn unknown_topic_is_an_invalid_request() {
        let (bridge, _) = bound().await;
        let (pipeline, _) = pipeline();
        let response = bridge
            .handle_request(&request("nope", "personal_sign", json!([])), &pipeline)
            .await;
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn personal_sign_recovers_to_the_account() {
        let (bridge, _) = bound().await;
        let topic = open_session(&bridge).await;
        let address = bridge.account().unwrap();
        let (pipeline, _) = pipeline();

        for params in [
            json!(["0x68656c6c6f", address.to_string()]),
            json!([address.to_string(), "hello"]),
        ] {
            let response = bridge
                .handle_request(&request(&topic, "personal_sign", params), &pipeline)
                .await;
            let sig_hex = response.result.unwrap();
            let bytes = hex::decode(sig_hex.as_str().unwrap().trim_start_matches("0x")).unwrap();
            let sig = RecoverableSignature::from_rsv_bytes(&bytes).unwrap();
            let recovered = recover_address(&personal_message_hash(b"hello"), &sig).unwrap();
            assert_eq!(recovered, address);
        }

        let wrong = json!(["0x68656c6c6f", Address::from_bytes([1; 20]).to_string()]);
        let response = bridge
            .handle_request(&request(&topic, "personal_sign", wrong), &pipeline)
            .await;
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn send_transaction_goes_through_the_submitter() {
        let (bridge, _) = bound().await;
        let topic = open_session(&bridge).await;
        let address = bridge.account().unwrap();
        let (pipeline, ledger) = pipeline();
        ledger.set_balance(address, parse_ether("1").unwrap());

        let params = json!([{
            "from": address.to_string(),
            "to": "0x3535353535353535353535353535353535353535",
            "value": "0x2386f26fc10000",
        }]);
        let response = bridge
            .handle_request(&request(&topic, "eth_sendTransaction", params), &pipeline)
            .await;
        let hash: TxHash = response.result.unwrap().as_str().unwrap().parse().unwrap();
        assert_eq!(pipeline.history(address)[0].hash, hash);
        pipeline.shutdown();

        let broke = json!([{ "to": "0x3535353535353535353535353535353535353535", "value": "0xde0b6b3a7640000" }]);
        let response = bridge
            .handle_request(&request(&topic, "eth_sendTransaction", broke), &pipeline)
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, REQUEST_FAILED);
        assert!(error.message.starts_with("insufficient balance"));

        let spoofed = json!([{ "from": "0x0000000000000000000000000000000000000001", "to": "0x3535353535353535353535353535353535353535", "value": "0x1" }]);
        let response = bridge
            .handle_request(&request(&topic, "eth_sendTransaction", spoofed), &pipeline)
            .await;
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn emission_survives_a_failing_peer() {
        let (bridge, transport) = bound().await;
        let first = open_session(&bridge).await;
        let second = open_session(&bridge).await;
        transport.fail_topic(&first);

        let report = bridge.emit(&PeerEvent::chain_changed(1)).await;
        assert_eq!(report, EmitReport { delivered: 1, failed: 1 });
        assert_eq!(transport.events_for(&second).len(), 1);
        assert_eq!(bridge.emit_failures(), 1);
    }

    #[tokio::test]
    async fn switching_accounts_notifies_open_sessions() {
        let (bridge, transport) = bound().await;
        let topic = open_session(&bridge).await;
        let other = bridge.account_for(&SecretKey::from_bytes([0x11; 32])).unwrap();
        let other_address = other.address();
        bridge.bind_account(other).await;

        let events = transport.events_for(&topic);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "accountsChanged");
        assert!(bridge.sessions()[0].accounts.contains(&other_address));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (bridge, transport) = bound().await;
        open_session(&bridge).await;
        open_session(&bridge).await;

        bridge.disconnect().await;
        bridge.disconnect().await;
        assert!(bridge.sessions().is_empty());
        assert!(bridge.account().is_none());

        let closes = transport
            .sent()
            .iter()
            .filter(|o| matches!(o, Outbound::Disconnected { code: USER_DISCONNECTED, .. }))
            .count();
        assert_eq!(closes, 2);

        let (empty, _) = setup();
        empty.disconnect().await;
    }

    #[tokio::test]
    async fn lock_out_ends_outstanding_leases() {
        let (bridge, _) = bound().await;
        let lease = bridge.lease().unwrap();
        assert!(lease.is_current());

        bridge.unbind_account().await;
        assert!(!lease.is_current());
        assert!(bridge.lease().is_none());

        bridge.bind_account(bridge.account_for(&SecretKey::from_bytes([0x11; 32])).unwrap()).await;
        assert!(!lease.is_current());
        assert!(bridge.lease().unwrap().is_current());
    }

    #[tokio::test]
    async fn submit_refuses_a_lease_ended_by_disconnect() {
        let (bridge, _) = bound().await;
        let address = bridge.account().unwrap();
        let (pipeline, ledger) = pipeline();
        ledger.set_balance(address, parse_ether("1").unwrap());
        let lease = bridge.lease().unwrap();

        bridge.disconnect().await;
        let request = SendRequest::transfer("0x3535353535353535353535353535353535353535", 1);
        assert_eq!(
            pipeline.submit(request, &lease).await.unwrap_err(),
            WalletError::WalletNotUnlocked
        );
        assert_eq!(ledger.calls(LedgerMethod::SendRaw), 0);
    }

    #[tokio::test]
    async fn peer_close_removes_the_session() {
        let (bridge, _) = bound().await;
        let topic = open_session(&bridge).await;
        bridge.session_deleted(&topic);
        bridge.session_deleted(&topic);
        assert!(bridge.sessions().is_empty());
    }
}
