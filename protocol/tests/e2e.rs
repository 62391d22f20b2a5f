//! End-to-end tests for the CardVault protocol.
//!
//! Each test builds a full [`CardWallet`] over in-memory collaborators: a
//! scriptable ledger, a recording peer transport, a virtual tag and a
//! static catalogue. Time is paused wherever receipts are polled, so no
//! test waits on a real clock.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::json;

use cardvault_protocol::bridge::{
    MemoryTransport, Outbound, PeerMetadata, ProposalOutcome, SessionProposal, SessionRequest,
};
use cardvault_protocol::catalogue::StaticCatalogue;
use cardvault_protocol::codec::{self, text_to_id, Address};
use cardvault_protocol::config::WalletConfig;
use cardvault_protocol::crypto::{validate_pin, KdfParams};
use cardvault_protocol::ledger::{LedgerMethod, MockLedger, ReceiptScript};
use cardvault_protocol::session::{JsonFileStore, MemoryStore, SessionPhase, SnapshotStore};
use cardvault_protocol::tag::MemoryTag;
use cardvault_protocol::transaction::{parse_ether, TransactionStatus};
use cardvault_protocol::{CardWallet, Collaborators, WalletError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const KEY_HEX: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const PIN: &str = "1357";
const RECIPIENT: &str = "0x3535353535353535353535353535353535353535";

struct Harness {
    wallet: CardWallet,
    ledger: Arc<MockLedger>,
    transport: Arc<MemoryTransport>,
}

fn config() -> WalletConfig {
    WalletConfig {
        kdf: KdfParams::light(),
        receipt_poll_interval_ms: 1_000,
        max_receipt_poll_attempts: 5,
        ..WalletConfig::default()
    }
}

fn harness_with_store(store: Arc<dyn SnapshotStore>) -> Harness {
    let ledger = Arc::new(MockLedger::new());
    let transport = Arc::new(MemoryTransport::new());
    let wallet = CardWallet::new(
        config(),
        Collaborators {
            ledger: ledger.clone(),
            store,
            transport: transport.clone(),
            tag: Arc::new(MemoryTag::default()),
            catalogue: Arc::new(StaticCatalogue::new()),
        },
    );
    Harness {
        wallet,
        ledger,
        transport,
    }
}

fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

/// Provisions the fixed key, sets it as the current card, returns its address.
async fn with_card(h: &Harness) -> Address {
    let credential = h.wallet.provision(KEY_HEX, PIN, 7).await.unwrap();
    let address = credential.address().address().unwrap();
    h.wallet.set_card(credential).await;
    address
}

fn proposal() -> SessionProposal {
    SessionProposal {
        id: 1,
        proposer: PeerMetadata {
            name: "example dapp".into(),
            ..PeerMetadata::default()
        },
        required_chains: vec!["eip155:1".into()],
        required_methods: vec!["eth_sendTransaction".into()],
        required_events: Vec::new(),
    }
}

async fn open_session(h: &Harness) -> String {
    match h.wallet.handle_proposal(&proposal()).await.unwrap() {
        ProposalOutcome::Approved(session) => session.topic,
        other => panic!("expected approval, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn scenario_decode_a_scanned_card_link() {
    let url = "https://cardvault.app/#0xabc0000000000000000000000000000000001234:QmFzZTY0S2V5:7";
    let credential = codec::decode_card_url(url).unwrap();

    assert_eq!(
        credential.address().address().unwrap().to_string(),
        "0xabc0000000000000000000000000000000001234"
    );
    assert_eq!(credential.id(), text_to_id("7").unwrap());
    assert_eq!(
        credential.encrypted_key(),
        base64::engine::general_purpose::STANDARD
            .decode("QmFzZTY0S2V5")
            .unwrap()
    );
}

#[test]
fn scenario_pin_format() {
    assert!(!validate_pin("1"));
    assert!(validate_pin("123"));
}

#[tokio::test]
async fn scenario_overdraft_never_reaches_the_network() {
    let h = harness();
    let address = with_card(&h).await;
    h.ledger.set_balance(address, parse_ether("0.5").unwrap());

    let err = h.wallet.send(RECIPIENT, "0.5", PIN).await.unwrap_err();
    assert!(matches!(err, WalletError::InsufficientBalance { .. }));
    assert_eq!(h.ledger.calls(LedgerMethod::SendRaw), 0);
    assert!(h.ledger.sent_transactions().is_empty());
    assert!(h.wallet.history(address).is_empty());
}

#[tokio::test]
async fn scenario_unknown_peer_method() {
    let h = harness();
    with_card(&h).await;
    let bound = h.wallet.unlock(PIN).await.unwrap();
    let topic = open_session(&h).await;

    let response = h
        .wallet
        .handle_request(&SessionRequest {
            topic: topic.clone(),
            id: 11,
            chain_id: None,
            method: "eth_foo".into(),
            params: json!([]),
        })
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.code, 4200);
    assert!(error.message.contains("eth_foo"));
    assert_eq!(h.wallet.bridge().account(), Some(bound));
    assert!(h
        .transport
        .sent()
        .iter()
        .any(|o| matches!(o, Outbound::Responded { topic: t, .. } if *t == topic)));
}

// ---------------------------------------------------------------------------
// Lifecycle properties
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sent_transaction_confirms_and_notifies_peers() {
    let h = harness();
    let address = with_card(&h).await;
    h.ledger.set_balance(address, parse_ether("3").unwrap());
    h.ledger.set_receipt_script(ReceiptScript::Mined {
        success: true,
        after_polls: 2,
    });
    h.wallet.unlock(PIN).await.unwrap();
    let topic = open_session(&h).await;

    let hash = h.wallet.send(RECIPIENT, "1.25", PIN).await.unwrap();
    assert_eq!(h.wallet.history(address)[0].status, TransactionStatus::Pending);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let record = &h.wallet.history(address)[0];
    assert_eq!(record.hash, hash);
    assert_eq!(record.status, TransactionStatus::Confirmed);
    assert!(record.confirmed_at.is_some());

    let updates: Vec<_> = h
        .transport
        .events_for(&topic)
        .into_iter()
        .filter(|e| e.name == "transactionUpdated")
        .map(|e| e.data["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(updates, ["pending", "confirmed"]);
    h.wallet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn lock_does_not_cancel_confirmation() {
    let h = harness();
    let address = with_card(&h).await;
    h.ledger.set_balance(address, parse_ether("3").unwrap());
    h.ledger.set_receipt_script(ReceiptScript::Mined {
        success: false,
        after_polls: 1,
    });

    let hash = h.wallet.send(RECIPIENT, "1", PIN).await.unwrap();
    h.wallet.lock().await;
    assert_eq!(
        h.wallet.send(RECIPIENT, "1", "0000").await.unwrap_err(),
        WalletError::DecryptionFailed
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    let record = h.wallet.pipeline().record(hash).unwrap();
    assert_eq!(record.status, TransactionStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn lock_during_a_send_abandons_the_broadcast() {
    let h = harness();
    let address = with_card(&h).await;
    h.ledger.set_balance(address, parse_ether("3").unwrap());
    h.wallet.unlock(PIN).await.unwrap();
    h.ledger.set_latency(Duration::from_millis(100));

    let (sent, ()) = tokio::join!(h.wallet.send(RECIPIENT, "0.5", PIN), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.wallet.lock().await;
    });

    assert_eq!(sent.unwrap_err(), WalletError::WalletNotUnlocked);
    assert_eq!(h.ledger.calls(LedgerMethod::SendRaw), 0);
    assert!(h.wallet.history(address).is_empty());
    assert_eq!(h.wallet.state().phase(), SessionPhase::Locked);
}

#[tokio::test]
async fn disconnect_locks_so_a_wrong_pin_cannot_send() {
    let h = harness();
    let address = with_card(&h).await;
    h.ledger.set_balance(address, parse_ether("3").unwrap());
    h.wallet.unlock(PIN).await.unwrap();
    open_session(&h).await;

    h.wallet.disconnect().await;
    assert_eq!(h.wallet.state().phase(), SessionPhase::Locked);
    assert!(h.wallet.bridge().account().is_none());

    assert_eq!(
        h.wallet.send(RECIPIENT, "0.5", "0000").await.unwrap_err(),
        WalletError::DecryptionFailed
    );
    assert_eq!(h.ledger.calls(LedgerMethod::SendRaw), 0);
    assert_eq!(
        h.wallet.unlock("9999").await.unwrap_err(),
        WalletError::DecryptionFailed
    );
    assert!(matches!(
        h.wallet.handle_proposal(&proposal()).await.unwrap(),
        ProposalOutcome::Rejected { code: 5000 }
    ));

    assert_eq!(h.wallet.unlock(PIN).await.unwrap(), address);
    assert!(h.wallet.send(RECIPIENT, "0.5", "0000").await.is_ok());
    h.wallet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_chain_leaves_record_pending() {
    let h = harness();
    let address = with_card(&h).await;
    h.ledger.set_balance(address, parse_ether("3").unwrap());
    h.ledger.set_receipt_script(ReceiptScript::Never);

    let hash = h.wallet.send(RECIPIENT, "0.1", PIN).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.ledger.calls(LedgerMethod::Receipt), 5);
    assert_eq!(
        h.wallet.pipeline().record(hash).unwrap().status,
        TransactionStatus::Pending
    );
    assert!(!h.wallet.pipeline().is_watching(hash));
}

#[tokio::test(start_paused = true)]
async fn concurrent_refreshes_hit_the_ledger_once() {
    let h = harness();
    let address = with_card(&h).await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    h.ledger.set_balance(address, 12_345);
    h.ledger.set_latency(Duration::from_millis(200));
    let before = h.ledger.calls(LedgerMethod::Balance);
    let session = h.wallet.session();
    tokio::join!(session.refresh_balance(), session.refresh_balance());

    assert_eq!(h.ledger.calls(LedgerMethod::Balance) - before, 1);
    assert_eq!(h.wallet.state().cached_balance, 12_345);
}

#[tokio::test]
async fn lock_and_disconnect_are_idempotent() {
    let h = harness();
    with_card(&h).await;
    h.wallet.unlock(PIN).await.unwrap();
    open_session(&h).await;

    h.wallet.lock().await;
    let once = (h.wallet.state(), h.wallet.bridge().sessions());
    h.wallet.lock().await;
    assert_eq!((h.wallet.state(), h.wallet.bridge().sessions()), once);

    h.wallet.disconnect().await;
    h.wallet.disconnect().await;
    assert!(h.wallet.bridge().sessions().is_empty());
    assert!(h.wallet.bridge().account().is_none());
}

#[tokio::test]
async fn proposal_while_locked_is_rejected() {
    let h = harness();
    with_card(&h).await;
    assert!(matches!(
        h.wallet.handle_proposal(&proposal()).await.unwrap(),
        ProposalOutcome::Rejected { code: 5000 }
    ));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_survives_restart_locked_and_keyless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let address = {
        let h = harness_with_store(Arc::new(JsonFileStore::new(&path)));
        let address = with_card(&h).await;
        h.ledger.set_balance(address, 5_000);
        h.wallet.unlock(PIN).await.unwrap();
        h.wallet.refresh_balance().await;
        address
    };

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains(KEY_HEX));
    assert!(!raw.contains(&KEY_HEX[..16]));
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["isLocked"], true);
    assert_eq!(snapshot["cachedBalance"], "5000");
    assert_eq!(snapshot["currentCredential"]["id"], 7);

    let h = harness_with_store(Arc::new(JsonFileStore::new(&path)));
    let state = h.wallet.state();
    assert_eq!(state.phase(), SessionPhase::Locked);
    assert_eq!(state.cached_balance, 5_000);
    assert!(h.wallet.bridge().account().is_none());
    assert_eq!(h.wallet.unlock(PIN).await.unwrap(), address);
}

#[tokio::test]
async fn clear_removes_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let h = harness_with_store(Arc::new(JsonFileStore::new(&path)));
    with_card(&h).await;
    assert!(path.exists());

    h.wallet.clear().await;
    assert!(!path.exists());
    assert_eq!(h.wallet.state().phase(), SessionPhase::NoCard);
}
