//! Peer protocol messages.
//!
//! The wallet side of a WalletConnect-style session: proposals come in,
//! approvals go out with one `eip155` namespace, requests are JSON-RPC
//! calls scoped to a session topic, and events are pushed to every open
//! session.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::codec::Address;
use crate::transaction::TransactionRecord;

// ---------------------------------------------------------------------------
// Codes and allow-lists
// ---------------------------------------------------------------------------

/// The user (or a locked wallet) declined the proposal.
pub const USER_REJECTED: i64 = 5000;

/// The proposal requires chains this wallet does not serve.
pub const UNSUPPORTED_CHAINS: i64 = 5100;

/// The wallet closed the session.
pub const USER_DISCONNECTED: i64 = 6000;

/// The request needs an unlocked card.
pub const UNAUTHORIZED: i64 = 4100;

/// The request method is outside [`SUPPORTED_METHODS`].
pub const UNSUPPORTED_METHOD: i64 = 4200;

/// Generic failure while executing an accepted request.
pub const REQUEST_FAILED: i64 = -32000;

pub const ETH_SEND_TRANSACTION: &str = "eth_sendTransaction";
pub const PERSONAL_SIGN: &str = "personal_sign";

/// Every method a peer may call. Nothing else is ever approved.
pub const SUPPORTED_METHODS: [&str; 2] = [ETH_SEND_TRANSACTION, PERSONAL_SIGN];

pub const ACCOUNTS_CHANGED: &str = "accountsChanged";
pub const CHAIN_CHANGED: &str = "chainChanged";
pub const BALANCE_CHANGED: &str = "balanceChanged";
pub const TRANSACTION_UPDATED: &str = "transactionUpdated";

/// Every event a session may receive.
pub const SUPPORTED_EVENTS: [&str; 4] = [
    ACCOUNTS_CHANGED,
    CHAIN_CHANGED,
    BALANCE_CHANGED,
    TRANSACTION_UPDATED,
];

pub const EIP155_NAMESPACE: &str = "eip155";

/// `eip155:<chain>`.
pub fn caip_chain(chain_id: u64) -> String {
    format!("{EIP155_NAMESPACE}:{chain_id}")
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Who is on the other end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PeerMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

/// An incoming request to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposal {
    pub id: u64,
    pub proposer: PeerMetadata,
    /// CAIP-2 chains the peer insists on. Empty means any.
    #[serde(default)]
    pub required_chains: Vec<String>,
    /// What the peer asked for. Informational; approvals use the allow-lists.
    #[serde(default)]
    pub required_methods: Vec<String>,
    #[serde(default)]
    pub required_events: Vec<String>,
}

/// The single namespace granted on approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedNamespace {
    pub chains: Vec<String>,
    /// CAIP-10 accounts, `eip155:<chain>:<address>`.
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

impl ApprovedNamespace {
    /// Exactly one account on one chain, with the fixed method and event sets.
    pub fn for_account(chain_id: u64, caip_account: String) -> Self {
        Self {
            chains: vec![caip_chain(chain_id)],
            accounts: vec![caip_account],
            methods: SUPPORTED_METHODS.iter().map(|m| m.to_string()).collect(),
            events: SUPPORTED_EVENTS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// A JSON-RPC call from a peer, scoped to one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub topic: String,
    pub id: u64,
    #[serde(default)]
    pub chain_id: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// An open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSession {
    pub topic: String,
    pub peer: PeerMetadata,
    pub accounts: BTreeSet<Address>,
}

/// An event pushed to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEvent {
    pub name: String,
    pub data: Value,
}

impl PeerEvent {
    pub fn accounts_changed(accounts: &[Address]) -> Self {
        let accounts: Vec<String> = accounts.iter().map(Address::to_string).collect();
        Self {
            name: ACCOUNTS_CHANGED.into(),
            data: json!(accounts),
        }
    }

    pub fn chain_changed(chain_id: u64) -> Self {
        Self {
            name: CHAIN_CHANGED.into(),
            data: json!(format!("{chain_id:#x}")),
        }
    }

    pub fn balance_changed(address: Address, wei: u128) -> Self {
        Self {
            name: BALANCE_CHANGED.into(),
            data: json!({ "address": address.to_string(), "balance": wei.to_string() }),
        }
    }

    pub fn transaction_updated(record: &TransactionRecord) -> Self {
        Self {
            name: TRANSACTION_UPDATED.into(),
            data: json!({
                "hash": record.hash.to_string(),
                "from": record.from.to_string(),
                "status": record.status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_is_allow_listed() {
        let ns = ApprovedNamespace::for_account(137, "eip155:137:0xabc".into());
        assert_eq!(ns.chains, ["eip155:137"]);
        assert_eq!(ns.methods, ["eth_sendTransaction", "personal_sign"]);
        assert_eq!(ns.events.len(), 4);
    }

    #[test]
    fn request_deserializes_from_peer_json() {
        let text = r#"{"topic":"t1","id":9,"method":"personal_sign","params":["0x68656c6c6f","0x00"]}"#;
        let req: SessionRequest = serde_json::from_str(text).unwrap();
        assert_eq!(req.topic, "t1");
        assert_eq!(req.params[0], "0x68656c6c6f");
        assert!(req.chain_id.is_none());
    }

    #[test]
    fn event_payloads() {
        let addr = Address::from_bytes([0xab; 20]);
        let event = PeerEvent::accounts_changed(&[addr]);
        assert_eq!(event.name, "accountsChanged");
        assert_eq!(event.data[0], addr.to_string());
        assert_eq!(PeerEvent::chain_changed(1).data, "0x1");
        assert_eq!(PeerEvent::balance_changed(addr, 5).data["balance"], "5");
    }
}
