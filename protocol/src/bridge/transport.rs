//! Wallet-protocol transport.
//!
//! [`PeerTransport`] is the relay layer that actually talks to peers. The
//! bridge only decides what to say. Two implementations ship here:
//! [`OfflineTransport`] refuses everything, and [`MemoryTransport`] records
//! every call for tests and demos.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::ledger::rpc::RpcResponse;

use super::protocol::{ApprovedNamespace, PeerEvent, SessionProposal};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no relay connection")]
    Offline,

    #[error("session {0} is closed")]
    Closed(String),

    #[error("peer error: {0}")]
    Peer(String),
}

/// Outbound half of the peer protocol.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Approves `proposal` and returns the new session's topic.
    async fn approve(
        &self,
        proposal: &SessionProposal,
        namespace: &ApprovedNamespace,
    ) -> Result<String, TransportError>;

    async fn reject(&self, proposal_id: u64, code: i64, reason: &str) -> Result<(), TransportError>;

    async fn respond(&self, topic: &str, response: &RpcResponse) -> Result<(), TransportError>;

    async fn emit(&self, topic: &str, event: &PeerEvent) -> Result<(), TransportError>;

    async fn disconnect(&self, topic: &str, code: i64, reason: &str) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// OfflineTransport
// ---------------------------------------------------------------------------

/// A transport with no relay behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineTransport;

#[async_trait]
impl PeerTransport for OfflineTransport {
    async fn approve(
        &self,
        _proposal: &SessionProposal,
        _namespace: &ApprovedNamespace,
    ) -> Result<String, TransportError> {
        Err(TransportError::Offline)
    }

    async fn reject(&self, _: u64, _: i64, _: &str) -> Result<(), TransportError> {
        Err(TransportError::Offline)
    }

    async fn respond(&self, _: &str, _: &RpcResponse) -> Result<(), TransportError> {
        Err(TransportError::Offline)
    }

    async fn emit(&self, _: &str, _: &PeerEvent) -> Result<(), TransportError> {
        Err(TransportError::Offline)
    }

    async fn disconnect(&self, _: &str, _: i64, _: &str) -> Result<(), TransportError> {
        Err(TransportError::Offline)
    }
}

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

/// One outbound message, as seen by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Approved {
        proposal_id: u64,
        topic: String,
        namespace: ApprovedNamespace,
    },
    Rejected {
        proposal_id: u64,
        code: i64,
    },
    Responded {
        topic: String,
        response: RpcResponse,
    },
    Emitted {
        topic: String,
        event: PeerEvent,
    },
    Disconnected {
        topic: String,
        code: i64,
    },
}

/// Records outbound traffic. Topics are `topic-1`, `topic-2`, ...
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<Outbound>>,
    failing: Mutex<HashSet<String>>,
    next_topic: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call addressed to `topic` fail, as a vanished peer would.
    pub fn fail_topic(&self, topic: &str) {
        self.failing.lock().insert(topic.to_string());
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().clone()
    }

    pub fn events_for(&self, topic: &str) -> Vec<PeerEvent> {
        self.sent
            .lock()
            .iter()
            .filter_map(|o| match o {
                Outbound::Emitted { topic: t, event } if t == topic => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn check(&self, topic: &str) -> Result<(), TransportError> {
        if self.failing.lock().contains(topic) {
            return Err(TransportError::Closed(topic.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn approve(
        &self,
        proposal: &SessionProposal,
        namespace: &ApprovedNamespace,
    ) -> Result<String, TransportError> {
        let topic = format!("topic-{}", self.next_topic.fetch_add(1, Ordering::Relaxed) + 1);
        self.sent.lock().push(Outbound::Approved {
            proposal_id: proposal.id,
            topic: topic.clone(),
            namespace: namespace.clone(),
        });
        Ok(topic)
    }

    async fn reject(&self, proposal_id: u64, code: i64, _reason: &str) -> Result<(), TransportError> {
        self.sent.lock().push(Outbound::Rejected { proposal_id, code });
        Ok(())
    }

    async fn respond(&self, topic: &str, response: &RpcResponse) -> Result<(), TransportError> {
        self.check(topic)?;
        self.sent.lock().push(Outbound::Responded {
            topic: topic.to_string(),
            response: response.clone(),
        });
        Ok(())
    }

    async fn emit(&self, topic: &str, event: &PeerEvent) -> Result<(), TransportError> {
        self.check(topic)?;
        self.sent.lock().push(Outbound::Emitted {
            topic: topic.to_string(),
            event: event.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self, topic: &str, code: i64, _reason: &str) -> Result<(), TransportError> {
        self.check(topic)?;
        self.sent.lock().push(Outbound::Disconnected {
            topic: topic.to_string(),
            code,
        });
        Ok(())
    }
}
