//! # Signing & Protocol Bridge
//!
//! ```text
//! protocol.rs  — peer message types, reason codes, method/event allow-lists
//! transport.rs — PeerTransport trait, OfflineTransport, MemoryTransport
//! handler.rs   — SigningBridge: account binding, proposals, requests, events
//! ```

pub mod handler;
pub mod protocol;
pub mod transport;

pub use handler::{
    EmitReport, ProposalOutcome, SigningBridge, SigningLease, TransactionSubmitter,
};
pub use protocol::{
    ApprovedNamespace, PeerEvent, PeerMetadata, SessionProposal, SessionRequest, WalletSession,
};
pub use transport::{MemoryTransport, OfflineTransport, Outbound, PeerTransport, TransportError};
