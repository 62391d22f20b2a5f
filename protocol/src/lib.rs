// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CardVault Protocol — Core Library
//!
//! A physical NFC card is the wallet. It carries a card id, a chain address
//! and the private key sealed under a short PIN. This crate turns a tap and
//! a PIN into a signing identity, talks to wallet-protocol peers on the
//! card's behalf, and follows every transaction it sends to finality.
//!
//! The card is the second factor, the PIN the first. Neither alone opens
//! the key, and the decrypted key never leaves process memory.
//!
//! ## Architecture
//!
//! - **codec** — The on-tag payload: `address:base64key:id`, custom base-64 ids.
//! - **crypto** — Argon2id + AES-256-GCM key sealing, secp256k1 accounts, redaction.
//! - **session** — The locked/unlocked state machine and its redacted snapshot.
//! - **bridge** — WalletConnect-style sessions: proposals, requests, events.
//! - **pipeline** — Gas sizing, submission, receipt watching, history.
//! - **transaction** — Records, amounts, RLP and EIP-155 signing.
//! - **ledger** — The chain node: a trait, a JSON-RPC client, a scriptable mock.
//! - **poller** — One periodic refresh task at a time, never two.
//! - **tag** / **catalogue** — Black-box collaborators: the reader and card art.
//! - **wallet** — Everything above, wired together explicitly.
//! - **config** — Constants and the JSON-loadable [`config::WalletConfig`].
//!
//! ## Ground Rules
//!
//! 1. A wrong PIN and a damaged card look the same. No oracles.
//! 2. Nothing is broadcast that the balance cannot pay for.
//! 3. Locking stops future sends, never past ones.
//! 4. Secrets are logged only through [`crypto::redact()`].

pub mod bridge;
pub mod catalogue;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod poller;
pub mod session;
pub mod tag;
pub mod transaction;
pub mod wallet;

pub use error::WalletError;
pub use wallet::{CardWallet, Collaborators};
