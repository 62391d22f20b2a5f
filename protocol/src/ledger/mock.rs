//! Scriptable in-memory ledger.
//!
//! Used by the test suites and by the CLI's offline demo. Every call is
//! counted per method, optionally delayed, and can be made to fail.
//! Broadcast transactions get their real keccak hash, so hashes line up
//! with what [`SigningAccount::sign_transaction`] reports.
//!
//! [`SigningAccount::sign_transaction`]: crate::crypto::SigningAccount::sign_transaction

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::codec::Address;
use crate::config::TRANSFER_GAS;
use crate::crypto::hash::keccak256;
use crate::transaction::{CallRequest, Receipt, TxHash};

use super::{LedgerClient, LedgerError};

/// Ledger calls, for [`MockLedger::calls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerMethod {
    Balance,
    GasPrice,
    EstimateGas,
    TransactionCount,
    SendRaw,
    Receipt,
}

/// How the mock answers receipt queries for broadcast transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptScript {
    /// Never mined.
    Never,
    /// Mined after `after_polls` empty answers, with the given outcome.
    Mined { success: bool, after_polls: u32 },
}

#[derive(Debug)]
struct MockState {
    balances: HashMap<Address, u128>,
    nonces: HashMap<Address, u64>,
    gas_price: u128,
    estimate: Result<u64, LedgerError>,
    balance_error: Option<LedgerError>,
    send_error: Option<LedgerError>,
    receipt_error: Option<LedgerError>,
    receipt_script: ReceiptScript,
    receipt_polls: HashMap<TxHash, u32>,
    receipts: HashMap<TxHash, Receipt>,
    sent: Vec<Vec<u8>>,
    calls: HashMap<LedgerMethod, usize>,
    latency: Duration,
}

/// A [`LedgerClient`] whose answers are set by the test.
#[derive(Debug)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    /// Empty ledger: zero balances, 1 gwei gas, estimates of a plain
    /// transfer, receipts after the first poll with success.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                balances: HashMap::new(),
                nonces: HashMap::new(),
                gas_price: 1_000_000_000,
                estimate: Ok(TRANSFER_GAS),
                balance_error: None,
                send_error: None,
                receipt_error: None,
                receipt_script: ReceiptScript::Mined {
                    success: true,
                    after_polls: 0,
                },
                receipt_polls: HashMap::new(),
                receipts: HashMap::new(),
                sent: Vec::new(),
                calls: HashMap::new(),
                latency: Duration::ZERO,
            }),
        }
    }

    pub fn set_balance(&self, address: Address, wei: u128) {
        self.state.lock().balances.insert(address, wei);
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().nonces.insert(address, nonce);
    }

    pub fn set_gas_price(&self, wei: u128) {
        self.state.lock().gas_price = wei;
    }

    pub fn set_estimate(&self, estimate: Result<u64, LedgerError>) {
        self.state.lock().estimate = estimate;
    }

    pub fn set_balance_error(&self, error: Option<LedgerError>) {
        self.state.lock().balance_error = error;
    }

    pub fn set_send_error(&self, error: Option<LedgerError>) {
        self.state.lock().send_error = error;
    }

    pub fn set_receipt_error(&self, error: Option<LedgerError>) {
        self.state.lock().receipt_error = error;
    }

    pub fn set_receipt_script(&self, script: ReceiptScript) {
        self.state.lock().receipt_script = script;
    }

    /// Delay applied to every call before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Number of calls made to `method` so far.
    pub fn calls(&self, method: LedgerMethod) -> usize {
        self.state.lock().calls.get(&method).copied().unwrap_or(0)
    }

    /// Raw bytes of every accepted broadcast, oldest first.
    pub fn sent_transactions(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    async fn enter(&self, method: LedgerMethod) {
        let latency = {
            let mut state = self.state.lock();
            *state.calls.entry(method).or_insert(0) += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_balance(&self, address: Address) -> Result<u128, LedgerError> {
        self.enter(LedgerMethod::Balance).await;
        let state = self.state.lock();
        if let Some(e) = &state.balance_error {
            return Err(e.clone());
        }
        Ok(state.balances.get(&address).copied().unwrap_or(0))
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        self.enter(LedgerMethod::GasPrice).await;
        Ok(self.state.lock().gas_price)
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> Result<u64, LedgerError> {
        self.enter(LedgerMethod::EstimateGas).await;
        self.state.lock().estimate.clone()
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError> {
        self.enter(LedgerMethod::TransactionCount).await;
        Ok(self.state.lock().nonces.get(&address).copied().unwrap_or(0))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, LedgerError> {
        self.enter(LedgerMethod::SendRaw).await;
        let mut state = self.state.lock();
        if let Some(e) = &state.send_error {
            return Err(e.clone());
        }
        state.sent.push(raw.to_vec());
        Ok(TxHash::from_bytes(keccak256(raw)))
    }

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, LedgerError> {
        self.enter(LedgerMethod::Receipt).await;
        let mut state = self.state.lock();
        if let Some(e) = &state.receipt_error {
            return Err(e.clone());
        }
        if let Some(receipt) = state.receipts.get(&hash) {
            return Ok(Some(receipt.clone()));
        }
        let known = state
            .sent
            .iter()
            .any(|raw| TxHash::from_bytes(keccak256(raw)) == hash);
        if !known {
            return Ok(None);
        }

        match state.receipt_script {
            ReceiptScript::Never => Ok(None),
            ReceiptScript::Mined {
                success,
                after_polls,
            } => {
                let polls = state.receipt_polls.entry(hash).or_insert(0);
                if *polls < after_polls {
                    *polls += 1;
                    return Ok(None);
                }
                let receipt = Receipt {
                    transaction_hash: hash,
                    success,
                    block_number: Some(1),
                    gas_used: Some(TRANSFER_GAS),
                };
                state.receipts.insert(hash, receipt.clone());
                Ok(Some(receipt))
            }
        }
    }
}
