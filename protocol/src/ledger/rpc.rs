//! # JSON-RPC Ledger
//!
//! JSON-RPC 2.0 envelope types and a [`LedgerClient`] that speaks the
//! standard `eth_*` methods over HTTP.
//!
//! ## Method Index
//!
//! | Method                      | Used for                        |
//! |-----------------------------|---------------------------------|
//! | `eth_getBalance`            | balance refresh, send pre-check |
//! | `eth_gasPrice`              | fee sizing                      |
//! | `eth_estimateGas`           | gas limit before margin         |
//! | `eth_getTransactionCount`   | pending nonce                   |
//! | `eth_sendRawTransaction`    | broadcast                       |
//! | `eth_getTransactionReceipt` | confirmation watcher            |
//!
//! The envelope types are also what the signing bridge answers peers with.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::codec::Address;
use crate::config::LEDGER_REQUEST_TIMEOUT;
use crate::transaction::{CallRequest, Receipt, TxHash};

use super::{parse_quantity, to_quantity, LedgerClient, LedgerError};

const JSONRPC_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Echoed back in the response.
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
///
/// Exactly one of `result` or `error` is set by a conforming peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 error object.
///
/// Standard codes: `-32700` parse, `-32600` invalid request, `-32601`
/// method not found, `-32602` invalid params, `-32603` internal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(-32601, format!("method not found: {}", method.into()))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }
}

// ---------------------------------------------------------------------------
// JsonRpcLedger
// ---------------------------------------------------------------------------

/// [`LedgerClient`] over HTTP JSON-RPC.
pub struct JsonRpcLedger {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(url: impl Into<String>) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(LEDGER_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(json!(id), method, params);
        debug!(method, id, "ledger request");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "HTTP status {} from ledger",
                response.status()
            )));
        }
        let response: RpcResponse = response.json().await.map_err(transport_error)?;

        if let Some(error) = response.error {
            warn!(method, code = error.code, message = %error.message, "ledger returned an error");
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn call_quantity(&self, method: &str, params: Value) -> Result<u128, LedgerError> {
        let value = self.call(method, params).await?;
        let text = value
            .as_str()
            .ok_or_else(|| LedgerError::Decode(format!("{method} did not return a quantity")))?;
        parse_quantity(text)
    }
}

fn transport_error(e: reqwest::Error) -> LedgerError {
    if e.is_timeout() {
        LedgerError::Timeout
    } else {
        LedgerError::Transport(e.to_string())
    }
}

/// `eth_estimateGas` call object.
pub fn call_object(call: &CallRequest) -> Value {
    let mut object = json!({
        "from": call.from.to_string(),
        "to": call.to.to_string(),
        "value": to_quantity(call.value_wei),
    });
    if !call.data.is_empty() {
        object["data"] = json!(format!("0x{}", hex::encode(&call.data)));
    }
    object
}

/// Interprets an `eth_getTransactionReceipt` result. `null` means not mined.
pub fn parse_receipt(value: &Value) -> Result<Option<Receipt>, LedgerError> {
    if value.is_null() {
        return Ok(None);
    }
    let field = |name: &str| value.get(name).and_then(Value::as_str);
    let hash = field("transactionHash")
        .ok_or_else(|| LedgerError::Decode("receipt without transactionHash".into()))?
        .parse::<TxHash>()
        .map_err(|e| LedgerError::Decode(e.to_string()))?;
    let status = field("status")
        .ok_or_else(|| LedgerError::Decode("receipt without status".into()))
        .and_then(parse_quantity)?;
    let optional_u64 = |name: &str| -> Result<Option<u64>, LedgerError> {
        field(name)
            .map(|q| parse_quantity(q).map(|v| v as u64))
            .transpose()
    };

    Ok(Some(Receipt {
        transaction_hash: hash,
        success: status == 1,
        block_number: optional_u64("blockNumber")?,
        gas_used: optional_u64("gasUsed")?,
    }))
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn get_balance(&self, address: Address) -> Result<u128, LedgerError> {
        self.call_quantity("eth_getBalance", json!([address.to_string(), "latest"]))
            .await
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        self.call_quantity("eth_gasPrice", json!([])).await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, LedgerError> {
        let gas = self
            .call_quantity("eth_estimateGas", json!([call_object(call)]))
            .await?;
        u64::try_from(gas).map_err(|_| LedgerError::Decode("gas estimate out of range".into()))
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError> {
        let nonce = self
            .call_quantity(
                "eth_getTransactionCount",
                json!([address.to_string(), "pending"]),
            )
            .await?;
        u64::try_from(nonce).map_err(|_| LedgerError::Decode("nonce out of range".into()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, LedgerError> {
        let value = self
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        value
            .as_str()
            .ok_or_else(|| LedgerError::Decode("eth_sendRawTransaction did not return a hash".into()))?
            .parse::<TxHash>()
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, LedgerError> {
        let value = self
            .call("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        parse_receipt(&value)
    }
}
