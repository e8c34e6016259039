//! JSON-RPC wire types and typed classification of provider calls.
//!
//! The relay accepts raw EIP-1193 style JSON-RPC payloads from the injected
//! provider. Before acting on one, it is classified into [`RpcCall`] — a
//! tagged union over the supported methods with strongly-typed parameter
//! records. Unknown methods become a distinct [`RpcCall::Unsupported`]
//! variant rather than being probed for fields they may not have.

use alloy_primitives::{Address, hex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

pub const METHOD_ACCOUNT: &str = "eth_account";
pub const METHOD_ACCOUNTS: &str = "eth_accounts";
pub const METHOD_REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
pub const METHOD_CHAIN_ID: &str = "eth_chainId";
pub const METHOD_PERSONAL_SIGN: &str = "personal_sign";
pub const METHOD_SEND_TRANSACTION: &str = "eth_sendTransaction";

/// A JSON-RPC request as received from the injected provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Parameters of a `personal_sign` call: `[message_hex, address?]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignParams {
    /// Hex-encoded message bytes, as sent by the dApp.
    pub message: String,
    pub address: Option<Address>,
}

impl SignParams {
    /// Decode the hex message into raw bytes.
    pub fn message_bytes(&self) -> Result<Vec<u8>, RelayError> {
        hex::decode(&self.message).map_err(|e| RelayError::InvalidParams {
            method: METHOD_PERSONAL_SIGN.to_string(),
            message: format!("message is not valid hex: {e}"),
        })
    }
}

/// An `eth_sendTransaction` parameter record. All quantities are hex strings
/// as they appear on the wire; the wallet side interprets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Typed classification of a provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCall {
    /// `eth_account` — the single account address.
    Account,
    /// `eth_accounts` — account list.
    Accounts,
    /// `eth_requestAccounts` — account list, connect semantics.
    RequestAccounts,
    /// `eth_chainId`.
    ChainId,
    /// `personal_sign` — requires a wallet round-trip.
    PersonalSign(SignParams),
    /// `eth_sendTransaction` — requires a wallet round-trip.
    SendTransaction(Box<TransactionRequest>),
    /// Any method the relay does not implement.
    Unsupported(String),
}

impl RpcCall {
    /// Classify a raw request. Fails only when a *supported* method carries
    /// malformed params; unknown methods always classify successfully.
    pub fn classify(request: &JsonRpcRequest) -> Result<Self, RelayError> {
        match request.method.as_str() {
            METHOD_ACCOUNT => Ok(Self::Account),
            METHOD_ACCOUNTS => Ok(Self::Accounts),
            METHOD_REQUEST_ACCOUNTS => Ok(Self::RequestAccounts),
            METHOD_CHAIN_ID => Ok(Self::ChainId),
            METHOD_PERSONAL_SIGN => {
                let message = request
                    .params
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| RelayError::InvalidParams {
                        method: METHOD_PERSONAL_SIGN.to_string(),
                        message: "params[0] must be a hex message string".to_string(),
                    })?
                    .to_string();
                let address = match request.params.get(1).and_then(Value::as_str) {
                    Some(raw) => {
                        Some(
                            raw.parse::<Address>()
                                .map_err(|e| RelayError::InvalidParams {
                                    method: METHOD_PERSONAL_SIGN.to_string(),
                                    message: format!("params[1] is not an address: {e}"),
                                })?,
                        )
                    }
                    None => None,
                };
                Ok(Self::PersonalSign(SignParams { message, address }))
            }
            METHOD_SEND_TRANSACTION => {
                let raw = request
                    .params
                    .first()
                    .cloned()
                    .ok_or_else(|| RelayError::InvalidParams {
                        method: METHOD_SEND_TRANSACTION.to_string(),
                        message: "params[0] must be a transaction object".to_string(),
                    })?;
                let tx: TransactionRequest =
                    serde_json::from_value(raw).map_err(|e| RelayError::InvalidParams {
                        method: METHOD_SEND_TRANSACTION.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Self::SendTransaction(Box::new(tx)))
            }
            other => Ok(Self::Unsupported(other.to_string())),
        }
    }

    /// Whether this call needs a wallet round-trip through the request slot.
    pub fn needs_wallet(&self) -> bool {
        matches!(self, Self::PersonalSign(_) | Self::SendTransaction(_))
    }
}

/// The sentinel result returned for methods the relay does not implement.
pub fn not_implemented(method: &str) -> Value {
    Value::String(format!("NOT IMPLEMENTED: {method}"))
}
