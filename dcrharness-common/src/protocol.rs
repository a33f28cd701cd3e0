//! JSON-RPC envelopes and result types shared by the harness and the
//! simulated node/wallet.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version string sent with every request.
pub const JSONRPC_VERSION: &str = "1.0";

/// Error code for an unknown method.
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
/// Error code for malformed or out-of-range parameters.
pub const RPC_INVALID_PARAMS: i64 = -32602;
/// Error code for failures inside a known method.
pub const RPC_MISC_ERROR: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcErrorObject>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            id: Value::from(id),
        }
    }

    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
            }),
            id: Value::from(id),
        }
    }
}

/// Hex-encoded block hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(pub String);

impl BlockHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of `getbestblock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestBlock {
    pub hash: BlockHash,
    pub height: u64,
}

/// Coinbase summary attached to a verbose block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseInfo {
    pub txid: String,
    /// Paid-to address; `None` for the unspendable genesis coinbase.
    pub address: Option<String>,
    pub amount: u64,
}

/// Result of `getblock <hash> true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: BlockHash,
    pub height: u64,
    #[serde(rename = "previousblockhash", skip_serializing_if = "Option::is_none")]
    pub previous_block_hash: Option<BlockHash>,
    pub confirmations: u64,
    pub coinbase: CoinbaseInfo,
}

/// Result of `getinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub version: String,
    pub blocks: u64,
    pub network: String,
}

/// One entry of `listunspent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    pub amount: u64,
    /// Height of the block that created the output.
    pub height: u64,
    pub confirmations: u64,
}

/// Result of `walletinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    #[serde(rename = "daemonconnected")]
    pub daemon_connected: bool,
    pub unlocked: bool,
    #[serde(rename = "miningaddress")]
    pub mining_address: String,
}
