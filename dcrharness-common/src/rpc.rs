//! Blocking JSON-RPC client for node and wallet endpoints.
//!
//! Calls are synchronous: the harness blocks on process readiness and block
//! generation anyway, and a blocking client keeps the harness usable from
//! plain `#[test]` functions without a runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::trace;

use crate::protocol::{
    BestBlock, BlockHash, BlockInfo, NodeInfo, RpcRequest, RpcResponse, UnspentOutput, WalletInfo,
};

/// Errors from a JSON-RPC round-trip.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The endpoint could not be reached (refused, reset, timed out).
    #[error("RPC transport error calling {method} at {url}: {message}")]
    Transport {
        url: String,
        method: String,
        message: String,
    },

    /// The endpoint answered with a non-success HTTP status.
    #[error("RPC {method} at {url} returned HTTP status {status}")]
    Status {
        url: String,
        method: String,
        status: u16,
    },

    /// The server reported a JSON-RPC error object.
    #[error("RPC {method} failed with code {code}: {message}")]
    Server {
        method: String,
        code: i64,
        message: String,
    },

    /// The response body was not the expected shape.
    #[error("RPC {method} returned an undecodable response: {message}")]
    Decode { method: String, message: String },
}

impl RpcError {
    /// True when the failure means nothing is listening at the endpoint.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, RpcError::Transport { .. })
    }
}

/// Address and credentials of an RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl RpcEndpoint {
    pub fn localhost(port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            user: user.into(),
            password: password.into(),
        }
    }

    /// `host:port`, as passed to `--rpclisten` / `--rpcconnect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.address())
    }

    /// Value of the `Authorization` header for these credentials.
    pub fn basic_auth(&self) -> String {
        basic_auth_header(&self.user, &self.password)
    }
}

/// Encode HTTP basic credentials.
pub fn basic_auth_header(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

/// Untyped JSON-RPC client. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct RpcClient {
    agent: ureq::Agent,
    endpoint: RpcEndpoint,
    url: String,
    auth: String,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.url)
            .field("user", &self.endpoint.user)
            .finish()
    }
}

impl RpcClient {
    pub fn new(endpoint: RpcEndpoint, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .proxy(None)
            .build();
        let agent = ureq::Agent::new_with_config(config);
        Self {
            agent,
            url: endpoint.url(),
            auth: endpoint.basic_auth(),
            endpoint,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }

    /// Issue one call and decode its `result` field.
    pub fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);
        let body = serde_json::to_string(&request).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })?;

        trace!(url = %self.url, method, id, "RPC request");

        let mut response = self
            .agent
            .post(&self.url)
            .header("Authorization", self.auth.as_str())
            .header("Content-Type", "application/json")
            .send(body.as_str())
            .map_err(|e| self.map_transport_error(method, e))?;

        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| self.map_transport_error(method, e))?;

        let envelope: RpcResponse = serde_json::from_str(&text).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            message: format!("{e}: {text}"),
        })?;

        if let Some(err) = envelope.error {
            return Err(RpcError::Server {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(envelope.result.unwrap_or(Value::Null)).map_err(|e| {
            RpcError::Decode {
                method: method.to_string(),
                message: e.to_string(),
            }
        })
    }

    fn map_transport_error(&self, method: &str, err: ureq::Error) -> RpcError {
        match err {
            ureq::Error::StatusCode(status) => RpcError::Status {
                url: self.url.clone(),
                method: method.to_string(),
                status,
            },
            other => RpcError::Transport {
                url: self.url.clone(),
                method: method.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Typed client for the node RPC surface.
#[derive(Debug, Clone)]
pub struct NodeRpcClient {
    inner: RpcClient,
}

impl NodeRpcClient {
    pub fn new(endpoint: RpcEndpoint, timeout: Duration) -> Self {
        Self {
            inner: RpcClient::new(endpoint, timeout),
        }
    }

    /// Untyped client, for calls without a typed wrapper.
    pub fn internal(&self) -> &RpcClient {
        &self.inner
    }

    pub fn get_best_block(&self) -> Result<BestBlock, RpcError> {
        self.inner.call("getbestblock", Vec::new())
    }

    pub fn get_block_count(&self) -> Result<u64, RpcError> {
        self.inner.call("getblockcount", Vec::new())
    }

    pub fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        self.inner.call("getblockhash", vec![json!(height)])
    }

    pub fn get_block(&self, hash: &BlockHash) -> Result<BlockInfo, RpcError> {
        self.inner.call("getblock", vec![json!(hash), json!(true)])
    }

    /// Mine `count` blocks and return their hashes in chain order.
    pub fn generate(&self, count: u64) -> Result<Vec<BlockHash>, RpcError> {
        self.inner.call("generate", vec![json!(count)])
    }

    pub fn get_info(&self) -> Result<NodeInfo, RpcError> {
        self.inner.call("getinfo", Vec::new())
    }

    pub fn stop(&self) -> Result<String, RpcError> {
        self.inner.call("stop", Vec::new())
    }
}

/// Typed client for the wallet RPC surface.
#[derive(Debug, Clone)]
pub struct WalletRpcClient {
    inner: RpcClient,
}

impl WalletRpcClient {
    pub fn new(endpoint: RpcEndpoint, timeout: Duration) -> Self {
        Self {
            inner: RpcClient::new(endpoint, timeout),
        }
    }

    pub fn internal(&self) -> &RpcClient {
        &self.inner
    }

    pub fn wallet_info(&self) -> Result<WalletInfo, RpcError> {
        self.inner.call("walletinfo", Vec::new())
    }

    pub fn list_unspent(&self, min_conf: u64) -> Result<Vec<UnspentOutput>, RpcError> {
        self.inner.call("listunspent", vec![json!(min_conf)])
    }

    pub fn stop(&self) -> Result<String, RpcError> {
        self.inner.call("stop", Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth_header("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_endpoint_formats() {
        let endpoint = RpcEndpoint::localhost(20000, "u", "p");
        assert_eq!(endpoint.address(), "127.0.0.1:20000");
        assert_eq!(endpoint.url(), "http://127.0.0.1:20000/");
    }

    #[test]
    fn test_call_against_closed_port_is_connection_failure() {
        // Bind then drop to obtain a port with nothing listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = NodeRpcClient::new(
            RpcEndpoint::localhost(port, "u", "p"),
            Duration::from_secs(2),
        );
        let err = client.get_best_block().unwrap_err();
        assert!(err.is_connection_failure(), "unexpected error: {err}");
    }
}
