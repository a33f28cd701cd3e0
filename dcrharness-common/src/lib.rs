//! Shared building blocks for dcrharness.
//!
//! - [`network`]: network parameter profiles (maturity, ports, addresses)
//! - [`protocol`]: JSON-RPC envelopes and result types
//! - [`rpc`]: blocking node/wallet RPC clients
//! - [`config`]: `DCRHARNESS_*` environment configuration
//! - [`logging`] / [`testing`]: tracing setup for binaries and tests

#![deny(unsafe_code)]

pub mod config;
pub mod logging;
pub mod network;
pub mod protocol;
pub mod rpc;
pub mod testing;
pub mod util;

pub use logging::{LogConfig, init_logging};
pub use network::{Network, NetworkParams};
pub use protocol::{BestBlock, BlockHash, BlockInfo, CoinbaseInfo, UnspentOutput, WalletInfo};
pub use rpc::{NodeRpcClient, RpcClient, RpcEndpoint, RpcError, WalletRpcClient};
