//! Simulated node and wallet.
//!
//! These speak the same command line and JSON-RPC surface as the real
//! binaries against an in-memory chain, so the harness can run end to end
//! on machines without a node installation. The `dcrharness-simnode` and
//! `dcrharness-simwallet` binaries are thin wrappers around this module.

pub mod chain;
pub mod node;
pub mod server;
pub mod wallet;

pub use chain::SimChain;
pub use node::SimNode;
pub use server::{BackgroundServer, RpcFault, RpcHandler, rpc_router, serve, shutdown_signal};
pub use wallet::SimWallet;
