//! Integration-test harness for node/wallet pairs.
//!
//! A [`TestSetup`] owns a working directory, a [`HarnessPool`] and seven
//! preconfigured [`ChainWithMatureOutputsSpawner`]s. Tests obtain a
//! [`Harness`] by name; the first request spawns the node and wallet,
//! waits for both to become ready, and mines until the wallet holds the
//! requested number of mature coinbase outputs.
//!
//! ```ignore
//! let setup = TestSetup::from_env()?;
//! let harness = setup.obtain_harness(MAIN_HARNESS_NAME)?;
//! let rpc = harness.node_rpc_client()?;
//! let hashes = rpc.generate(1)?;
//! setup.tear_down()?;
//! ```

#![deny(unsafe_code)]

pub mod error;
pub mod harness;
pub mod node;
pub mod pool;
pub mod ports;
pub mod process;
pub mod setup;
pub mod sim;
pub mod spawner;
pub mod wallet;
pub mod workdir;

pub use dcrharness_common::{
    BestBlock, BlockHash, Network, NodeRpcClient, RpcError, UnspentOutput, WalletRpcClient,
};
pub use error::{HarnessError, HarnessResult};
pub use harness::{Harness, HarnessState};
pub use node::{ConsoleNodeFactory, NodeProcess, NodeSpec};
pub use pool::HarnessPool;
pub use ports::{PortAllocator, PortRange};
pub use process::{ProcessHandle, ProcessSettings};
pub use setup::{MAIN_HARNESS_NAME, SetupConfig, TestSetup};
pub use spawner::ChainWithMatureOutputsSpawner;
pub use wallet::{MemWallet, WalletFactory, WalletHandle, WalletSeed, WalletSpec};
pub use workdir::WorkingDir;
