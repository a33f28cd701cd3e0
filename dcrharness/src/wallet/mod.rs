//! Wallet handles: a console-backed wallet process or an in-memory wallet
//! that scans the node's chain itself.

mod console;
mod memory;

use std::fmt;
use std::path::{Path, PathBuf};

use dcrharness_common::{Network, NodeRpcClient, UnspentOutput};

use crate::error::HarnessResult;
use crate::ports::PortRange;
use crate::process::{ProcessHandle, ProcessSettings};

pub use console::{ConsoleWallet, ConsoleWalletFactory, wallet_args};
pub use memory::MemWallet;

/// 32-byte wallet seed. The mining address is derived from it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalletSeed([u8; 32]);

impl WalletSeed {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Deterministic seed for a harness name.
    pub fn from_name(name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"dcrharness-wallet-seed:");
        hasher.update(name.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn mining_address(&self, network: Network) -> String {
        network.mining_address(&self.0)
    }
}

impl fmt::Debug for WalletSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WalletSeed(***)")
    }
}

/// Everything needed to create one wallet.
#[derive(Debug, Clone)]
pub struct WalletSpec {
    pub network: Network,
    /// Harness directory; console wallets use `wallet/` and `logs/` below it.
    pub harness_dir: PathBuf,
    pub ports: PortRange,
    pub rpc_user: String,
    pub rpc_pass: String,
    pub seed: WalletSeed,
    pub debug_output: bool,
    pub settings: ProcessSettings,
}

impl WalletSpec {
    pub fn mining_address(&self) -> String {
        self.seed.mining_address(self.network)
    }
}

/// The closed set of wallet kinds a spawner can create.
#[derive(Debug, Clone)]
pub enum WalletFactory {
    Console(ConsoleWalletFactory),
    Memory,
}

impl WalletFactory {
    pub fn console(executable: impl Into<PathBuf>) -> Self {
        WalletFactory::Console(ConsoleWalletFactory::new(executable))
    }

    pub fn memory() -> Self {
        WalletFactory::Memory
    }

    pub fn is_console(&self) -> bool {
        matches!(self, WalletFactory::Console(_))
    }

    /// Build a wallet handle; nothing runs until the harness launches it.
    ///
    /// `node` is the node the wallet will attach to.
    pub fn create(&self, spec: &WalletSpec, node: &NodeRpcClient) -> HarnessResult<WalletHandle> {
        match self {
            WalletFactory::Console(factory) => factory.create(spec).map(WalletHandle::Console),
            WalletFactory::Memory => Ok(WalletHandle::Memory(MemWallet::new(
                spec.network,
                spec.mining_address(),
                node.clone(),
            ))),
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        match self {
            WalletFactory::Console(factory) => Some(factory.executable()),
            WalletFactory::Memory => None,
        }
    }
}

/// A wallet owned by one harness.
#[derive(Debug)]
pub enum WalletHandle {
    Console(ConsoleWallet),
    Memory(MemWallet),
}

impl WalletHandle {
    /// Address coinbases must pay for this wallet to see them. Known before
    /// the wallet starts.
    pub fn mining_address(&self) -> &str {
        match self {
            WalletHandle::Console(wallet) => wallet.mining_address(),
            WalletHandle::Memory(wallet) => wallet.mining_address(),
        }
    }

    pub fn network(&self) -> Network {
        match self {
            WalletHandle::Console(wallet) => wallet.network(),
            WalletHandle::Memory(wallet) => wallet.network(),
        }
    }

    /// Unspent outputs with at least one confirmation.
    pub fn spendable_outputs(&self) -> HarnessResult<Vec<UnspentOutput>> {
        match self {
            WalletHandle::Console(wallet) => wallet.spendable_outputs(),
            WalletHandle::Memory(wallet) => wallet.spendable_outputs(),
        }
    }

    /// Outputs buried at least coinbase-maturity blocks deep.
    pub fn mature_outputs(&self) -> HarnessResult<Vec<UnspentOutput>> {
        let network = self.network();
        Ok(self
            .spendable_outputs()?
            .into_iter()
            .filter(|output| is_mature_output(network, output))
            .collect())
    }
}

/// `confirmations = tip - height + 1`, so this is `tip - height >= maturity`.
pub fn is_mature_output(network: Network, output: &UnspentOutput) -> bool {
    output.confirmations > network.coinbase_maturity()
}

impl ProcessHandle for WalletHandle {
    fn name(&self) -> &str {
        match self {
            WalletHandle::Console(wallet) => wallet.name(),
            WalletHandle::Memory(wallet) => wallet.name(),
        }
    }

    fn launch(&mut self) -> HarnessResult<()> {
        match self {
            WalletHandle::Console(wallet) => wallet.launch(),
            WalletHandle::Memory(wallet) => wallet.launch(),
        }
    }

    fn wait_ready(&mut self) -> HarnessResult<()> {
        match self {
            WalletHandle::Console(wallet) => wallet.wait_ready(),
            WalletHandle::Memory(wallet) => wallet.wait_ready(),
        }
    }

    fn stop(&mut self) -> HarnessResult<()> {
        match self {
            WalletHandle::Console(wallet) => wallet.stop(),
            WalletHandle::Memory(wallet) => wallet.stop(),
        }
    }

    fn is_running(&mut self) -> bool {
        match self {
            WalletHandle::Console(wallet) => wallet.is_running(),
            WalletHandle::Memory(wallet) => wallet.is_running(),
        }
    }
}
