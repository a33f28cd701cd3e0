use std::path::{Path, PathBuf};

use dcrharness_common::{Network, RpcEndpoint, UnspentOutput, WalletRpcClient};
use tracing::warn;

use super::WalletSpec;
use crate::error::HarnessResult;
use crate::node::debug_level;
use crate::process::{ConsoleProcess, ProcessHandle, ProcessSettings, resolve_executable};

/// Creates [`ConsoleWallet`]s running one wallet executable.
#[derive(Debug, Clone)]
pub struct ConsoleWalletFactory {
    executable: PathBuf,
}

impl ConsoleWalletFactory {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn create(&self, spec: &WalletSpec) -> HarnessResult<ConsoleWallet> {
        let program = resolve_executable(&self.executable)?;
        let endpoint =
            RpcEndpoint::localhost(spec.ports.wallet_rpc(), &spec.rpc_user, &spec.rpc_pass);
        Ok(ConsoleWallet {
            process: ConsoleProcess::new(
                "wallet",
                program,
                wallet_args(spec),
                spec.harness_dir.join("logs"),
                spec.debug_output,
            ),
            rpc: WalletRpcClient::new(endpoint, spec.settings.rpc_timeout),
            network: spec.network,
            mining_address: spec.mining_address(),
            settings: spec.settings,
        })
    }
}

/// Wallet command line for `spec`.
pub fn wallet_args(spec: &WalletSpec) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(flag) = spec.network.params().cli_flag {
        args.push(flag.to_string());
    }
    args.push(format!("--appdata={}", spec.harness_dir.join("wallet").display()));
    args.push(format!("--logdir={}", spec.harness_dir.join("logs").display()));
    args.push(format!("--rpclisten=127.0.0.1:{}", spec.ports.wallet_rpc()));
    args.push(format!("--rpcconnect=127.0.0.1:{}", spec.ports.node_rpc()));
    args.push(format!("--username={}", spec.rpc_user));
    args.push(format!("--password={}", spec.rpc_pass));
    args.push("--noservertls".to_string());
    args.push("--noclienttls".to_string());
    args.push(format!("--seed={}", spec.seed.to_hex()));
    args.push(format!("--debuglevel={}", debug_level(spec.debug_output)));
    args
}

/// A wallet running as its own process.
#[derive(Debug)]
pub struct ConsoleWallet {
    process: ConsoleProcess,
    rpc: WalletRpcClient,
    network: Network,
    mining_address: String,
    settings: ProcessSettings,
}

impl ConsoleWallet {
    pub fn mining_address(&self) -> &str {
        &self.mining_address
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn rpc_client(&self) -> &WalletRpcClient {
        &self.rpc
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn spendable_outputs(&self) -> HarnessResult<Vec<UnspentOutput>> {
        Ok(self.rpc.list_unspent(1)?)
    }
}

impl ProcessHandle for ConsoleWallet {
    fn name(&self) -> &str {
        self.process.name()
    }

    fn launch(&mut self) -> HarnessResult<()> {
        self.process.launch().map(|_| ())
    }

    /// Ready once `walletinfo` reports the node connection.
    fn wait_ready(&mut self) -> HarnessResult<()> {
        let rpc = self.rpc.clone();
        let expected = self.mining_address.clone();
        self.process
            .wait_ready(self.settings.ready_timeout, || match rpc.wallet_info() {
                Ok(info) if info.daemon_connected => {
                    if info.mining_address != expected {
                        warn!(
                            reported = %info.mining_address,
                            expected = %expected,
                            "Wallet reports a different mining address"
                        );
                    }
                    Ok(())
                }
                Ok(_) => Err("wallet not yet connected to node".to_string()),
                Err(err) => Err(err.to_string()),
            })
    }

    fn stop(&mut self) -> HarnessResult<()> {
        self.process.terminate(self.settings.stop_grace)
    }

    fn is_running(&mut self) -> bool {
        self.process.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::ports::PortRange;
    use crate::wallet::WalletSeed;

    fn spec() -> WalletSpec {
        WalletSpec {
            network: Network::Simnet,
            harness_dir: PathBuf::from("/tmp/h/s-20010"),
            ports: PortRange {
                first: 20010,
                last: 20019,
            },
            rpc_user: "user".to_string(),
            rpc_pass: "pass".to_string(),
            seed: WalletSeed::new([7u8; 32]),
            debug_output: true,
            settings: ProcessSettings::default(),
        }
    }

    #[test]
    fn test_simnet_args() {
        let args = wallet_args(&spec());
        assert_eq!(args[0], "--simnet");
        assert!(args.contains(&"--appdata=/tmp/h/s-20010/wallet".to_string()));
        assert!(args.contains(&"--rpclisten=127.0.0.1:20012".to_string()));
        assert!(args.contains(&"--rpcconnect=127.0.0.1:20010".to_string()));
        assert!(args.contains(&"--username=user".to_string()));
        assert!(args.contains(&"--password=pass".to_string()));
        assert!(args.contains(&"--noservertls".to_string()));
        assert!(args.contains(&"--noclienttls".to_string()));
        assert!(args.contains(&format!("--seed={}", "07".repeat(32))));
        assert!(args.contains(&"--debuglevel=debug".to_string()));
    }

    #[test]
    fn test_create_with_missing_executable() {
        let factory = ConsoleWalletFactory::new("/nonexistent/dcrwallet");
        let err = factory.create(&spec()).unwrap_err();
        assert!(matches!(err, HarnessError::ExecutableNotFound(_)));
    }
}
