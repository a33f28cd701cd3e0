//! Console-backed node processes.

use std::path::{Path, PathBuf};

use dcrharness_common::{Network, NodeRpcClient, RpcEndpoint};

use crate::error::HarnessResult;
use crate::ports::PortRange;
use crate::process::{ConsoleProcess, ProcessHandle, ProcessSettings, resolve_executable};

/// Everything needed to launch one node.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub network: Network,
    /// Harness directory; the node uses `node/` and `logs/` below it.
    pub harness_dir: PathBuf,
    pub ports: PortRange,
    pub rpc_user: String,
    pub rpc_pass: String,
    pub mining_address: Option<String>,
    pub extra_args: Vec<String>,
    pub debug_output: bool,
    pub settings: ProcessSettings,
}

/// Creates [`NodeProcess`]es running one node executable.
#[derive(Debug, Clone)]
pub struct ConsoleNodeFactory {
    executable: PathBuf,
}

impl ConsoleNodeFactory {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Resolve the executable and build the command line. Nothing runs yet.
    pub fn create(&self, spec: &NodeSpec) -> HarnessResult<NodeProcess> {
        let program = resolve_executable(&self.executable)?;
        let endpoint =
            RpcEndpoint::localhost(spec.ports.node_rpc(), &spec.rpc_user, &spec.rpc_pass);
        Ok(NodeProcess {
            process: ConsoleProcess::new(
                "node",
                program,
                node_args(spec),
                spec.harness_dir.join("logs"),
                spec.debug_output,
            ),
            rpc: NodeRpcClient::new(endpoint, spec.settings.rpc_timeout),
            network: spec.network,
            settings: spec.settings,
        })
    }
}

#[cfg(test)]
impl NodeProcess {
    /// A node for `spec` that runs `program args` instead of a node binary.
    pub(crate) fn with_command(spec: &NodeSpec, program: PathBuf, args: Vec<String>) -> Self {
        let endpoint =
            RpcEndpoint::localhost(spec.ports.node_rpc(), &spec.rpc_user, &spec.rpc_pass);
        NodeProcess {
            process: ConsoleProcess::new(
                "node",
                program,
                args,
                spec.harness_dir.join("logs"),
                spec.debug_output,
            ),
            rpc: NodeRpcClient::new(endpoint, spec.settings.rpc_timeout),
            network: spec.network,
            settings: spec.settings,
        }
    }
}

/// Node command line for `spec`.
pub fn node_args(spec: &NodeSpec) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(flag) = spec.network.params().cli_flag {
        args.push(flag.to_string());
    }
    args.push(format!("--datadir={}", spec.harness_dir.join("node").display()));
    args.push(format!("--logdir={}", spec.harness_dir.join("logs").display()));
    args.push(format!("--listen=127.0.0.1:{}", spec.ports.node_peer()));
    args.push(format!("--rpclisten=127.0.0.1:{}", spec.ports.node_rpc()));
    args.push(format!("--rpcuser={}", spec.rpc_user));
    args.push(format!("--rpcpass={}", spec.rpc_pass));
    args.push("--notls".to_string());
    if let Some(address) = &spec.mining_address {
        args.push(format!("--miningaddr={address}"));
    }
    args.push(format!("--debuglevel={}", debug_level(spec.debug_output)));
    args.extend(spec.extra_args.iter().cloned());
    args
}

pub(crate) fn debug_level(debug_output: bool) -> &'static str {
    if debug_output { "debug" } else { "info" }
}

/// A running (or runnable) node and its RPC client.
#[derive(Debug)]
pub struct NodeProcess {
    process: ConsoleProcess,
    rpc: NodeRpcClient,
    network: Network,
    settings: ProcessSettings,
}

impl NodeProcess {
    pub fn rpc_client(&self) -> &NodeRpcClient {
        &self.rpc
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn args(&self) -> &[String] {
        self.process.args()
    }
}

impl ProcessHandle for NodeProcess {
    fn name(&self) -> &str {
        self.process.name()
    }

    fn launch(&mut self) -> HarnessResult<()> {
        self.process.launch().map(|_| ())
    }

    /// Ready once `getbestblock` answers.
    fn wait_ready(&mut self) -> HarnessResult<()> {
        let rpc = self.rpc.clone();
        self.process.wait_ready(self.settings.ready_timeout, || {
            rpc.get_best_block().map(|_| ()).map_err(|err| err.to_string())
        })
    }

    fn stop(&mut self) -> HarnessResult<()> {
        self.process.terminate(self.settings.stop_grace)
    }

    fn is_running(&mut self) -> bool {
        self.process.is_running()
    }
}
