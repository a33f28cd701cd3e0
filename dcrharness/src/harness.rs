//! One node plus one wallet, started and stopped as a unit.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dcrharness_common::{Network, NodeRpcClient, UnspentOutput};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::node::NodeProcess;
use crate::ports::PortRange;
use crate::process::ProcessHandle;
use crate::wallet::WalletHandle;

/// Lifecycle states, in the only order a harness moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarnessState {
    Created,
    NodeStarting,
    NodeReady,
    WalletStarting,
    WalletReady,
    RpcConnected,
    Running,
    Stopping,
    Stopped,
}

impl HarnessState {
    pub fn as_str(self) -> &'static str {
        match self {
            HarnessState::Created => "created",
            HarnessState::NodeStarting => "starting node",
            HarnessState::NodeReady => "node ready",
            HarnessState::WalletStarting => "starting wallet",
            HarnessState::WalletReady => "wallet ready",
            HarnessState::RpcConnected => "connecting RPC",
            HarnessState::Running => "running",
            HarnessState::Stopping => "stopping",
            HarnessState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: HarnessState,
    node: NodeProcess,
    wallet: WalletHandle,
    /// Present exactly while `Running`.
    rpc: Option<NodeRpcClient>,
}

/// A node/wallet pair on one network with its own ports and directory.
#[derive(Debug)]
pub struct Harness {
    name: String,
    network: Network,
    working_dir: PathBuf,
    ports: PortRange,
    mining_address: String,
    lifecycle: Mutex<Lifecycle>,
}

impl Harness {
    pub fn new(
        name: impl Into<String>,
        network: Network,
        working_dir: PathBuf,
        ports: PortRange,
        node: NodeProcess,
        wallet: WalletHandle,
    ) -> Self {
        Self {
            name: name.into(),
            network,
            working_dir,
            ports,
            mining_address: wallet.mining_address().to_string(),
            lifecycle: Mutex::new(Lifecycle {
                state: HarnessState::Created,
                node,
                wallet,
                rpc: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn ports(&self) -> PortRange {
        self.ports
    }

    pub fn mining_address(&self) -> &str {
        &self.mining_address
    }

    pub fn state(&self) -> HarnessState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == HarnessState::Running
    }

    /// Bring the node up, then the wallet, then cache the RPC client.
    ///
    /// On failure everything already started is stopped again, the harness
    /// ends `Stopped`, and the error names the stage that failed.
    pub fn start(&self) -> HarnessResult<()> {
        let mut lifecycle = self.lock();
        if lifecycle.state != HarnessState::Created {
            return Err(HarnessError::InvalidState {
                harness: self.name.clone(),
                expected: HarnessState::Created,
                actual: lifecycle.state,
            });
        }

        info!(harness = %self.name, network = %self.network, ports = %self.ports, "Starting harness");
        match self.bring_up(&mut lifecycle) {
            Ok(()) => {
                info!(harness = %self.name, "Harness running");
                Ok(())
            }
            Err(err) => {
                let stage = lifecycle.state;
                warn!(harness = %self.name, %stage, error = %err, "Harness start failed, cleaning up");
                lifecycle.rpc = None;
                for failure in shut_down(&mut lifecycle) {
                    warn!(harness = %self.name, error = %failure, "Cleanup after failed start");
                }
                lifecycle.state = HarnessState::Stopped;
                Err(err.at_stage(&self.name, stage))
            }
        }
    }

    fn bring_up(&self, lifecycle: &mut Lifecycle) -> HarnessResult<()> {
        self.advance(lifecycle, HarnessState::NodeStarting);
        lifecycle.node.launch()?;
        lifecycle.node.wait_ready()?;
        self.advance(lifecycle, HarnessState::NodeReady);

        self.advance(lifecycle, HarnessState::WalletStarting);
        lifecycle.wallet.launch()?;
        lifecycle.wallet.wait_ready()?;
        self.advance(lifecycle, HarnessState::WalletReady);

        self.advance(lifecycle, HarnessState::RpcConnected);
        let rpc = lifecycle.node.rpc_client().clone();
        let best = rpc.get_best_block()?;
        debug!(harness = %self.name, height = best.height, hash = %best.hash, "Node RPC connected");
        lifecycle.rpc = Some(rpc);

        self.advance(lifecycle, HarnessState::Running);
        Ok(())
    }

    fn advance(&self, lifecycle: &mut Lifecycle, next: HarnessState) {
        debug!(harness = %self.name, from = %lifecycle.state, to = %next, "Harness state change");
        lifecycle.state = next;
    }

    /// Stop the wallet, then the node.
    ///
    /// Both are always attempted; failures are collected into
    /// `StopFailed`. Stopping a stopped harness does nothing.
    pub fn stop(&self) -> HarnessResult<()> {
        let mut lifecycle = self.lock();
        match lifecycle.state {
            HarnessState::Stopped => return Ok(()),
            HarnessState::Created => {
                lifecycle.state = HarnessState::Stopped;
                return Ok(());
            }
            _ => {}
        }

        info!(harness = %self.name, "Stopping harness");
        self.advance(&mut lifecycle, HarnessState::Stopping);
        lifecycle.rpc = None;
        let errors = shut_down(&mut lifecycle);
        self.advance(&mut lifecycle, HarnessState::Stopped);

        if errors.is_empty() {
            info!(harness = %self.name, "Harness stopped");
            Ok(())
        } else {
            Err(HarnessError::StopFailed {
                harness: self.name.clone(),
                errors,
            })
        }
    }

    /// The shared node RPC client. Only available while running.
    pub fn node_rpc_client(&self) -> HarnessResult<NodeRpcClient> {
        let lifecycle = self.lock();
        match (&lifecycle.rpc, lifecycle.state) {
            (Some(rpc), HarnessState::Running) => Ok(rpc.clone()),
            (_, state) => Err(HarnessError::NotRunning {
                harness: self.name.clone(),
                state,
            }),
        }
    }

    /// Every unspent output the wallet holds.
    pub fn wallet_outputs(&self) -> HarnessResult<Vec<UnspentOutput>> {
        let lifecycle = self.running()?;
        lifecycle.wallet.spendable_outputs()
    }

    /// Wallet outputs past coinbase maturity.
    pub fn mature_outputs(&self) -> HarnessResult<Vec<UnspentOutput>> {
        let lifecycle = self.running()?;
        lifecycle.wallet.mature_outputs()
    }

    /// PIDs of the node and (console) wallet processes, when running.
    pub fn pids(&self) -> (Option<u32>, Option<u32>) {
        let lifecycle = self.lock();
        let wallet = match &lifecycle.wallet {
            WalletHandle::Console(wallet) => wallet.pid(),
            WalletHandle::Memory(_) => None,
        };
        (lifecycle.node.pid(), wallet)
    }

    fn running(&self) -> HarnessResult<MutexGuard<'_, Lifecycle>> {
        let lifecycle = self.lock();
        if lifecycle.state == HarnessState::Running {
            Ok(lifecycle)
        } else {
            Err(HarnessError::NotRunning {
                harness: self.name.clone(),
                state: lifecycle.state,
            })
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wallet first, then node. Returns every failure.
fn shut_down(lifecycle: &mut Lifecycle) -> Vec<HarnessError> {
    let mut errors = Vec::new();
    if let Err(err) = lifecycle.wallet.stop() {
        errors.push(err);
    }
    if let Err(err) = lifecycle.node.stop() {
        errors.push(err);
    }
    errors
}

impl Drop for Harness {
    fn drop(&mut self) {
        let state = self.state();
        if state != HarnessState::Stopped && state != HarnessState::Created {
            if let Err(err) = self.stop() {
                warn!(harness = %self.name, error = %err, "Failed to stop harness on drop");
            }
        }
    }
}

/// Harnesses whose node RPC is an in-process simulated node.
#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use dcrharness_common::Network;

    use super::Harness;
    use crate::node::{NodeProcess, NodeSpec};
    use crate::ports::PortRange;
    use crate::process::ProcessSettings;
    use crate::sim::{BackgroundServer, SimNode};
    use crate::wallet::{MemWallet, WalletHandle, WalletSeed};

    pub(crate) fn sim_node_server() -> BackgroundServer {
        BackgroundServer::start(Arc::new(SimNode::new(Network::Regnet, None)), "u", "p").unwrap()
    }

    /// A started harness named `name`. The node process is `sleep`, its
    /// RPC is `server`, and the wallet is in-memory.
    pub(crate) fn running_harness(
        name: &str,
        dir: &Path,
        server: &BackgroundServer,
        fail_wallet_stop: bool,
    ) -> Harness {
        let ports = PortRange {
            first: server.port(),
            last: server.port(),
        };
        let harness_dir = dir.join(name);
        let spec = NodeSpec {
            network: Network::Regnet,
            harness_dir: harness_dir.clone(),
            ports,
            rpc_user: "u".to_string(),
            rpc_pass: "p".to_string(),
            mining_address: None,
            extra_args: Vec::new(),
            debug_output: false,
            settings: ProcessSettings {
                ready_timeout: Duration::from_secs(5),
                stop_grace: Duration::from_secs(2),
                rpc_timeout: Duration::from_secs(2),
            },
        };
        let node = NodeProcess::with_command(
            &spec,
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), "exec sleep 30".to_string()],
        );
        let wallet = MemWallet::new(
            Network::Regnet,
            WalletSeed::from_name(name).mining_address(Network::Regnet),
            node.rpc_client().clone(),
        );
        if fail_wallet_stop {
            wallet.fail_stops();
        }

        let harness = Harness::new(
            name,
            Network::Regnet,
            harness_dir,
            ports,
            node,
            WalletHandle::Memory(wallet),
        );
        harness.start().unwrap();
        harness
    }

    /// Whether a process with `pid` still exists.
    pub(crate) fn pid_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::node::{ConsoleNodeFactory, NodeSpec};
    use crate::process::ProcessSettings;
    use crate::wallet::{WalletFactory, WalletSeed, WalletSpec};
    use std::time::Duration;

    fn settings() -> ProcessSettings {
        ProcessSettings {
            ready_timeout: Duration::from_millis(300),
            stop_grace: Duration::from_millis(500),
            rpc_timeout: Duration::from_millis(200),
        }
    }

    /// A harness whose "node" is `sleep`, which rejects the node flags and
    /// exits without ever answering RPC.
    fn unreachable_harness(dir: &Path) -> Harness {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);
        let ports = PortRange {
            first: port,
            last: port,
        };

        let node_spec = NodeSpec {
            network: Network::Regnet,
            harness_dir: dir.to_path_buf(),
            ports,
            rpc_user: "u".to_string(),
            rpc_pass: "p".to_string(),
            mining_address: None,
            extra_args: Vec::new(),
            debug_output: false,
            settings: settings(),
        };
        let node = ConsoleNodeFactory::new("sleep").create(&node_spec).unwrap();

        let wallet_spec = WalletSpec {
            network: Network::Regnet,
            harness_dir: dir.to_path_buf(),
            ports,
            rpc_user: "u".to_string(),
            rpc_pass: "p".to_string(),
            seed: WalletSeed::from_name("unit"),
            debug_output: false,
            settings: settings(),
        };
        let wallet = WalletFactory::memory()
            .create(&wallet_spec, node.rpc_client())
            .unwrap();

        Harness::new("unit", Network::Regnet, dir.to_path_buf(), ports, node, wallet)
    }

    #[test]
    fn test_rpc_client_unavailable_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let harness = unreachable_harness(dir.path());
        assert_eq!(harness.state(), HarnessState::Created);
        let err = harness.node_rpc_client().unwrap_err();
        assert!(matches!(
            err,
            HarnessError::NotRunning {
                state: HarnessState::Created,
                ..
            }
        ));
        assert!(harness.mining_address().starts_with("Rs"));
    }

    #[test]
    fn test_failed_start_ends_stopped_with_stage() {
        let dir = tempfile::tempdir().unwrap();
        let harness = unreachable_harness(dir.path());

        let err = harness.start().unwrap_err();
        match &err {
            HarnessError::Stage { harness, stage, .. } => {
                assert_eq!(harness, "unit");
                assert_eq!(*stage, HarnessState::NodeStarting);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            err.root(),
            HarnessError::ProcessExited { .. } | HarnessError::NotReady { .. }
        ));
        assert_eq!(harness.state(), HarnessState::Stopped);
        assert_eq!(harness.pids(), (None, None));

        // Restarting a stopped harness is refused; stopping is a no-op.
        assert!(matches!(
            harness.start().unwrap_err(),
            HarnessError::InvalidState { .. }
        ));
        harness.stop().unwrap();
    }

    #[test]
    fn test_stop_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let harness = unreachable_harness(dir.path());
        harness.stop().unwrap();
        assert_eq!(harness.state(), HarnessState::Stopped);
        assert!(harness.wallet_outputs().is_err());
    }

    #[test]
    fn test_wallet_stop_failure_still_stops_node() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_support::sim_node_server();
        let harness = test_support::running_harness("stubborn", dir.path(), &server, true);
        assert!(harness.is_running());
        let node_pid = harness.pids().0.unwrap();
        assert!(test_support::pid_alive(node_pid));

        let err = harness.stop().unwrap_err();
        match &err {
            HarnessError::StopFailed { harness, errors } => {
                assert_eq!(harness, "stubborn");
                assert_eq!(errors.len(), 1);
                assert!(matches!(errors[0], HarnessError::Io(_)), "{}", errors[0]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(harness.state(), HarnessState::Stopped);
        assert_eq!(harness.pids(), (None, None));
        assert!(!test_support::pid_alive(node_pid));

        // Already stopped: nothing left to fail.
        harness.stop().unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(HarnessState::NodeStarting.to_string(), "starting node");
        assert_eq!(HarnessState::Running.to_string(), "running");
    }
}
