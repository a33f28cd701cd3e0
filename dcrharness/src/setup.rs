//! The shared test setup: seven preconfigured spawners, one working
//! directory, one pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dcrharness_common::Network;
use dcrharness_common::config::{EnvParser, Sourced};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::harness::Harness;
use crate::node::ConsoleNodeFactory;
use crate::pool::HarnessPool;
use crate::ports::{MIN_PORT_STRIDE, PortAllocator};
use crate::process::ProcessSettings;
use crate::spawner::{
    ChainWithMatureOutputsSpawner, DEFAULT_GENERATE_BATCH, DEFAULT_MAX_GENERATED_BLOCKS,
};
use crate::wallet::WalletFactory;
use crate::workdir::{WorkingDir, default_base_dir};

/// Name most tests use for their harness.
pub const MAIN_HARNESS_NAME: &str = "main";

/// Default first port handed out by the allocator.
pub const DEFAULT_BASE_PORT: u16 = 20000;

/// Default ports reserved per harness.
pub const DEFAULT_PORT_STRIDE: u16 = 10;

const REJECT_NON_STD: &str = "--rejectnonstd";

/// Everything [`TestSetup`] needs.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    pub node_executable: PathBuf,
    pub wallet_executable: PathBuf,
    pub base_port: u16,
    pub port_stride: u16,
    /// Skip port blocks another process already holds.
    pub probe_ports: bool,
    pub settings: ProcessSettings,
    pub max_generated_blocks: u64,
    pub generate_batch: u64,
    /// Send process stdout/stderr to per-harness log files.
    pub debug_output: bool,
    /// Leave the working directory behind after teardown.
    pub keep_workdir: bool,
    pub rpc_user: String,
    pub rpc_pass: String,
    /// Parent of the working directory.
    pub workdir_base: PathBuf,
    pub workdir_prefix: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            node_executable: PathBuf::from("dcrd"),
            wallet_executable: PathBuf::from("dcrwallet"),
            base_port: DEFAULT_BASE_PORT,
            port_stride: DEFAULT_PORT_STRIDE,
            probe_ports: true,
            settings: ProcessSettings::default(),
            max_generated_blocks: DEFAULT_MAX_GENERATED_BLOCKS,
            generate_batch: DEFAULT_GENERATE_BATCH,
            debug_output: true,
            keep_workdir: false,
            rpc_user: "dcrharness".to_string(),
            rpc_pass: uuid::Uuid::new_v4().simple().to_string(),
            workdir_base: default_base_dir(),
            workdir_prefix: "setup".to_string(),
        }
    }
}

impl SetupConfig {
    /// Defaults overridden by `DCRHARNESS_*` variables.
    ///
    /// Every invalid variable is reported, not just the first.
    pub fn from_env() -> HarnessResult<Self> {
        let defaults = Self::default();
        let mut parser = EnvParser::new();

        let node_executable = parser.get_path("NODE_EXE", "dcrd");
        let wallet_executable = parser.get_path("WALLET_EXE", "dcrwallet");
        let base_port = parser.get_u16_range("BASE_PORT", DEFAULT_BASE_PORT, 1024, u16::MAX);
        let port_stride =
            parser.get_u16_range("PORT_STRIDE", DEFAULT_PORT_STRIDE, MIN_PORT_STRIDE, 1000);
        let ready_timeout = parser.get_duration("READY_TIMEOUT", defaults.settings.ready_timeout);
        let stop_grace = parser.get_duration("STOP_GRACE", defaults.settings.stop_grace);
        let rpc_timeout = parser.get_duration("RPC_TIMEOUT", defaults.settings.rpc_timeout);
        let max_generated_blocks =
            parser.get_u64_range("MAX_BLOCKS", DEFAULT_MAX_GENERATED_BLOCKS, 1, 1_000_000);
        let generate_batch =
            parser.get_u64_range("GENERATE_BATCH", DEFAULT_GENERATE_BATCH, 1, 10_000);
        let debug_output = parser.get_bool("DEBUG_OUTPUT", defaults.debug_output);
        let keep_workdir = parser.get_bool("KEEP_WORKDIR", defaults.keep_workdir);
        let probe_ports = parser.get_bool("PROBE_PORTS", defaults.probe_ports);
        let rpc_user = parser.get_optional_string("RPC_USER");
        let rpc_pass = parser.get_optional_string("RPC_PASS");

        if parser.has_errors() {
            let errors = parser.take_errors();
            return Err(HarnessError::Config(
                errors.iter().map(ToString::to_string).collect(),
            ));
        }

        log_source("NODE_EXE", &node_executable);
        log_source("BASE_PORT", &base_port);

        Ok(Self {
            node_executable: node_executable.into_inner(),
            wallet_executable: wallet_executable.into_inner(),
            base_port: base_port.into_inner(),
            port_stride: port_stride.into_inner(),
            probe_ports: probe_ports.into_inner(),
            settings: ProcessSettings {
                ready_timeout: ready_timeout.into_inner(),
                stop_grace: stop_grace.into_inner(),
                rpc_timeout: rpc_timeout.into_inner(),
            },
            max_generated_blocks: max_generated_blocks.into_inner(),
            generate_batch: generate_batch.into_inner(),
            debug_output: debug_output.into_inner(),
            keep_workdir: keep_workdir.into_inner(),
            rpc_user: rpc_user.into_inner().unwrap_or(defaults.rpc_user),
            rpc_pass: rpc_pass.into_inner().unwrap_or(defaults.rpc_pass),
            workdir_base: defaults.workdir_base,
            workdir_prefix: defaults.workdir_prefix,
        })
    }

    pub fn with_executables(mut self, node: impl Into<PathBuf>, wallet: impl Into<PathBuf>) -> Self {
        self.node_executable = node.into();
        self.wallet_executable = wallet.into();
        self
    }

    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    pub fn with_workdir_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.workdir_base = base.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.settings.ready_timeout = timeout;
        self
    }
}

fn log_source<T: std::fmt::Debug>(name: &str, value: &Sourced<T>) {
    debug!(setting = name, value = ?value.value, source = %value.source, "Setup setting");
}

/// The seven standard spawners, a shared working directory and a pool.
///
/// Nothing starts until a harness is obtained. Dropping the setup tears
/// it down.
#[derive(Debug)]
pub struct TestSetup {
    pub mainnet0: ChainWithMatureOutputsSpawner,
    pub regnet25: ChainWithMatureOutputsSpawner,
    pub regnet5: ChainWithMatureOutputsSpawner,
    pub regnet1: ChainWithMatureOutputsSpawner,
    pub simnet1: ChainWithMatureOutputsSpawner,
    pub regnet0: ChainWithMatureOutputsSpawner,
    pub simnet0: ChainWithMatureOutputsSpawner,
    working_dir: WorkingDir,
    pool: HarnessPool,
    torn_down: AtomicBool,
}

impl TestSetup {
    pub fn new(config: SetupConfig) -> HarnessResult<Self> {
        let working_dir = WorkingDir::create_in(&config.workdir_base, &config.workdir_prefix)?
            .keep(config.keep_workdir);
        let ports = Arc::new(
            PortAllocator::new(config.base_port, config.port_stride).with_probe(config.probe_ports),
        );
        let node = ConsoleNodeFactory::new(&config.node_executable);
        let memory = WalletFactory::memory();
        let console = WalletFactory::console(&config.wallet_executable);

        let spawner = |network: Network, outputs: usize, wallet: &WalletFactory| {
            ChainWithMatureOutputsSpawner::new(
                network,
                outputs,
                node.clone(),
                wallet.clone(),
                Arc::clone(&ports),
                working_dir.path(),
            )
            .with_debug_output(config.debug_output, config.debug_output)
            .with_settings(config.settings)
            .with_generation_bounds(config.max_generated_blocks, config.generate_batch)
            .with_credentials(&config.rpc_user, &config.rpc_pass)
        };

        let mainnet0 = spawner(Network::Mainnet, 0, &memory);
        let regnet25 = spawner(Network::Regnet, 25, &memory);
        let regnet5 = spawner(Network::Regnet, 5, &memory);
        let regnet1 = spawner(Network::Regnet, 1, &memory).with_node_args([REJECT_NON_STD]);
        let simnet1 = spawner(Network::Simnet, 1, &console).with_node_args([REJECT_NON_STD]);
        let regnet0 = spawner(Network::Regnet, 0, &memory);
        let simnet0 = spawner(Network::Simnet, 0, &console);
        let pool = HarnessPool::new(regnet25.clone());

        info!(
            workdir = %working_dir.path().display(),
            base_port = config.base_port,
            node = %config.node_executable.display(),
            wallet = %config.wallet_executable.display(),
            "Test setup ready"
        );

        Ok(Self {
            mainnet0,
            regnet25,
            regnet5,
            regnet1,
            simnet1,
            regnet0,
            simnet0,
            working_dir,
            pool,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn from_env() -> HarnessResult<Self> {
        Self::new(SetupConfig::from_env()?)
    }

    /// The harness called `name`, spawned with Regnet25 on first use.
    pub fn obtain_harness(&self, name: &str) -> HarnessResult<Arc<Harness>> {
        self.pool.obtain(name)
    }

    /// The harness called `name`, spawned with `spawner` on first use.
    pub fn obtain_harness_with(
        &self,
        name: &str,
        spawner: &ChainWithMatureOutputsSpawner,
    ) -> HarnessResult<Arc<Harness>> {
        self.pool.obtain_with(name, spawner)
    }

    pub fn pool(&self) -> &HarnessPool {
        &self.pool
    }

    pub fn working_dir(&self) -> &WorkingDir {
        &self.working_dir
    }

    /// Dispose every harness, then remove the working directory.
    ///
    /// The directory is removed even when some harness failed to stop.
    /// Calls after the first return `Ok(())`.
    pub fn tear_down(&self) -> HarnessResult<()> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(workdir = %self.working_dir.path().display(), "Tearing down test setup");

        let pool_result = self.pool.dispose_all();
        let dir_result = self.working_dir.dispose();
        match (pool_result, dir_result) {
            (Err(err), Err(dir_err)) => {
                warn!(error = %dir_err, "Failed to remove working directory");
                Err(err)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

impl Drop for TestSetup {
    fn drop(&mut self) {
        if let Err(err) = self.tear_down() {
            warn!(error = %err, "Test setup teardown failed");
        }
    }
}
