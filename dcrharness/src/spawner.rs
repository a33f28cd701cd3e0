//! Builds harnesses whose wallet already holds mature coinbase outputs.

use std::path::PathBuf;
use std::sync::Arc;

use dcrharness_common::Network;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::harness::Harness;
use crate::node::{ConsoleNodeFactory, NodeSpec};
use crate::ports::PortAllocator;
use crate::process::ProcessSettings;
use crate::wallet::{WalletFactory, WalletSeed, WalletSpec};
use crate::workdir::sanitize_component;

/// Default sanity bound on blocks generated for one harness.
pub const DEFAULT_MAX_GENERATED_BLOCKS: u64 = 10_000;

/// Default number of blocks requested per `generate` call.
pub const DEFAULT_GENERATE_BATCH: u64 = 64;

/// Immutable recipe for a funded harness.
///
/// Every [`spawn`](Self::spawn) produces a new, independent harness; the
/// spawner itself keeps no per-harness state.
#[derive(Debug, Clone)]
pub struct ChainWithMatureOutputsSpawner {
    pub network: Network,
    pub num_mature_outputs: usize,
    pub node_factory: ConsoleNodeFactory,
    pub wallet_factory: WalletFactory,
    pub ports: Arc<PortAllocator>,
    pub working_dir: PathBuf,
    pub node_extra_args: Vec<String>,
    pub debug_node_output: bool,
    pub debug_wallet_output: bool,
    pub settings: ProcessSettings,
    pub max_generated_blocks: u64,
    pub generate_batch: u64,
    pub rpc_user: String,
    pub rpc_pass: String,
}

impl ChainWithMatureOutputsSpawner {
    pub fn new(
        network: Network,
        num_mature_outputs: usize,
        node_factory: ConsoleNodeFactory,
        wallet_factory: WalletFactory,
        ports: Arc<PortAllocator>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            network,
            num_mature_outputs,
            node_factory,
            wallet_factory,
            ports,
            working_dir: working_dir.into(),
            node_extra_args: Vec::new(),
            debug_node_output: false,
            debug_wallet_output: false,
            settings: ProcessSettings::default(),
            max_generated_blocks: DEFAULT_MAX_GENERATED_BLOCKS,
            generate_batch: DEFAULT_GENERATE_BATCH,
            rpc_user: "dcrharness".to_string(),
            rpc_pass: "dcrharness".to_string(),
        }
    }

    pub fn with_node_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_debug_output(mut self, node: bool, wallet: bool) -> Self {
        self.debug_node_output = node;
        self.debug_wallet_output = wallet;
        self
    }

    pub fn with_settings(mut self, settings: ProcessSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_generation_bounds(mut self, max_generated_blocks: u64, generate_batch: u64) -> Self {
        self.max_generated_blocks = max_generated_blocks;
        self.generate_batch = generate_batch.max(1);
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.rpc_user = user.into();
        self.rpc_pass = pass.into();
        self
    }

    /// Create, start and fund a new harness called `name`.
    pub fn spawn(&self, name: &str) -> HarnessResult<Harness> {
        if self.num_mature_outputs > 0 && !self.network.params().supports_generate {
            return Err(HarnessError::Config(vec![format!(
                "{} mature outputs requested on {}, which cannot generate blocks",
                self.num_mature_outputs, self.network
            )]));
        }

        let ports = self.ports.allocate_range()?;
        let harness_dir = self
            .working_dir
            .join(format!("{}-{}", sanitize_component(name), ports.first));
        std::fs::create_dir_all(&harness_dir).map_err(|source| HarnessError::WorkingDir {
            path: harness_dir.clone(),
            source,
        })?;

        let wallet_spec = WalletSpec {
            network: self.network,
            harness_dir: harness_dir.clone(),
            ports,
            rpc_user: self.rpc_user.clone(),
            rpc_pass: self.rpc_pass.clone(),
            seed: WalletSeed::from_name(name),
            debug_output: self.debug_wallet_output,
            settings: self.settings,
        };
        let node_spec = NodeSpec {
            network: self.network,
            harness_dir: harness_dir.clone(),
            ports,
            rpc_user: self.rpc_user.clone(),
            rpc_pass: self.rpc_pass.clone(),
            mining_address: Some(wallet_spec.mining_address()),
            extra_args: self.node_extra_args.clone(),
            debug_output: self.debug_node_output,
            settings: self.settings,
        };

        let node = self.node_factory.create(&node_spec)?;
        let wallet = self.wallet_factory.create(&wallet_spec, node.rpc_client())?;
        let harness = Harness::new(name, self.network, harness_dir, ports, node, wallet);

        harness.start()?;
        if let Err(err) = self.fund(&harness) {
            warn!(harness = %name, error = %err, "Funding failed, stopping harness");
            if let Err(stop_err) = harness.stop() {
                warn!(harness = %name, error = %stop_err, "Failed to stop harness after funding error");
            }
            return Err(err);
        }

        info!(
            harness = %name,
            network = %self.network,
            ports = %ports,
            mature_outputs = self.num_mature_outputs,
            "Harness spawned"
        );
        Ok(harness)
    }

    /// Generate blocks until the wallet holds the target number of mature
    /// outputs.
    fn fund(&self, harness: &Harness) -> HarnessResult<()> {
        let target = self.num_mature_outputs;
        if target == 0 {
            return Ok(());
        }

        let rpc = harness.node_rpc_client()?;
        let maturity = self.network.coinbase_maturity();
        let mut generated = 0u64;
        loop {
            let mature = harness.mature_outputs()?.len();
            if mature >= target {
                debug!(harness = %harness.name(), mature, generated, "Maturity target reached");
                return Ok(());
            }
            if generated >= self.max_generated_blocks {
                return Err(HarnessError::GenerationBoundExceeded {
                    harness: harness.name().to_string(),
                    generated,
                    limit: self.max_generated_blocks,
                    mature,
                    target,
                });
            }

            let height = rpc.get_block_count()?;
            let batch = generation_batch(
                target as u64,
                maturity,
                height,
                self.generate_batch,
                self.max_generated_blocks - generated,
            );
            debug!(harness = %harness.name(), height, batch, mature, "Generating blocks");
            rpc.generate(batch)?;
            generated += batch;
        }
    }
}

/// Blocks to request next.
///
/// `target` mature outputs need the chain at height `target + maturity`;
/// at least one block is always requested so a wallet that missed some
/// coinbases still converges, bounded by `batch` and `remaining`.
pub fn generation_batch(target: u64, maturity: u64, height: u64, batch: u64, remaining: u64) -> u64 {
    (target + maturity)
        .saturating_sub(height)
        .max(1)
        .min(batch.max(1))
        .min(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_from_genesis() {
        assert_eq!(generation_batch(25, 16, 0, 64, 10_000), 41);
        assert_eq!(generation_batch(25, 16, 0, 10, 10_000), 10);
        assert_eq!(generation_batch(25, 16, 0, 64, 5), 5);
    }

    #[test]
    fn test_batch_never_zero_when_behind() {
        assert_eq!(generation_batch(1, 16, 17, 64, 100), 1);
        assert_eq!(generation_batch(1, 16, 100, 64, 100), 1);
        assert_eq!(generation_batch(5, 16, 0, 0, 100), 1);
    }

    #[test]
    fn test_spawn_with_missing_node_executable() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = ChainWithMatureOutputsSpawner::new(
            Network::Regnet,
            0,
            ConsoleNodeFactory::new("/nonexistent/dcrd"),
            WalletFactory::memory(),
            Arc::new(PortAllocator::new(33000, 10)),
            dir.path(),
        );
        let err = spawner.spawn("missing").unwrap_err();
        assert!(matches!(err, HarnessError::ExecutableNotFound(_)));
    }

    #[test]
    fn test_spawn_rejects_outputs_on_non_generating_network() {
        let dir = tempfile::tempdir().unwrap();
        let ports = Arc::new(PortAllocator::new(33200, 10));
        let spawner = ChainWithMatureOutputsSpawner::new(
            Network::Mainnet,
            5,
            ConsoleNodeFactory::new("/nonexistent/dcrd"),
            WalletFactory::memory(),
            Arc::clone(&ports),
            dir.path(),
        );
        let err = spawner.spawn("mainnet").unwrap_err();
        match err {
            HarnessError::Config(problems) => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].contains("mainnet"), "{}", problems[0]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Rejected before any port or directory was taken.
        assert_eq!(ports.issued(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_builders() {
        let spawner = ChainWithMatureOutputsSpawner::new(
            Network::Simnet,
            1,
            ConsoleNodeFactory::new("dcrd"),
            WalletFactory::console("dcrwallet"),
            Arc::new(PortAllocator::new(33100, 10)),
            "/tmp/x",
        )
        .with_node_args(["--rejectnonstd"])
        .with_debug_output(true, false)
        .with_generation_bounds(50, 0)
        .with_credentials("a", "b");
        assert_eq!(spawner.node_extra_args, vec!["--rejectnonstd"]);
        assert!(spawner.debug_node_output);
        assert!(!spawner.debug_wallet_output);
        assert_eq!(spawner.generate_batch, 1);
        assert_eq!(spawner.max_generated_blocks, 50);
        assert_eq!(spawner.rpc_user, "a");
        assert!(spawner.wallet_factory.is_console());
    }
}
