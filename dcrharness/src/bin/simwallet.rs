//! Simulated wallet.
//!
//! Accepts the wallet command line the harness generates, attaches to the
//! node at `--rpcconnect`, and serves the wallet JSON-RPC methods.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dcrharness::sim::{SimWallet, rpc_router, serve, shutdown_signal};
use dcrharness::wallet::{MemWallet, WalletSeed};
use dcrharness_common::{LogConfig, Network, NodeRpcClient, RpcEndpoint, init_logging};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Delay between attempts to reach the node.
const ATTACH_RETRY: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "dcrharness-simwallet")]
#[command(author, version, about = "Simulated wallet for dcrharness tests")]
struct Cli {
    /// Use the regression test network
    #[arg(long, conflicts_with = "simnet")]
    regnet: bool,

    /// Use the simulation test network
    #[arg(long)]
    simnet: bool,

    /// Application data directory
    #[arg(long)]
    appdata: Option<PathBuf>,

    /// Directory to log output
    #[arg(long)]
    logdir: Option<PathBuf>,

    /// RPC listen address
    #[arg(long)]
    rpclisten: Option<SocketAddr>,

    /// Node RPC address to connect to
    #[arg(long)]
    rpcconnect: SocketAddr,

    /// RPC username, shared with the node
    #[arg(long, default_value = "")]
    username: String,

    /// RPC password, shared with the node
    #[arg(long, default_value = "")]
    password: String,

    /// Disable TLS for the wallet RPC server (always off here)
    #[arg(long)]
    noservertls: bool,

    /// Disable TLS for the node connection (always off here)
    #[arg(long)]
    noclienttls: bool,

    /// Hex-encoded 32-byte wallet seed
    #[arg(long)]
    seed: String,

    /// Logging level
    #[arg(long, default_value = "info")]
    debuglevel: String,
}

impl Cli {
    fn network(&self) -> Network {
        if self.regnet {
            Network::Regnet
        } else if self.simnet {
            Network::Simnet
        } else {
            Network::Mainnet
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_env("info").with_level(cli.debuglevel.clone()));

    let network = cli.network();
    let seed = WalletSeed::from_hex(&cli.seed).context("--seed must be 64 hex characters")?;
    let rpc_addr = cli.rpclisten.unwrap_or_else(|| {
        SocketAddr::from(([127, 0, 0, 1], network.params().default_wallet_rpc_port))
    });

    for dir in [&cli.appdata, &cli.logdir].into_iter().flatten() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let node = NodeRpcClient::new(
        RpcEndpoint {
            host: cli.rpcconnect.ip().to_string(),
            port: cli.rpcconnect.port(),
            user: cli.username.clone(),
            password: cli.password.clone(),
        },
        Duration::from_secs(10),
    );
    let wallet = MemWallet::new(network, seed.mining_address(network), node);

    let rpc_listener = tokio::net::TcpListener::bind(rpc_addr)
        .await
        .with_context(|| format!("failed to bind RPC address {rpc_addr}"))?;

    let shutdown = Arc::new(Notify::new());
    let stopped = Arc::new(AtomicBool::new(false));
    let attacher = wallet.clone();
    let attach_stopped = Arc::clone(&stopped);
    tokio::task::spawn_blocking(move || {
        while !attach_stopped.load(Ordering::SeqCst) {
            match attacher.attach() {
                Ok(best) => {
                    info!(height = best.height, "Connected to node");
                    break;
                }
                Err(err) => {
                    debug!(error = %err, "Node not reachable yet");
                    std::thread::sleep(ATTACH_RETRY);
                }
            }
        }
    });

    let handler = Arc::new(SimWallet::new(wallet.clone()));
    let router = rpc_router(handler, &cli.username, &cli.password, Arc::clone(&shutdown));

    info!(
        %network,
        rpc = %rpc_addr,
        node = %cli.rpcconnect,
        address = %wallet.mining_address(),
        noservertls = cli.noservertls,
        noclienttls = cli.noclienttls,
        "Simulated wallet listening"
    );
    println!("Wallet RPC server listening on {rpc_addr}");

    let served = serve(rpc_listener, router, shutdown_signal(shutdown)).await;
    stopped.store(true, Ordering::SeqCst);
    served?;
    wallet.detach();
    info!("Simulated wallet stopped");
    Ok(())
}
