//! Simulated node.
//!
//! Accepts the node command line the harness generates and serves the
//! node JSON-RPC methods over an in-memory chain.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dcrharness::sim::{SimNode, rpc_router, serve, shutdown_signal};
use dcrharness_common::{LogConfig, Network, init_logging};
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "dcrharness-simnode")]
#[command(author, version, about = "Simulated node for dcrharness tests")]
struct Cli {
    /// Use the regression test network
    #[arg(long, conflicts_with = "simnet")]
    regnet: bool,

    /// Use the simulation test network
    #[arg(long)]
    simnet: bool,

    /// Directory to store data
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Directory to log output
    #[arg(long)]
    logdir: Option<PathBuf>,

    /// Peer listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// RPC listen address
    #[arg(long)]
    rpclisten: Option<SocketAddr>,

    /// RPC username
    #[arg(long, default_value = "")]
    rpcuser: String,

    /// RPC password
    #[arg(long, default_value = "")]
    rpcpass: String,

    /// Disable TLS for the RPC server (always off here)
    #[arg(long)]
    notls: bool,

    /// Address coinbases of generated blocks pay to
    #[arg(long)]
    miningaddr: Option<String>,

    /// Logging level
    #[arg(long, default_value = "info")]
    debuglevel: String,

    /// Reject non-standard transactions
    #[arg(long)]
    rejectnonstd: bool,
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
    let params = network.params();
    let rpc_addr = cli
        .rpclisten
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], params.default_node_rpc_port)));
    let peer_addr = cli
        .listen
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], params.default_peer_port)));

    for dir in [&cli.datadir, &cli.logdir].into_iter().flatten() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    if let Some(address) = &cli.miningaddr {
        if !network.owns_address(address) {
            anyhow::bail!("mining address {address} is not valid on {network}");
        }
    }

    // Held for the lifetime of the process so the port stays reserved.
    let peer_listener = tokio::net::TcpListener::bind(peer_addr)
        .await
        .with_context(|| format!("failed to bind peer address {peer_addr}"))?;
    let rpc_listener = tokio::net::TcpListener::bind(rpc_addr)
        .await
        .with_context(|| format!("failed to bind RPC address {rpc_addr}"))?;

    tokio::spawn(async move {
        while let Ok((_stream, remote)) = peer_listener.accept().await {
            debug!(%remote, "Dropping inbound peer connection");
        }
    });

    let shutdown = Arc::new(Notify::new());
    let node = Arc::new(SimNode::new(network, cli.miningaddr.clone()));
    let router = rpc_router(node, &cli.rpcuser, &cli.rpcpass, Arc::clone(&shutdown));

    info!(
        %network,
        rpc = %rpc_addr,
        peer = %peer_addr,
        notls = cli.notls,
        rejectnonstd = cli.rejectnonstd,
        "Simulated node listening"
    );
    println!("RPC server listening on {rpc_addr}");

    serve(rpc_listener, router, shutdown_signal(shutdown)).await?;
    info!("Simulated node stopped");
    Ok(())
}
