//! Network parameter profiles.
//!
//! Each profile carries the consensus-derived constants the harness needs
//! (coinbase maturity, address prefix, default ports) so that nothing above
//! this module hard-codes them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Test network a harness runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Regnet,
    Simnet,
}

/// Constants for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    pub name: &'static str,
    /// Flag selecting this network on the node/wallet command line.
    /// Mainnet is the default and has none.
    pub cli_flag: Option<&'static str>,
    /// Blocks a coinbase output must be buried under before it is spendable.
    pub coinbase_maturity: u64,
    /// Two-character prefix of pay-to-pubkey-hash addresses.
    pub address_prefix: &'static str,
    pub default_peer_port: u16,
    pub default_node_rpc_port: u16,
    pub default_wallet_rpc_port: u16,
    /// Subsidy paid by every generated coinbase, in atoms.
    pub block_subsidy: u64,
    /// Whether the node accepts the `generate` RPC on this network.
    pub supports_generate: bool,
}

const MAINNET_PARAMS: NetworkParams = NetworkParams {
    name: "mainnet",
    cli_flag: None,
    coinbase_maturity: 256,
    address_prefix: "Ds",
    default_peer_port: 9108,
    default_node_rpc_port: 9109,
    default_wallet_rpc_port: 9110,
    block_subsidy: 3_119_582_664,
    supports_generate: false,
};

const REGNET_PARAMS: NetworkParams = NetworkParams {
    name: "regnet",
    cli_flag: Some("--regnet"),
    coinbase_maturity: 16,
    address_prefix: "Rs",
    default_peer_port: 18655,
    default_node_rpc_port: 18656,
    default_wallet_rpc_port: 18657,
    block_subsidy: 50_000_000_000,
    supports_generate: true,
};

const SIMNET_PARAMS: NetworkParams = NetworkParams {
    name: "simnet",
    cli_flag: Some("--simnet"),
    coinbase_maturity: 16,
    address_prefix: "Ss",
    default_peer_port: 18555,
    default_node_rpc_port: 19556,
    default_wallet_rpc_port: 19557,
    block_subsidy: 50_000_000_000,
    supports_generate: true,
};

impl Network {
    pub const ALL: [Network; 3] = [Network::Mainnet, Network::Regnet, Network::Simnet];

    pub fn params(self) -> &'static NetworkParams {
        match self {
            Network::Mainnet => &MAINNET_PARAMS,
            Network::Regnet => &REGNET_PARAMS,
            Network::Simnet => &SIMNET_PARAMS,
        }
    }

    pub fn name(self) -> &'static str {
        self.params().name
    }

    pub fn coinbase_maturity(self) -> u64 {
        self.params().coinbase_maturity
    }

    /// Whether an output at `height` is spendable with the chain tip at `tip`.
    pub fn is_mature(self, height: u64, tip: u64) -> bool {
        tip.checked_sub(height)
            .is_some_and(|depth| depth >= self.coinbase_maturity())
    }

    /// Deterministic mining address for a wallet seed.
    ///
    /// This is a stand-in for real key derivation: the same seed always maps
    /// to the same address, and the prefix identifies the network.
    pub fn mining_address(self, seed: &[u8]) -> String {
        let digest = blake3::hash(seed);
        let hex = digest.to_hex();
        format!("{}{}", self.params().address_prefix, &hex.as_str()[..32])
    }

    /// Returns true when `address` carries this network's prefix.
    pub fn owns_address(self, address: &str) -> bool {
        address.len() > 2 && address.starts_with(self.params().address_prefix)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Error returned when parsing an unknown network name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network '{0}' (expected mainnet, regnet or simnet)")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "regnet" | "regtest" => Ok(Network::Regnet),
            "simnet" => Ok(Network::Simnet),
            _ => Err(UnknownNetwork(s.to_string())),
        }
    }
}
