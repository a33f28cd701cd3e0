use std::sync::{Mutex, MutexGuard, PoisonError};

use dcrharness_common::protocol::NodeInfo;
use dcrharness_common::{BlockHash, Network};
use serde_json::{Value, json};
use tracing::info;

use super::chain::SimChain;
use super::server::{RpcFault, RpcHandler, param_str, param_u64};

/// Node RPC surface over a [`SimChain`].
#[derive(Debug)]
pub struct SimNode {
    network: Network,
    mining_address: Option<String>,
    chain: Mutex<SimChain>,
}

impl SimNode {
    pub fn new(network: Network, mining_address: Option<String>) -> Self {
        Self {
            network,
            mining_address,
            chain: Mutex::new(SimChain::new(network)),
        }
    }

    fn chain(&self) -> MutexGuard<'_, SimChain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generate(&self, params: &[Value]) -> Result<Value, RpcFault> {
        let count = param_u64(params, 0, "numblocks")?;
        if count == 0 {
            return Err(RpcFault::invalid_params("numblocks must be at least 1"));
        }
        if !self.network.params().supports_generate {
            return Err(RpcFault::misc(format!(
                "generate is not supported on {}",
                self.network
            )));
        }
        let Some(address) = self.mining_address.as_deref() else {
            return Err(RpcFault::misc(
                "No payment addresses specified via --miningaddr",
            ));
        };

        let hashes = self.chain().generate(count, address);
        info!(count, network = %self.network, "Generated blocks");
        Ok(json!(hashes))
    }
}

impl RpcHandler for SimNode {
    fn handle(&self, method: &str, params: &[Value]) -> Result<Value, RpcFault> {
        match method {
            "getbestblock" => Ok(json!(self.chain().best())),
            "getblockcount" => Ok(json!(self.chain().height())),
            "getblockhash" => {
                let height = param_u64(params, 0, "index")?;
                self.chain()
                    .hash_at(height)
                    .map(|hash| json!(hash))
                    .ok_or_else(|| RpcFault::misc("Block number out of range"))
            }
            "getblock" => {
                let hash = BlockHash(param_str(params, 0, "hash")?.to_string());
                self.chain()
                    .block(&hash)
                    .map(|block| json!(block))
                    .ok_or_else(|| RpcFault::misc(format!("Block not found: {hash}")))
            }
            "generate" => self.generate(params),
            "getinfo" => Ok(json!(NodeInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                blocks: self.chain().height(),
                network: self.network.to_string(),
            })),
            "stop" => Ok(json!("dcrd stopping.")),
            other => Err(RpcFault::method_not_found(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcrharness_common::{BestBlock, BlockInfo};

    #[test]
    fn test_generate_then_query() {
        let node = SimNode::new(Network::Regnet, Some("Rsminer".to_string()));
        let hashes: Vec<BlockHash> =
            serde_json::from_value(node.handle("generate", &[json!(2)]).unwrap()).unwrap();
        assert_eq!(hashes.len(), 2);

        let best: BestBlock =
            serde_json::from_value(node.handle("getbestblock", &[]).unwrap()).unwrap();
        assert_eq!(best.height, 2);
        assert_eq!(best.hash, hashes[1]);

        let hash = node.handle("getblockhash", &[json!(1)]).unwrap();
        assert_eq!(hash, json!(hashes[0]));

        let block: BlockInfo = serde_json::from_value(
            node.handle("getblock", &[json!(hashes[0]), json!(true)]).unwrap(),
        )
        .unwrap();
        assert_eq!(block.coinbase.address.as_deref(), Some("Rsminer"));
        assert_eq!(block.confirmations, 2);
    }

    #[test]
    fn test_generate_rejected_on_mainnet() {
        let node = SimNode::new(Network::Mainnet, Some("Dsminer".to_string()));
        let fault = node.handle("generate", &[json!(1)]).unwrap_err();
        assert!(fault.message.contains("mainnet"));
    }

    #[test]
    fn test_generate_requires_mining_address() {
        let node = SimNode::new(Network::Simnet, None);
        let fault = node.handle("generate", &[json!(1)]).unwrap_err();
        assert!(fault.message.contains("--miningaddr"));
    }

    #[test]
    fn test_out_of_range_and_unknown() {
        let node = SimNode::new(Network::Regnet, None);
        assert!(node.handle("getblockhash", &[json!(5)]).is_err());
        assert!(node.handle("getblock", &[json!("ff")]).is_err());
        assert_eq!(
            node.handle("sendrawtransaction", &[]).unwrap_err(),
            RpcFault::method_not_found("sendrawtransaction")
        );
    }

    #[test]
    fn test_getinfo_reports_network() {
        let node = SimNode::new(Network::Simnet, None);
        let info = node.handle("getinfo", &[]).unwrap();
        assert_eq!(info["network"], "simnet");
        assert_eq!(info["blocks"], 0);
    }
}
