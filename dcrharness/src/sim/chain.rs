//! In-memory block chain backing the simulated node.

use std::collections::HashMap;

use dcrharness_common::{BestBlock, BlockHash, BlockInfo, CoinbaseInfo, Network};

#[derive(Debug, Clone)]
struct SimBlock {
    hash: BlockHash,
    previous: Option<BlockHash>,
    coinbase: CoinbaseInfo,
}

/// A linear chain starting at a network-specific genesis block.
#[derive(Debug, Clone)]
pub struct SimChain {
    network: Network,
    blocks: Vec<SimBlock>,
    index: HashMap<BlockHash, u64>,
}

impl SimChain {
    pub fn new(network: Network) -> Self {
        let hash = BlockHash(
            blake3::hash(format!("dcrharness-genesis:{}", network.name()).as_bytes())
                .to_hex()
                .to_string(),
        );
        let genesis = SimBlock {
            coinbase: CoinbaseInfo {
                txid: coinbase_txid(&hash),
                address: None,
                amount: 0,
            },
            hash: hash.clone(),
            previous: None,
        };
        Self {
            network,
            blocks: vec![genesis],
            index: HashMap::from([(hash, 0)]),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Height of the tip; genesis is height 0.
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    pub fn best(&self) -> BestBlock {
        let height = self.height();
        BestBlock {
            hash: self.tip().hash.clone(),
            height,
        }
    }

    pub fn hash_at(&self, height: u64) -> Option<&BlockHash> {
        let index = usize::try_from(height).ok()?;
        self.blocks.get(index).map(|block| &block.hash)
    }

    /// Verbose block view, with confirmations relative to the current tip.
    pub fn block(&self, hash: &BlockHash) -> Option<BlockInfo> {
        let height = *self.index.get(hash)?;
        let block = self.blocks.get(usize::try_from(height).ok()?)?;
        Some(BlockInfo {
            hash: block.hash.clone(),
            height,
            previous_block_hash: block.previous.clone(),
            confirmations: self.height() - height + 1,
            coinbase: block.coinbase.clone(),
        })
    }

    /// Append `count` blocks whose coinbases pay `address`.
    pub fn generate(&mut self, count: u64, address: &str) -> Vec<BlockHash> {
        let subsidy = self.network.params().block_subsidy;
        let mut hashes = Vec::new();
        for _ in 0..count {
            let parent = self.tip().hash.clone();
            let height = self.height() + 1;

            let mut hasher = blake3::Hasher::new();
            hasher.update(parent.as_str().as_bytes());
            hasher.update(&height.to_le_bytes());
            hasher.update(address.as_bytes());
            let hash = BlockHash(hasher.finalize().to_hex().to_string());

            self.blocks.push(SimBlock {
                coinbase: CoinbaseInfo {
                    txid: coinbase_txid(&hash),
                    address: Some(address.to_string()),
                    amount: subsidy,
                },
                hash: hash.clone(),
                previous: Some(parent),
            });
            self.index.insert(hash.clone(), height);
            hashes.push(hash);
        }
        hashes
    }

    fn tip(&self) -> &SimBlock {
        // The chain always holds genesis.
        &self.blocks[self.blocks.len() - 1]
    }
}

fn coinbase_txid(block: &BlockHash) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"coinbase:");
    hasher.update(block.as_str().as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_per_network() {
        let regnet = SimChain::new(Network::Regnet);
        let simnet = SimChain::new(Network::Simnet);
        assert_eq!(regnet.height(), 0);
        assert_ne!(regnet.best().hash, simnet.best().hash);
        assert_eq!(regnet.best().hash, SimChain::new(Network::Regnet).best().hash);

        let genesis = regnet.block(&regnet.best().hash).unwrap();
        assert!(genesis.coinbase.address.is_none());
        assert!(genesis.previous_block_hash.is_none());
    }

    #[test]
    fn test_generate_links_blocks() {
        let mut chain = SimChain::new(Network::Regnet);
        let genesis = chain.best().hash;
        let hashes = chain.generate(3, "Rsminer");
        assert_eq!(hashes.len(), 3);
        assert_eq!(chain.height(), 3);
        assert_eq!(chain.best().hash, hashes[2]);

        let first = chain.block(&hashes[0]).unwrap();
        assert_eq!(first.height, 1);
        assert_eq!(first.previous_block_hash, Some(genesis));
        assert_eq!(first.confirmations, 3);
        assert_eq!(first.coinbase.address.as_deref(), Some("Rsminer"));
        assert_eq!(first.coinbase.amount, Network::Regnet.params().block_subsidy);

        assert_eq!(chain.hash_at(2), Some(&hashes[1]));
        assert_eq!(chain.hash_at(4), None);
    }

    #[test]
    fn test_unknown_block() {
        let chain = SimChain::new(Network::Simnet);
        assert!(chain.block(&BlockHash("00".repeat(32))).is_none());
    }
}
