use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dcrharness_common::{BestBlock, BlockHash, Network, NodeRpcClient, UnspentOutput};
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};

const MEM_WALLET_NAME: &str = "memwallet";

/// A wallet without a process of its own.
///
/// It watches the node over RPC and tracks every coinbase paying its mining
/// address. Clones share state, so one clone can serve RPC while another
/// is driven by the harness.
#[derive(Debug, Clone)]
pub struct MemWallet {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    network: Network,
    mining_address: String,
    node: NodeRpcClient,
    state: Mutex<ScanState>,
    #[cfg(test)]
    fail_stop: std::sync::atomic::AtomicBool,
}

#[derive(Debug, Default)]
struct ScanState {
    attached: bool,
    /// Last scanned block.
    tip: Option<(u64, BlockHash)>,
    coinbases: Vec<Coinbase>,
}

#[derive(Debug, Clone)]
struct Coinbase {
    txid: String,
    amount: u64,
    height: u64,
}

impl MemWallet {
    pub fn new(network: Network, mining_address: String, node: NodeRpcClient) -> Self {
        Self {
            inner: Arc::new(Inner {
                network,
                mining_address,
                node,
                state: Mutex::new(ScanState::default()),
                #[cfg(test)]
                fail_stop: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        MEM_WALLET_NAME
    }

    pub fn network(&self) -> Network {
        self.inner.network
    }

    pub fn mining_address(&self) -> &str {
        &self.inner.mining_address
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    /// Associate with the node and scan its chain.
    pub fn attach(&self) -> HarnessResult<BestBlock> {
        let best = self.inner.node.get_best_block()?;
        self.lock().attached = true;
        info!(
            address = %self.inner.mining_address,
            height = best.height,
            "In-memory wallet attached to node"
        );
        self.sync()?;
        Ok(best)
    }

    /// Forget the node association. Tracked outputs are kept.
    pub fn detach(&self) {
        let mut state = self.lock();
        if state.attached {
            state.attached = false;
            debug!(address = %self.inner.mining_address, "In-memory wallet detached");
        }
    }

    /// Scan blocks added since the last sync; returns the tip height.
    ///
    /// If the block at the last scanned height changed, the whole chain is
    /// rescanned.
    pub fn sync(&self) -> HarnessResult<u64> {
        let node = &self.inner.node;
        let mut state = self.lock();
        if !state.attached {
            return Err(HarnessError::WalletDetached(MEM_WALLET_NAME.to_string()));
        }

        let tip = node.get_block_count()?;
        if let Some((height, hash)) = &state.tip {
            let still_valid = *height <= tip && node.get_block_hash(*height)? == *hash;
            if !still_valid {
                info!(height = *height, "Chain changed under wallet, rescanning");
                state.tip = None;
                state.coinbases.clear();
            }
        }

        let start = state.tip.as_ref().map_or(0, |(height, _)| height + 1);
        for height in start..=tip {
            let hash = node.get_block_hash(height)?;
            let block = node.get_block(&hash)?;
            if block.coinbase.address.as_deref() == Some(self.inner.mining_address.as_str()) {
                state.coinbases.push(Coinbase {
                    txid: block.coinbase.txid,
                    amount: block.coinbase.amount,
                    height,
                });
            }
            state.tip = Some((height, hash));
        }
        Ok(tip)
    }

    /// Outputs with at least `min_conf` confirmations.
    pub fn list_unspent(&self, min_conf: u64) -> HarnessResult<Vec<UnspentOutput>> {
        let tip = self.sync()?;
        let state = self.lock();
        Ok(state
            .coinbases
            .iter()
            .filter(|coinbase| coinbase.height <= tip)
            .map(|coinbase| UnspentOutput {
                txid: coinbase.txid.clone(),
                vout: 0,
                address: self.inner.mining_address.clone(),
                amount: coinbase.amount,
                height: coinbase.height,
                confirmations: tip - coinbase.height + 1,
            })
            .filter(|output| output.confirmations >= min_conf)
            .collect())
    }

    pub fn spendable_outputs(&self) -> HarnessResult<Vec<UnspentOutput>> {
        self.list_unspent(1)
    }

    pub(crate) fn launch(&mut self) -> HarnessResult<()> {
        self.attach().map(|_| ())
    }

    pub(crate) fn wait_ready(&mut self) -> HarnessResult<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(HarnessError::WalletDetached(MEM_WALLET_NAME.to_string()))
        }
    }

    pub(crate) fn stop(&mut self) -> HarnessResult<()> {
        self.detach();
        self.stop_fault()
    }

    #[cfg(not(test))]
    fn stop_fault(&self) -> HarnessResult<()> {
        Ok(())
    }

    #[cfg(test)]
    fn stop_fault(&self) -> HarnessResult<()> {
        if self.inner.fail_stop.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(HarnessError::Io(std::io::Error::other("memwallet stop failed")));
        }
        Ok(())
    }

    /// Make every later `stop` report an error after detaching.
    #[cfg(test)]
    pub(crate) fn fail_stops(&self) {
        self.inner.fail_stop.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn is_running(&mut self) -> bool {
        self.is_attached()
    }

    fn lock(&self) -> MutexGuard<'_, ScanState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
