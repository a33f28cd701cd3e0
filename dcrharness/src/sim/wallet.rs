use dcrharness_common::WalletInfo;
use serde_json::{Value, json};

use super::server::{RpcFault, RpcHandler, param_u64};
use crate::wallet::MemWallet;

/// Wallet RPC surface over a [`MemWallet`].
#[derive(Debug, Clone)]
pub struct SimWallet {
    wallet: MemWallet,
}

impl SimWallet {
    pub fn new(wallet: MemWallet) -> Self {
        Self { wallet }
    }

    pub fn wallet(&self) -> &MemWallet {
        &self.wallet
    }
}

impl RpcHandler for SimWallet {
    fn handle(&self, method: &str, params: &[Value]) -> Result<Value, RpcFault> {
        match method {
            "walletinfo" => Ok(json!(WalletInfo {
                daemon_connected: self.wallet.is_attached(),
                unlocked: true,
                mining_address: self.wallet.mining_address().to_string(),
            })),
            "listunspent" => {
                let min_conf = if params.is_empty() {
                    1
                } else {
                    param_u64(params, 0, "minconf")?
                };
                self.wallet
                    .list_unspent(min_conf)
                    .map(|outputs| json!(outputs))
                    .map_err(|err| RpcFault::misc(err.to_string()))
            }
            "stop" => Ok(json!("dcrwallet stopping.")),
            other => Err(RpcFault::method_not_found(other)),
        }
    }
}
