use std::sync::Arc;

use ethers::providers::Middleware;
use tracing::warn;

use crate::{
    error::{AppError, AppResult},
    notify::Notifier,
};

/// Sepolia. The client refuses to touch the contract on any other chain.
pub const REQUIRED_CHAIN_ID: u64 = 11_155_111;

/// Enforces the single-network precondition on every provider/signer acquisition.
#[derive(Clone)]
pub struct NetworkGuard {
    network_name: String,
    notifier: Arc<dyn Notifier>,
}

impl NetworkGuard {
    pub fn new(network_name: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            network_name: network_name.into(),
            notifier,
        }
    }

    /// Read the wallet's active chain and reject anything but the required one.
    pub async fn validate<M>(&self, provider: &M) -> AppResult<()>
    where
        M: Middleware,
    {
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|err| AppError::Rpc(format!("failed to read wallet chain id: {err}")))?;

        self.check(chain_id.as_u64())
    }

    /// The user is notified before the error is returned.
    pub fn check(&self, chain_id: u64) -> AppResult<()> {
        if chain_id == REQUIRED_CHAIN_ID {
            return Ok(());
        }

        warn!(chain_id, expected = REQUIRED_CHAIN_ID, "wallet attached to unsupported network");
        self.notifier.notify(&format!(
            "Change the network to {} (chain id {REQUIRED_CHAIN_ID})",
            self.network_name
        ));

        Err(AppError::WrongNetwork {
            expected: REQUIRED_CHAIN_ID,
            actual: chain_id,
        })
    }
}
