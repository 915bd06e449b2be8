use std::time::Duration;

use ethers::{
    providers::{Middleware, PendingTransaction},
    types::{TransactionReceipt, U64},
};
use tracing::{info, instrument};

use crate::{
    error::{AppError, AppResult},
    types::PendingWrite,
};

const DEFAULT_RETRIES: usize = 3;

/// Waits for a submitted transaction to be mined. No timeout is imposed.
#[derive(Debug, Clone)]
pub struct TransactionTracker {
    poll_interval: Duration,
    retries: usize,
}

impl TransactionTracker {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            retries: DEFAULT_RETRIES,
        }
    }

    /// How many times a transaction missing from the mempool is looked up before it counts as dropped.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Drive `pending` to `Confirmed` or `Failed`.
    #[instrument(skip(self, client, pending), fields(tx = ?pending.tx_hash))]
    pub async fn await_confirmation<M>(
        &self,
        client: &M,
        pending: &mut PendingWrite,
    ) -> AppResult<TransactionReceipt>
    where
        M: Middleware,
    {
        let outcome = PendingTransaction::new(pending.tx_hash, client.provider())
            .interval(self.poll_interval)
            .retries(self.retries)
            .await;

        let result = match outcome {
            Ok(Some(receipt)) if reverted(&receipt) => Err(AppError::Confirmation(format!(
                "transaction {:?} reverted in block {:?}",
                pending.tx_hash, receipt.block_number
            ))),
            Ok(Some(receipt)) => Ok(receipt),
            Ok(None) => Err(AppError::Confirmation(format!(
                "transaction {:?} was dropped or replaced",
                pending.tx_hash
            ))),
            Err(err) => Err(AppError::Confirmation(format!(
                "failed to track transaction {:?}: {err}",
                pending.tx_hash
            ))),
        };

        match &result {
            Ok(receipt) => {
                pending.confirm(receipt.block_number);
                info!(block = ?receipt.block_number, "transaction confirmed");
            }
            Err(err) => pending.fail(err.to_string()),
        }

        result
    }
}

// Pre-Byzantium receipts carry no status; treat them as successful.
fn reverted(receipt: &TransactionReceipt) -> bool {
    receipt.status == Some(U64::zero())
}
