use std::sync::Arc;

use ethers::{
    abi::{Abi, parse_abi},
    providers::Middleware,
    types::Address,
};
use ethers_contract::{Contract, ContractError};
use once_cell::sync::Lazy;
use tracing::{info, instrument, warn};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    types::{PendingWrite, ReadOutcome},
};

const SET_SENTENCE: &str = "setSentence";
const GET_SENTENCE: &str = "getSentence";

// Used when no ABI file is configured.
static DEFAULT_ABI: Lazy<Abi> = Lazy::new(|| {
    parse_abi(&[
        "function setSentence(string _sentence)",
        "function getSentence() view returns (string)",
    ])
    .unwrap()
});

/// The two entry points of the sentence storage contract, bound per call to a provider or signer.
#[derive(Debug, Clone)]
pub struct ContractGateway {
    address: Address,
    abi: Abi,
}

impl ContractGateway {
    pub fn new(address: Address, abi: Abi) -> AppResult<Self> {
        for entry_point in [SET_SENTENCE, GET_SENTENCE] {
            abi.function(entry_point).map_err(|_| {
                AppError::Config(format!("contract interface has no `{entry_point}` function"))
            })?;
        }
        Ok(Self { address, abi })
    }

    pub fn with_default_abi(address: Address) -> Self {
        Self {
            address,
            abi: DEFAULT_ABI.clone(),
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let address = config.contract_address()?;
        match config.load_abi()? {
            Some(abi) => Self::new(address, abi),
            None => Ok(Self::with_default_abi(address)),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Bindings are rebuilt on every call: the handle type differs per call and the wallet may have changed.
    fn bind<M>(&self, client: Arc<M>) -> Contract<M>
    where
        M: Middleware + 'static,
    {
        Contract::new(self.address, self.abi.clone(), client)
    }

    /// Send `setSentence(value)` through a signing client.
    #[instrument(skip(self, signer), fields(contract = %self.address))]
    pub async fn submit_write<M>(&self, signer: Arc<M>, value: &str) -> AppResult<PendingWrite>
    where
        M: Middleware + 'static,
    {
        let contract = self.bind(signer);
        let call = contract
            .method::<_, ()>(SET_SENTENCE, value.to_string())
            .map_err(|err| AppError::Submission(format!("failed to encode {SET_SENTENCE}: {err}")))?;

        let pending = call.send().await.map_err(|err| {
            AppError::Submission(format!("{SET_SENTENCE} was not submitted: {}", revert_reason(&err)))
        })?;
        let tx_hash = *pending;

        info!(tx = ?tx_hash, "sentence submitted");
        Ok(PendingWrite::submitted(tx_hash))
    }

    /// Call `getSentence()`. A failing call is logged and reported as [`ReadOutcome::NoValue`].
    #[instrument(skip(self, provider), fields(contract = %self.address))]
    pub async fn perform_read<M>(&self, provider: Arc<M>) -> AppResult<ReadOutcome>
    where
        M: Middleware + 'static,
    {
        match self.call_get_sentence(provider).await {
            Ok(sentence) => Ok(ReadOutcome::Value { sentence }),
            Err(AppError::ReadRevert(reason)) => {
                warn!("revert reason: {reason}");
                Ok(ReadOutcome::NoValue { reason })
            }
            Err(other) => Err(other),
        }
    }

    async fn call_get_sentence<M>(&self, provider: Arc<M>) -> AppResult<String>
    where
        M: Middleware + 'static,
    {
        let contract = self.bind(provider);
        let call = contract
            .method::<_, String>(GET_SENTENCE, ())
            .map_err(|err| AppError::InvalidInput(format!("failed to encode {GET_SENTENCE}: {err}")))?;

        call.call()
            .await
            .map_err(|err| AppError::ReadRevert(revert_reason(&err)))
    }
}

/// Prefer the decoded `Error(string)` payload, falling back to the raw error text.
fn revert_reason<M: Middleware>(err: &ContractError<M>) -> String {
    err.decode_revert::<String>()
        .unwrap_or_else(|| err.to_string())
}
