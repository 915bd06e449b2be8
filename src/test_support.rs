//! Mock wallet plumbing shared by unit tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use ethers::{
    abi::{self, Token},
    providers::{
        JsonRpcError, Middleware, MockProvider, MockResponse, PendingTransaction, Provider,
        ProviderError,
    },
    types::{
        Address, BlockId, Transaction, TransactionReceipt, TxHash, U64,
        transaction::eip2718::TypedTransaction,
    },
};
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    wallet::{WalletConnector, WalletHandle},
};

/// 11155111 as returned by `eth_chainId`.
pub const SEPOLIA_HEX: &str = "0xaa36a7";

/// Provider polling quickly enough for confirmation tests.
pub fn mocked_provider(interval_ms: u64) -> (Provider<MockProvider>, MockProvider) {
    let (provider, mock) = Provider::mocked();
    (
        provider.interval(std::time::Duration::from_millis(interval_ms)),
        mock,
    )
}

pub fn tx_hash(n: u64) -> TxHash {
    TxHash::from_low_u64_be(n)
}

/// Queue the two responses a `PendingTransaction` consumes: the mined tx, then its receipt.
pub fn push_mined(mock: &MockProvider, hash: TxHash, status: u64) {
    let receipt = TransactionReceipt {
        transaction_hash: hash,
        block_number: Some(U64::from(42u64)),
        status: Some(U64::from(status)),
        ..Default::default()
    };
    let tx = Transaction {
        hash,
        block_number: Some(U64::from(42u64)),
        ..Default::default()
    };
    // Responses are consumed in reverse order.
    mock.push::<TransactionReceipt, _>(receipt).unwrap();
    mock.push::<Transaction, _>(tx).unwrap();
}

pub fn push_sentence(mock: &MockProvider, sentence: &str) {
    let data = abi::encode(&[Token::String(sentence.to_string())]);
    mock.push::<String, _>(format!("0x{}", hex::encode(data)))
        .unwrap();
}

/// Queue an `eth_call` failure shaped like a node reporting `require(false, reason)`.
pub fn push_revert(mock: &MockProvider, reason: &str) {
    let mut data = vec![0x08, 0xc3, 0x79, 0xa0]; // Error(string)
    data.extend(abi::encode(&[Token::String(reason.to_string())]));
    mock.push_response(MockResponse::Error(JsonRpcError {
        code: 3,
        message: format!("execution reverted: {reason}"),
        data: Some(json!(format!("0x{}", hex::encode(data)))),
    }));
}

/// Signer middleware that records transactions instead of signing them.
#[derive(Debug, Clone)]
pub struct RecordingSigner {
    inner: Provider<MockProvider>,
    tx_hash: TxHash,
    refuse: Option<String>,
    sent: Arc<Mutex<Vec<TypedTransaction>>>,
}

impl RecordingSigner {
    pub fn new(inner: Provider<MockProvider>, tx_hash: TxHash) -> Self {
        Self {
            inner,
            tx_hash,
            refuse: None,
            sent: Arc::default(),
        }
    }

    pub fn refusing(mut self, reason: &str) -> Self {
        self.refuse = Some(reason.to_string());
        self
    }

    pub fn sent(&self) -> Vec<TypedTransaction> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Middleware for RecordingSigner {
    type Error = ProviderError;
    type Provider = MockProvider;
    type Inner = Provider<MockProvider>;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn send_transaction<T: Into<TypedTransaction> + Send + Sync>(
        &self,
        tx: T,
        _block: Option<BlockId>,
    ) -> Result<PendingTransaction<'_, Self::Provider>, Self::Error> {
        if let Some(reason) = &self.refuse {
            return Err(ProviderError::CustomError(reason.clone()));
        }
        self.sent.lock().unwrap().push(tx.into());
        Ok(PendingTransaction::new(self.tx_hash, self.inner.provider()))
    }
}

/// Connector over a shared mock provider; counts how often the user would have been prompted.
#[derive(Debug, Clone)]
pub struct MockConnector {
    provider: Provider<MockProvider>,
    mock: MockProvider,
    signer: RecordingSigner,
    reject: bool,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_interval(5)
    }

    pub fn with_interval(interval_ms: u64) -> Self {
        let (provider, mock) = mocked_provider(interval_ms);
        let signer = RecordingSigner::new(provider.clone(), tx_hash(0xabc));
        Self {
            provider,
            mock,
            signer,
            reject: false,
            connects: Arc::default(),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::new()
        }
    }

    pub fn refusing_signatures(mut self, reason: &str) -> Self {
        self.signer = self.signer.refusing(reason);
        self
    }

    pub fn account() -> Address {
        Address::from_low_u64_be(0xbeef)
    }

    pub fn mock(&self) -> &MockProvider {
        &self.mock
    }

    pub fn push_chain_id(&self, chain_id: &str) {
        self.mock.push::<String, _>(chain_id.to_string()).unwrap();
    }

    pub fn signer(&self) -> &RecordingSigner {
        &self.signer
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletConnector for MockConnector {
    type Provider = Provider<MockProvider>;
    type Signer = RecordingSigner;

    async fn connect(&self) -> AppResult<WalletHandle<Self::Provider, Self::Signer>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // A real wallet answers after the user reacts; let other callers queue up meanwhile.
        tokio::task::yield_now().await;
        if self.reject {
            return Err(AppError::ConnectionRejected(
                "user rejected the request".into(),
            ));
        }
        Ok(WalletHandle::new(
            Self::account(),
            Arc::new(self.provider.clone()),
            Arc::new(self.signer.clone()),
        ))
    }
}
